//! HTTP surface: health, metrics, the real-time socket and the static frontend.

mod router;
mod state;

use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::config::ScoutConfig;
use crate::gateway::Gateway;

pub use router::{build_router, cors_layer};
pub use state::AppState;

/// Serves until ctrl-c, then closes every browser context still held.
pub async fn serve(config: &ScoutConfig, gateway: Gateway) -> Result<()> {
    let state = AppState::new(gateway.clone(), config.environment);
    let cors = cors_layer(&config.frontend_url)
        .with_context(|| format!("invalid FRONTEND_URL {:?}", config.frontend_url))?;
    let static_root = config.static_root();
    let app = build_router(state, &static_root).layer(cors);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(
        %addr,
        environment = config.environment.as_str(),
        static_root = %static_root.display(),
        "cartscout listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server terminated unexpectedly")?;

    info!("shutting down; closing browser contexts");
    gateway.orchestrator().registry().destroy_all().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(?err, "failed to listen for shutdown signal");
    }
}
