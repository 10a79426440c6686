use std::path::Path;

use axum::{
    extract::State,
    http::{header::InvalidHeaderValue, HeaderValue, Method, StatusCode},
    response::IntoResponse,
    routing::{any, get},
    Json, Router,
};
use chrono::Utc;
use serde_json::json;
use tower_http::cors::{AllowHeaders, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};

use crate::metrics;

mod ws;

use super::state::AppState;

/// API, metrics and socket routes, with the frontend build as the fallback.
///
/// Unknown paths outside `/api` get `index.html` so client-side routes resolve.
pub fn build_router(state: AppState, static_root: &Path) -> Router {
    let frontend =
        ServeDir::new(static_root).fallback(ServeFile::new(static_root.join("index.html")));

    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/*rest", any(api_not_found))
        .route("/metrics", get(metrics_handler))
        .merge(ws::router())
        .fallback_service(frontend)
        .with_state(state)
}

/// Credentialed CORS for the configured frontend origin.
pub fn cors_layer(frontend_url: &str) -> Result<CorsLayer, InvalidHeaderValue> {
    let origin = HeaderValue::from_str(frontend_url.trim_end_matches('/'))?;
    Ok(CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true))
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339(),
        "environment": state.environment.as_str(),
    }))
}

async fn api_not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "API endpoint not found" })),
    )
}

async fn metrics_handler() -> impl IntoResponse {
    metrics::render()
}
