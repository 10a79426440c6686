use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use stealth::{config::load_bundle_from_path, EvasionRuntime};
use tracing::{error, info, warn};

use super::env::CliArgs;
use super::runtime::init_logging;
use crate::config::{self, ScoutConfig};
use crate::gateway::Gateway;
use crate::metrics;
use crate::orchestrator::Orchestrator;
use crate::pool::{ChromeLauncher, ContextPool};
use crate::registry::SessionRegistry;
use crate::server;
use crate::targets::TargetSet;

pub async fn run() -> Result<()> {
    config::load_local_env_overrides();
    let cli = CliArgs::parse();

    let config = ScoutConfig::load(cli.config.as_deref(), &cli.overrides())?;
    init_logging(&cli.log_level, cli.debug, cli.json_logs || config.is_production())?;
    metrics::register_metrics();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        git = env!("GIT_HASH"),
        built = env!("BUILD_DATE"),
        "Starting CartScout"
    );

    let cdp = config.cdp_config();
    if cdp.executable.as_os_str().is_empty() {
        warn!("no Chromium executable found; set CHROME_PATH before initializing browsers");
    }

    let evasion = Arc::new(EvasionRuntime::new());
    if let Some(path) = &config.stealth.profile_bundle {
        let bundle = load_bundle_from_path(path)
            .with_context(|| format!("Failed to load profile bundle {}", path.display()))?;
        evasion.load_bundle(bundle);
        info!(path = %path.display(), "loaded evasion profiles");
    }

    let targets = TargetSet::standard(evasion.as_ref());
    let launcher = Arc::new(ChromeLauncher::new(cdp, evasion));
    let pool = Arc::new(ContextPool::new(launcher));
    let registry = Arc::new(SessionRegistry::new(pool));
    let orchestrator = Arc::new(Orchestrator::new(registry, targets, config.timings()));
    let gateway = Gateway::new(orchestrator);

    match server::serve(&config, gateway).await {
        Ok(()) => {
            info!("Server stopped");
            Ok(())
        }
        Err(err) => {
            error!("Server failed: {:#}", err);
            Err(err)
        }
    }
}
