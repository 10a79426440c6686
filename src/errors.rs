//! Error handling module
//!
//! Session-level failures surface as [`ScoutError`]. Per-target failures never reach this type; the
//! orchestrator turns them into status values before they cross a target boundary.

use cdp_adapter::AdapterError;
use stealth::StealthError;
use thiserror::Error;

use cartscout_core_types::Target;

#[derive(Debug, Error)]
pub enum ScoutError {
    #[error("{target} browser failed to start: {source}")]
    Launch {
        target: Target,
        #[source]
        source: AdapterError,
    },
    #[error("{target} evasion profile rejected: {source}")]
    Evasion {
        target: Target,
        #[source]
        source: StealthError,
    },
    #[error("browser operation failed: {0}")]
    Browser(#[from] AdapterError),
    #[error("session {0} is not initialized")]
    NotInitialized(String),
    #[error("no service has a confirmed location")]
    NoLocation,
    #[error("{0} task aborted")]
    TaskAborted(Target),
    #[error("configuration error: {0}")]
    Config(String),
}

pub type ScoutResult<T> = Result<T, ScoutError>;

impl ScoutError {
    pub fn is_not_initialized(&self) -> bool {
        matches!(self, ScoutError::NotInitialized(_))
    }
}
