use serde::{Deserialize, Serialize};

/// Thresholds for the network-idle signal.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TapConfig {
    /// How long the in-flight count must stay at or below `idle_inflight` before a page is idle.
    pub quiet_window_ms: u64,
    pub idle_inflight: u64,
}

impl Default for TapConfig {
    fn default() -> Self {
        Self {
            quiet_window_ms: 500,
            idle_inflight: 2,
        }
    }
}
