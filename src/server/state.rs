use crate::config::Environment;
use crate::gateway::Gateway;

/// Shared state handed to every HTTP and WebSocket handler.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Gateway,
    pub environment: Environment,
}

impl AppState {
    pub fn new(gateway: Gateway, environment: Environment) -> Self {
        Self {
            gateway,
            environment,
        }
    }
}
