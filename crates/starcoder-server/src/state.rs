//! Application state and configuration.

use std::sync::Arc;

use starcoder_runtime::RequestService;

/// Application state shared across handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Request service over the loaded model.
    pub service: Arc<RequestService>,
    /// Server configuration.
    pub config: ServerConfig,
}

impl AppState {
    pub fn new(service: RequestService, config: ServerConfig) -> Self {
        Self {
            service: Arc::new(service),
            config,
        }
    }
}

/// Server configuration parameters.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Model family, used as the route segment in `/v1/<family>/generate`.
    pub family: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            family: "starcoder".to_string(),
        }
    }
}
