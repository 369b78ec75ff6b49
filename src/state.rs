use crate::config::AppConfig;
use crate::upstream::UpstreamClient;

/// Shared application state accessible to all handlers.
///
/// Read-only after startup; per-request entities live and die inside one
/// HTTP exchange.
pub struct AppState {
    pub config: AppConfig,
    pub upstream: UpstreamClient,
}

impl AppState {
    #[must_use]
    pub fn new(config: AppConfig, upstream: UpstreamClient) -> Self {
        Self { config, upstream }
    }
}
