//! Shared application state injected into all Axum handlers.

use std::sync::Arc;

use crate::config::RelayConfig;
use crate::domain::ConnectionRegistry;

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Live connections.
    pub registry: Arc<ConnectionRegistry>,
    /// Relay configuration.
    pub config: Arc<RelayConfig>,
}

impl AppState {
    /// Creates state with an empty registry.
    #[must_use]
    pub fn new(config: RelayConfig) -> Self {
        Self {
            registry: Arc::new(ConnectionRegistry::new()),
            config: Arc::new(config),
        }
    }
}
