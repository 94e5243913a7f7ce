/// Application state implementation for tty_relay
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::RelayConfig;
use crate::service::SessionRegistry;

/// Application state containing shared data across handlers
#[derive(Clone)]
pub struct AppState {
    /// Live sessions by id
    pub registry: Arc<SessionRegistry>,
    /// Application configuration
    pub config: Arc<RelayConfig>,
    /// Cancelled to stop the HTTP server (single-use mode)
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(registry: Arc<SessionRegistry>, config: Arc<RelayConfig>) -> Self {
        Self {
            registry,
            config,
            shutdown: CancellationToken::new(),
        }
    }

    /// WebSocket path viewers of `session_id` connect to.
    pub fn ws_path(session_id: &str) -> String {
        format!("/ws/{}", session_id)
    }
}
