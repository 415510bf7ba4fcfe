//! Application state shared across handlers.
//!
//! # Event Channel Behavior
//!
//! Outbound events flow through the engine's broadcast channel. Each
//! WebSocket client holds its own receiver.
//!
//! - **Buffer size**: `server.broadcast_buffer` (default: 100)
//! - **Message loss**: a subscriber that falls behind loses the oldest events;
//!   the next status snapshot brings it back in sync
//! - **No blocking**: the engine never waits on slow clients

use std::sync::Arc;

use time::OffsetDateTime;

use halo_core::ReconciliationEngine;
use halo_core::registry::RegistryClient;

use crate::config::Config;

/// Shared application state.
pub struct AppState {
    /// The reconciliation engine.
    pub engine: ReconciliationEngine,
    /// Configuration the service was started with.
    pub config: Config,
    /// Client for the network registry, when one is configured.
    pub registry: Option<RegistryClient>,
    /// When the service started.
    pub started_at: OffsetDateTime,
}

impl AppState {
    pub fn new(
        engine: ReconciliationEngine,
        config: Config,
        registry: Option<RegistryClient>,
    ) -> Arc<Self> {
        Arc::new(Self {
            engine,
            config,
            registry,
            started_at: OffsetDateTime::now_utc(),
        })
    }

    /// Seconds since the service started.
    pub fn uptime_seconds(&self) -> u64 {
        let elapsed = OffsetDateTime::now_utc() - self.started_at;
        elapsed.whole_seconds().max(0) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use halo_core::{EngineConfig, MockAdapter};
    use halo_store::Store;
    use tokio::sync::Mutex;

    #[tokio::test]
    async fn test_app_state_new() {
        let store = Arc::new(Mutex::new(Store::open_in_memory().unwrap()));
        let engine =
            ReconciliationEngine::new(Arc::new(MockAdapter::new()), store, EngineConfig::default())
                .unwrap();
        let state = AppState::new(engine, Config::default(), None);

        assert!(state.registry.is_none());
        assert_eq!(state.config.server.bind, "127.0.0.1:8787");
        assert!(state.uptime_seconds() < 5);
    }
}
