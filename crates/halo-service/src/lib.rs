//! Host process for HALO peripherals: HTTP control channel and event stream.
//!
//! This crate provides a service that:
//! - Runs the reconciliation engine against the host's BLE adapter
//! - Exposes pairing, unpairing and scan commands over a REST API
//! - Streams engine events to WebSocket clients
//!
//! # REST API Endpoints
//!
//! - `GET /api/health` - Service health, scan state and device counts
//! - `POST /api/scan/start` - Open a scan session
//! - `POST /api/scan/stop` - Close the scan session
//! - `GET /api/scan/devices` - Candidates seen this session
//! - `GET /api/devices` - Paired devices with live connection flag
//! - `POST /api/devices/pair` - Pair a device
//! - `DELETE /api/devices/{id}` - Remove a pairing
//! - `POST /api/devices/{id}/forget-network` - Ask a device to drop its credentials
//! - `WS /api/ws` - Event stream, starting with a status snapshot
//!
//! # Configuration
//!
//! The service reads configuration from `~/.config/halo/service.toml`:
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:8787"
//!
//! [storage]
//! path = "~/.local/share/halo/settings.db"
//!
//! [radio]
//! product_marker = "HALO"
//! scan_on_start = true
//! connect_timeout_secs = 10
//!
//! [registry]
//! url = "http://192.168.4.1"
//! ```

pub mod api;
pub mod config;
pub mod state;
pub mod ws;

pub use config::{
    Config, ConfigError, RadioConfig, RegistryConfig, ServerConfig, StorageConfig,
    ValidationError,
};
pub use state::AppState;
