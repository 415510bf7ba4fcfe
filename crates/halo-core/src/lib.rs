//! Connection reconciliation and pairing for HALO wearable peripherals.
//!
//! This crate drives the host side of a small fleet of BLE peripherals
//! (shoes, guns, suits): it discovers them, provisions unpaired ones with
//! network credentials and a role, reconnects paired ones automatically when
//! they advertise, and keeps subscribers informed through a stream of
//! [`HostEvent`]s.
//!
//! # Features
//!
//! - **Radio abstraction**: the [`RadioAdapter`] trait, implemented over
//!   btleplug by [`BleAdapter`] and scripted by [`MockAdapter`] for tests
//! - **Reconciliation**: [`ReconciliationEngine`] tracks each device through
//!   `Discovered -> Connecting -> Connected <-> Disconnected`
//! - **Pairing**: [`PairingDriver`] writes credentials and role, reads the
//!   device info service and commits the record
//! - **Status broadcast**: full enriched device list on every change and on
//!   a fixed interval
//! - **Registry client** (feature `registry-client`): HTTP client for the
//!   local network device registry
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use tokio::sync::Mutex;
//! use halo_core::{BleAdapter, EngineConfig, NetworkCredentials, PairingRequest, ReconciliationEngine};
//! use halo_store::Store;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let adapter = Arc::new(BleAdapter::new().await?);
//!     let store = Arc::new(Mutex::new(Store::open_default()?));
//!     let engine = ReconciliationEngine::new(adapter, store, EngineConfig::default())?;
//!     engine.start().await;
//!     engine.start_scan(None).await?;
//!
//!     for candidate in engine.scanned_devices().await {
//!         let request = PairingRequest::new(
//!             candidate.id,
//!             "L",
//!             NetworkCredentials::new("arena", "hunter2"),
//!         );
//!         let record = engine.pair(request).await?;
//!         println!("Paired {} as {}", record.name, record.role);
//!     }
//!     Ok(())
//! }
//! ```

pub mod ble;
pub mod broadcast;
pub mod engine;
pub mod error;
pub mod events;
pub mod mock;
pub mod pairing;
pub mod radio;
#[cfg(feature = "registry-client")]
pub mod registry;
pub mod scan;
pub mod util;

pub use halo_types::types;
pub use halo_types::uuids;

pub use ble::{BleAdapter, get_adapter};
pub use broadcast::{merge_view, start_status_ticker};
pub use engine::{
    DiscoveryOutcome, EngineConfig, ForgetOutcome, LinkPhase, ReconciliationEngine, ScanStart,
    ScanStatus,
};
pub use error::{Error, Result};
pub use events::{EventDispatcher, EventReceiver, EventSender, HostEvent};
pub use mock::{MockAdapter, MockWrite};
pub use pairing::{NetworkCredentials, PairingDriver, PairingRequest, PairingState, PairingTimeouts};
pub use radio::{
    AdapterState, Advertisement, CharacteristicHandle, ConnectionHandle, RadioAdapter, RadioEvent,
};
pub use scan::{ScanFilter, ScanOptions, scan_for_devices};
pub use util::{format_peripheral_id, with_timeout};

pub use halo_types::{
    ConnectionState, DeviceKind, DeviceRecord, DeviceStatusUpdate, EnrichedDevice,
    ScannedCandidate,
};
