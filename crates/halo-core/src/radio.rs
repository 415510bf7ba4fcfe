//! Radio adapter abstraction.
//!
//! This module provides the [`RadioAdapter`] trait that abstracts over the
//! platform BLE central stack ([`crate::ble::BleAdapter`]) and the scripted
//! adapter used in tests ([`crate::mock::MockAdapter`]).
//!
//! Adapters publish discovery, disconnect and power-state changes as
//! [`RadioEvent`]s on a broadcast channel. Duplicate advertisements are
//! expected; de-duplication is the consumer's job.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::Result;
use crate::scan::ScanFilter;

/// One advertisement sighting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    /// Radio-layer peripheral identifier.
    pub id: String,
    /// Advertised local name, if the packet carried one.
    pub name: Option<String>,
    /// Radio-layer hardware address (all zeros on macOS).
    pub address: String,
    /// Received signal strength in dBm.
    pub rssi: Option<i16>,
}

/// Power state of the radio adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    PoweredOn,
    PoweredOff,
    Unknown,
}

/// Events published by a [`RadioAdapter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioEvent {
    /// An advertisement was observed.
    Discovered(Advertisement),
    /// A previously connected peripheral's link dropped.
    Disconnected { id: String },
    /// The adapter's power state changed.
    StateChanged(AdapterState),
}

/// An established link to a peripheral.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionHandle {
    pub id: String,
}

/// A resolved GATT characteristic on a connected peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharacteristicHandle {
    pub service: Uuid,
    pub uuid: Uuid,
}

/// Find a resolved characteristic by UUID.
pub fn find_characteristic(
    handles: &[CharacteristicHandle],
    uuid: Uuid,
) -> Option<CharacteristicHandle> {
    handles.iter().copied().find(|h| h.uuid == uuid)
}

/// Trait abstracting the BLE central operations the engine needs.
///
/// The trait is object safe; the engine holds an `Arc<dyn RadioAdapter>`.
#[async_trait]
pub trait RadioAdapter: Send + Sync {
    /// Subscribe to adapter events.
    fn events(&self) -> broadcast::Receiver<RadioEvent>;

    /// Current power state.
    async fn state(&self) -> AdapterState;

    /// Begin continuous discovery.
    ///
    /// Fails with [`crate::Error::AdapterNotReady`] if the radio is not
    /// powered on. Scanning while already scanning restarts the scan.
    async fn start_scan(&self, filter: &ScanFilter, allow_duplicates: bool) -> Result<()>;

    /// Stop discovery. Safe to call when not scanning.
    async fn stop_scan(&self) -> Result<()>;

    /// Whether discovery is currently running.
    async fn is_scanning(&self) -> bool;

    /// Connect to a peripheral. Connecting to an already connected
    /// peripheral returns a handle to the existing link.
    async fn connect(&self, id: &str) -> Result<ConnectionHandle>;

    /// Resolve the given characteristics of `service`.
    ///
    /// Fails with [`crate::Error::ServiceNotFound`] when the service is
    /// absent. Characteristics the service does not expose are omitted
    /// from the result rather than failing the call.
    async fn discover_characteristics(
        &self,
        handle: &ConnectionHandle,
        service: Uuid,
        characteristics: &[Uuid],
    ) -> Result<Vec<CharacteristicHandle>>;

    /// Read a characteristic value.
    async fn read(
        &self,
        handle: &ConnectionHandle,
        characteristic: &CharacteristicHandle,
    ) -> Result<Bytes>;

    /// Write a characteristic value, with or without link-layer acknowledgement.
    async fn write(
        &self,
        handle: &ConnectionHandle,
        characteristic: &CharacteristicHandle,
        data: &[u8],
        require_ack: bool,
    ) -> Result<()>;

    /// Drop the link to a peripheral. A no-op if not connected.
    async fn disconnect(&self, id: &str) -> Result<()>;

    /// Whether the adapter holds an active link to `id`.
    async fn is_connected(&self, id: &str) -> bool;

    /// Ids of all peripherals with an active link.
    async fn connected_ids(&self) -> Vec<String>;

    /// Latest advertisement data for a peripheral the stack has seen.
    ///
    /// Returns `None` for ids the radio stack has never reported.
    async fn advertisement(&self, id: &str) -> Option<Advertisement>;
}
