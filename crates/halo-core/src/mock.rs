//! Mock radio adapter for testing.
//!
//! This module provides a scripted [`RadioAdapter`] that can be used for
//! unit and integration testing without BLE hardware.
//!
//! # Features
//!
//! - **Scripted GATT tables**: each peripheral exposes the provisioning
//!   service; info characteristics and extra services can be added
//! - **Failure injection**: fail connects, reads or writes per peripheral
//! - **Latency simulation**: delay connects to open race windows
//! - **Link control**: drop links and toggle adapter power from the test
//! - **Recording**: every connect attempt and write is recorded

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::broadcast;
use uuid::Uuid;

use halo_types::uuids::{NETWORK_NAME, NETWORK_SECRET, PROVISIONING_SERVICE, ROLE};

use crate::error::{Error, Result};
use crate::radio::{
    AdapterState, Advertisement, CharacteristicHandle, ConnectionHandle, RadioAdapter, RadioEvent,
};
use crate::scan::ScanFilter;

/// A write observed by the mock adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockWrite {
    pub device_id: String,
    pub characteristic: Uuid,
    pub data: Vec<u8>,
    pub require_ack: bool,
}

#[derive(Debug, Clone)]
struct MockPeripheral {
    name: Option<String>,
    address: String,
    rssi: i16,
    /// service -> characteristic -> readable value (`None` for write-only)
    services: HashMap<Uuid, HashMap<Uuid, Option<Bytes>>>,
    connected: bool,
    connect_failure: Option<String>,
    connect_latency: Duration,
    read_failures: HashSet<Uuid>,
    write_failures: HashSet<Uuid>,
    connect_attempts: u32,
}

impl MockPeripheral {
    fn new(name: Option<String>, rssi: i16) -> Self {
        let mut provisioning = HashMap::new();
        for uuid in [NETWORK_NAME, NETWORK_SECRET, ROLE] {
            provisioning.insert(uuid, None);
        }
        let mut services = HashMap::new();
        services.insert(PROVISIONING_SERVICE, provisioning);

        Self {
            name,
            address: "00:00:00:00:00:00".to_string(),
            rssi,
            services,
            connected: false,
            connect_failure: None,
            connect_latency: Duration::ZERO,
            read_failures: HashSet::new(),
            write_failures: HashSet::new(),
            connect_attempts: 0,
        }
    }

    fn advertisement(&self, id: &str) -> Advertisement {
        Advertisement {
            id: id.to_string(),
            name: self.name.clone(),
            address: self.address.clone(),
            rssi: Some(self.rssi),
        }
    }
}

/// A scripted radio adapter.
///
/// Implements [`RadioAdapter`] so it can be handed to the engine in place
/// of the platform adapter.
///
/// # Example
///
/// ```
/// use halo_core::mock::MockAdapter;
/// use halo_core::radio::RadioAdapter;
/// use halo_core::scan::ScanFilter;
///
/// #[tokio::main]
/// async fn main() {
///     let adapter = MockAdapter::new();
///     adapter.add_peripheral("abc123", "HALO Shoe-42", -60);
///
///     let mut events = adapter.events();
///     adapter.start_scan(&ScanFilter::default(), true).await.unwrap();
///     assert!(adapter.advertise("abc123"));
///     assert!(events.recv().await.is_ok());
/// }
/// ```
pub struct MockAdapter {
    peripherals: Mutex<HashMap<String, MockPeripheral>>,
    writes: Mutex<Vec<MockWrite>>,
    events: broadcast::Sender<RadioEvent>,
    state: Mutex<AdapterState>,
    scanning: AtomicBool,
    scan_starts: AtomicU32,
}

impl std::fmt::Debug for MockAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockAdapter")
            .field("state", &*self.state.lock().unwrap_or_else(PoisonError::into_inner))
            .field("scanning", &self.scanning.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for MockAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAdapter {
    /// Create a powered-on adapter with no peripherals.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            peripherals: Mutex::new(HashMap::new()),
            writes: Mutex::new(Vec::new()),
            events,
            state: Mutex::new(AdapterState::PoweredOn),
            scanning: AtomicBool::new(false),
            scan_starts: AtomicU32::new(0),
        }
    }

    fn peripherals(&self) -> MutexGuard<'_, HashMap<String, MockPeripheral>> {
        self.peripherals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn with_peripheral<T>(&self, id: &str, f: impl FnOnce(&mut MockPeripheral) -> T) -> Option<T> {
        self.peripherals().get_mut(id).map(f)
    }

    // --- Scripting ---

    /// Register a peripheral exposing the provisioning service.
    pub fn add_peripheral(&self, id: &str, name: &str, rssi: i16) {
        self.peripherals()
            .insert(id.to_string(), MockPeripheral::new(Some(name.to_string()), rssi));
    }

    /// Register a peripheral whose advertisements carry no name.
    pub fn add_unnamed_peripheral(&self, id: &str, rssi: i16) {
        self.peripherals()
            .insert(id.to_string(), MockPeripheral::new(None, rssi));
    }

    /// Set the radio-layer hardware address reported in advertisements.
    pub fn set_address(&self, id: &str, address: &str) {
        self.with_peripheral(id, |p| p.address = address.to_string());
    }

    /// Add or replace a readable characteristic value.
    pub fn set_characteristic(&self, id: &str, service: Uuid, uuid: Uuid, value: &[u8]) {
        self.with_peripheral(id, |p| {
            p.services
                .entry(service)
                .or_default()
                .insert(uuid, Some(Bytes::copy_from_slice(value)));
        });
    }

    /// Remove a characteristic from a service.
    pub fn remove_characteristic(&self, id: &str, service: Uuid, uuid: Uuid) {
        self.with_peripheral(id, |p| {
            if let Some(chars) = p.services.get_mut(&service) {
                chars.remove(&uuid);
            }
        });
    }

    /// Remove a whole service (firmware mismatch).
    pub fn remove_service(&self, id: &str, service: Uuid) {
        self.with_peripheral(id, |p| {
            p.services.remove(&service);
        });
    }

    /// Make connects to `id` fail with `reason`, or succeed again with `None`.
    pub fn fail_connect(&self, id: &str, reason: Option<&str>) {
        self.with_peripheral(id, |p| p.connect_failure = reason.map(str::to_string));
    }

    /// Delay every connect to `id`.
    pub fn set_connect_latency(&self, id: &str, latency: Duration) {
        self.with_peripheral(id, |p| p.connect_latency = latency);
    }

    /// Make writes to one characteristic of `id` fail.
    pub fn fail_write(&self, id: &str, uuid: Uuid) {
        self.with_peripheral(id, |p| {
            p.write_failures.insert(uuid);
        });
    }

    /// Make reads of one characteristic of `id` fail.
    pub fn fail_read(&self, id: &str, uuid: Uuid) {
        self.with_peripheral(id, |p| {
            p.read_failures.insert(uuid);
        });
    }

    /// Change the adapter power state and publish the change.
    pub fn set_powered(&self, powered: bool) {
        self.set_state(if powered {
            AdapterState::PoweredOn
        } else {
            AdapterState::PoweredOff
        });
    }

    /// Set the adapter state and publish the change. Any state other than
    /// powered-on stops scanning.
    pub fn set_state(&self, state: AdapterState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
        if state != AdapterState::PoweredOn {
            self.scanning.store(false, Ordering::SeqCst);
        }
        let _ = self.events.send(RadioEvent::StateChanged(state));
    }

    /// Set the initial adapter state without publishing a change, as a
    /// stack that has not reported its power state yet.
    pub fn with_state(self, state: AdapterState) -> Self {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
        self
    }

    fn current_state(&self) -> AdapterState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // --- Event injection ---

    /// Publish an advertisement for a registered peripheral.
    ///
    /// Returns `false` (and publishes nothing) when not scanning or the
    /// peripheral is unknown.
    pub fn advertise(&self, id: &str) -> bool {
        if !self.scanning.load(Ordering::SeqCst) {
            return false;
        }
        let Some(adv) = self.with_peripheral(id, |p| p.advertisement(id)) else {
            return false;
        };
        let _ = self.events.send(RadioEvent::Discovered(adv));
        true
    }

    /// Update the advertised RSSI and publish an advertisement.
    pub fn advertise_with_rssi(&self, id: &str, rssi: i16) -> bool {
        self.with_peripheral(id, |p| p.rssi = rssi);
        self.advertise(id)
    }

    /// Drop the link to `id` as if the device went out of range.
    pub fn drop_link(&self, id: &str) {
        let was_connected = self
            .with_peripheral(id, |p| std::mem::replace(&mut p.connected, false))
            .unwrap_or(false);
        if was_connected {
            let _ = self.events.send(RadioEvent::Disconnected { id: id.to_string() });
        }
    }

    /// Publish an arbitrary event.
    pub fn emit(&self, event: RadioEvent) {
        let _ = self.events.send(event);
    }

    // --- Inspection ---

    /// Number of connect attempts made to `id`.
    pub fn connect_attempts(&self, id: &str) -> u32 {
        self.with_peripheral(id, |p| p.connect_attempts)
            .unwrap_or(0)
    }

    /// Number of times scanning was started.
    pub fn scan_starts(&self) -> u32 {
        self.scan_starts.load(Ordering::SeqCst)
    }

    /// All writes, in order.
    pub fn writes(&self) -> Vec<MockWrite> {
        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Writes made to `id`, in order.
    pub fn writes_to(&self, id: &str) -> Vec<MockWrite> {
        self.writes()
            .into_iter()
            .filter(|w| w.device_id == id)
            .collect()
    }

    fn check_link(&self, handle: &ConnectionHandle) -> Result<()> {
        let connected = self
            .with_peripheral(&handle.id, |p| p.connected)
            .unwrap_or(false);
        if connected {
            Ok(())
        } else {
            Err(Error::NotConnected(handle.id.clone()))
        }
    }
}

#[async_trait]
impl RadioAdapter for MockAdapter {
    fn events(&self) -> broadcast::Receiver<RadioEvent> {
        self.events.subscribe()
    }

    async fn state(&self) -> AdapterState {
        self.current_state()
    }

    async fn start_scan(&self, _filter: &ScanFilter, _allow_duplicates: bool) -> Result<()> {
        let state = self.current_state();
        if state != AdapterState::PoweredOn {
            return Err(Error::AdapterNotReady(format!("adapter state {state:?}")));
        }
        self.scanning.store(true, Ordering::SeqCst);
        self.scan_starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        self.scanning.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::SeqCst)
    }

    async fn connect(&self, id: &str) -> Result<ConnectionHandle> {
        let latency = self
            .with_peripheral(id, |p| {
                p.connect_attempts += 1;
                p.connect_latency
            })
            .ok_or_else(|| Error::PeripheralNotFound(id.to_string()))?;

        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if self.current_state() != AdapterState::PoweredOn {
            return Err(Error::AdapterNotReady("adapter powered off".to_string()));
        }

        let outcome = self
            .with_peripheral(id, |p| match &p.connect_failure {
                Some(reason) => Err(Error::connection_failed(id, reason.clone())),
                None => {
                    p.connected = true;
                    Ok(())
                }
            })
            .unwrap_or_else(|| Err(Error::PeripheralNotFound(id.to_string())));
        outcome?;

        Ok(ConnectionHandle { id: id.to_string() })
    }

    async fn discover_characteristics(
        &self,
        handle: &ConnectionHandle,
        service: Uuid,
        characteristics: &[Uuid],
    ) -> Result<Vec<CharacteristicHandle>> {
        self.check_link(handle)?;
        self.with_peripheral(&handle.id, |p| {
            let chars = p
                .services
                .get(&service)
                .ok_or_else(|| Error::service_not_found(&handle.id, service))?;
            Ok(characteristics
                .iter()
                .filter(|uuid| chars.contains_key(uuid))
                .map(|uuid| CharacteristicHandle {
                    service,
                    uuid: *uuid,
                })
                .collect())
        })
        .unwrap_or_else(|| Err(Error::PeripheralNotFound(handle.id.clone())))
    }

    async fn read(
        &self,
        handle: &ConnectionHandle,
        characteristic: &CharacteristicHandle,
    ) -> Result<Bytes> {
        self.check_link(handle)?;
        self.with_peripheral(&handle.id, |p| {
            if p.read_failures.contains(&characteristic.uuid) {
                return Err(Error::read_failed(characteristic.uuid, "injected failure"));
            }
            p.services
                .get(&characteristic.service)
                .and_then(|chars| chars.get(&characteristic.uuid))
                .cloned()
                .flatten()
                .ok_or_else(|| Error::read_failed(characteristic.uuid, "not readable"))
        })
        .unwrap_or_else(|| Err(Error::PeripheralNotFound(handle.id.clone())))
    }

    async fn write(
        &self,
        handle: &ConnectionHandle,
        characteristic: &CharacteristicHandle,
        data: &[u8],
        require_ack: bool,
    ) -> Result<()> {
        self.check_link(handle)?;
        let failing = self
            .with_peripheral(&handle.id, |p| p.write_failures.contains(&characteristic.uuid))
            .unwrap_or(false);
        if failing {
            return Err(Error::write_failed(characteristic.uuid, "injected failure"));
        }
        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(MockWrite {
                device_id: handle.id.clone(),
                characteristic: characteristic.uuid,
                data: data.to_vec(),
                require_ack,
            });
        Ok(())
    }

    async fn disconnect(&self, id: &str) -> Result<()> {
        self.drop_link(id);
        Ok(())
    }

    async fn is_connected(&self, id: &str) -> bool {
        self.with_peripheral(id, |p| p.connected).unwrap_or(false)
    }

    async fn connected_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .peripherals()
            .iter()
            .filter(|(_, p)| p.connected)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    async fn advertisement(&self, id: &str) -> Option<Advertisement> {
        self.with_peripheral(id, |p| p.advertisement(id))
    }
}
