//! Connection reconciliation engine.
//!
//! The engine consumes [`RadioEvent`]s, cross-references the paired-device
//! store and keeps a per-device link state:
//!
//! ```text
//! Discovered -> Connecting -> Connected <-> Disconnected
//! ```
//!
//! Unpaired devices that pass the product-name filter become scan
//! candidates. Paired devices are connected automatically when they
//! advertise; a failed connect leaves them `Discovered` until the next
//! advertisement. Every transition is published through the
//! [`EventDispatcher`] together with a fresh status snapshot.
//!
//! The tracked-device map doubles as the disconnect-listener registry:
//! an entry enters `Connected` when its link comes up and leaves it on the
//! first disconnect event. Further disconnect events for the same link are
//! no-ops, so a disconnect may be reported twice without side effects.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use halo_store::Store;
use halo_types::uuids::{FORGET_NETWORK_COMMAND, PROVISIONING_SERVICE, ROLE};
use halo_types::{
    CandidateList, ConnectionState, DEFAULT_PRODUCT_MARKER, DeviceKind, DeviceRecord,
    DeviceStatusUpdate, EnrichedDevice, ScannedCandidate, UNPAIRED_ROLE, matches_product_name,
};

use crate::broadcast::{merge_view, start_status_ticker};
use crate::error::{Error, Result};
use crate::events::{EventDispatcher, EventReceiver, HostEvent};
use crate::pairing::{PairingDriver, PairingRequest, PairingTimeouts};
use crate::radio::{AdapterState, Advertisement, RadioAdapter, RadioEvent, find_characteristic};
use crate::scan::ScanFilter;
use crate::util::with_timeout;

/// Configuration for the reconciliation engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Case-insensitive substring an advertised name must contain.
    pub product_marker: String,
    /// Report repeated advertisements from the same device.
    pub allow_duplicates: bool,
    /// Capability filter handed to the radio stack.
    pub scan_filter: ScanFilter,
    /// Period of the status snapshot ticker.
    pub status_interval: Duration,
    /// Bound on a single connect attempt.
    pub connect_timeout: Duration,
    /// Bound on every other radio operation.
    pub operation_timeout: Duration,
    /// Event channel capacity.
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            product_marker: DEFAULT_PRODUCT_MARKER.to_string(),
            allow_duplicates: true,
            scan_filter: ScanFilter::default(),
            status_interval: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(10),
            operation_timeout: Duration::from_secs(10),
            event_capacity: 100,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn product_marker(mut self, marker: impl Into<String>) -> Self {
        self.product_marker = marker.into();
        self
    }

    pub fn allow_duplicates(mut self, allow: bool) -> Self {
        self.allow_duplicates = allow;
        self
    }

    pub fn scan_filter(mut self, filter: ScanFilter) -> Self {
        self.scan_filter = filter;
        self
    }

    pub fn status_interval(mut self, interval: Duration) -> Self {
        self.status_interval = interval;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Check the configuration for values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.product_marker.trim().is_empty() {
            return Err(Error::invalid_config("product marker cannot be empty"));
        }
        if self.status_interval.is_zero() {
            return Err(Error::invalid_config("status interval must be non-zero"));
        }
        if self.connect_timeout.is_zero() || self.operation_timeout.is_zero() {
            return Err(Error::invalid_config("timeouts must be non-zero"));
        }
        if self.event_capacity == 0 {
            return Err(Error::invalid_config("event capacity must be non-zero"));
        }
        Ok(())
    }

    fn pairing_timeouts(&self) -> PairingTimeouts {
        PairingTimeouts {
            connect: self.connect_timeout,
            operation: self.operation_timeout,
        }
    }
}

/// Link state of a tracked device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkPhase {
    Discovered,
    Connecting,
    Connected,
    Disconnected,
}

#[derive(Debug, Clone)]
struct TrackedDevice {
    phase: LinkPhase,
    name: String,
    kind: DeviceKind,
    rssi: i16,
}

/// Result of handling one discovery event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryOutcome {
    /// Name did not match the product marker, or the store was unavailable.
    Ignored,
    /// Unpaired device recorded as a scan candidate.
    Candidate,
    /// A connect for this device is already in flight.
    AlreadyConnecting,
    /// The device is already connected.
    AlreadyConnected,
    /// Auto-connect succeeded.
    Connected,
    /// Auto-connect failed; the device stays `Discovered`.
    ConnectFailed,
}

/// Result of a scan start request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStart {
    Started,
    /// The adapter is not powered; the scan starts once it reports ready.
    Deferred,
}

/// Result of a forget-network request. Never an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForgetOutcome {
    /// The forget command was written.
    Sent,
    /// The device could not be reached; nothing was sent.
    Unreachable,
    /// The device was reached but the command could not be written.
    Failed,
}

/// Scan lifecycle summary for health reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanStatus {
    pub scanning: bool,
    pub deferred: bool,
    pub candidates: usize,
}

struct Inner {
    adapter: Arc<dyn RadioAdapter>,
    store: Arc<Mutex<Store>>,
    events: EventDispatcher,
    config: EngineConfig,
    devices: RwLock<HashMap<String, TrackedDevice>>,
    candidates: RwLock<CandidateList>,
    scan_hint: RwLock<Option<DeviceKind>>,
    scan_deferred: AtomicBool,
    lifecycle: Mutex<Option<CancellationToken>>,
}

/// The reconciliation engine.
///
/// Cheap to clone; clones share state.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use tokio::sync::Mutex;
/// use halo_core::{BleAdapter, EngineConfig, ReconciliationEngine};
/// use halo_store::Store;
///
/// # async fn example() -> halo_core::Result<()> {
/// let adapter = Arc::new(BleAdapter::new().await?);
/// let store = Arc::new(Mutex::new(Store::open_default()?));
/// let engine = ReconciliationEngine::new(adapter, store, EngineConfig::default())?;
///
/// let mut events = engine.subscribe();
/// engine.start().await;
/// engine.start_scan(None).await?;
/// while let Ok(event) = events.recv().await {
///     println!("{}", event.name());
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ReconciliationEngine {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ReconciliationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconciliationEngine")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl ReconciliationEngine {
    /// Create an engine. Nothing runs until [`start`](Self::start).
    pub fn new(
        adapter: Arc<dyn RadioAdapter>,
        store: Arc<Mutex<Store>>,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                adapter,
                store,
                events: EventDispatcher::new(config.event_capacity),
                config,
                devices: RwLock::new(HashMap::new()),
                candidates: RwLock::new(CandidateList::new()),
                scan_hint: RwLock::new(None),
                scan_deferred: AtomicBool::new(false),
                lifecycle: Mutex::new(None),
            }),
        })
    }

    /// Subscribe to outbound events.
    pub fn subscribe(&self) -> EventReceiver {
        self.inner.events.subscribe()
    }

    /// The event dispatcher.
    pub fn events(&self) -> &EventDispatcher {
        &self.inner.events
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Shared handle to the paired-device store.
    pub fn store(&self) -> Arc<Mutex<Store>> {
        Arc::clone(&self.inner.store)
    }

    // --- Lifecycle ---

    /// Start consuming radio events and the status ticker.
    ///
    /// Calling `start` on a running engine does nothing.
    pub async fn start(&self) {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        if lifecycle.is_some() {
            debug!("Engine already running");
            return;
        }
        let cancel = CancellationToken::new();

        let events = self.inner.adapter.events();
        self.spawn_event_pump(events, cancel.child_token());
        start_status_ticker(
            self.clone(),
            self.inner.config.status_interval,
            cancel.child_token(),
        );

        *lifecycle = Some(cancel);
        info!("Reconciliation engine started");
    }

    /// Stop event processing, the ticker and any scan.
    ///
    /// In-flight connects and pairings are not cancelled. Calling `stop` on
    /// a stopped engine does nothing.
    pub async fn stop(&self) {
        let Some(cancel) = self.inner.lifecycle.lock().await.take() else {
            return;
        };
        cancel.cancel();
        if let Err(e) = self.stop_scan().await {
            warn!("Failed to stop scan during shutdown: {}", e);
        }
        info!("Reconciliation engine stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.inner.lifecycle.lock().await.is_some()
    }

    fn spawn_event_pump(
        &self,
        mut events: tokio::sync::broadcast::Receiver<RadioEvent>,
        cancel: CancellationToken,
    ) {
        let engine = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = events.recv() => match event {
                        Ok(RadioEvent::Discovered(adv)) => {
                            // Connects can take seconds; keep disconnects flowing.
                            let engine = engine.clone();
                            tokio::spawn(async move {
                                engine.handle_discovery(adv).await;
                            });
                        }
                        Ok(RadioEvent::Disconnected { id }) => {
                            engine.handle_disconnect(&id).await;
                        }
                        Ok(RadioEvent::StateChanged(state)) => {
                            engine.handle_adapter_state(state).await;
                        }
                        Err(RecvError::Lagged(n)) => {
                            warn!("Radio event consumer lagged, skipped {} events", n);
                        }
                        Err(RecvError::Closed) => {
                            warn!("Radio event channel closed");
                            break;
                        }
                    }
                }
            }
            debug!("Radio event pump stopped");
        });
    }

    // --- Event handlers ---

    /// Handle one advertisement.
    #[tracing::instrument(skip(self, adv), fields(device_id = %adv.id))]
    pub async fn handle_discovery(&self, adv: Advertisement) -> DiscoveryOutcome {
        if !matches_product_name(adv.name.as_deref(), &self.inner.config.product_marker) {
            return DiscoveryOutcome::Ignored;
        }
        let name = adv.name.clone().unwrap_or_default();
        let kind = DeviceKind::from_name(&name);
        let rssi = adv.rssi.unwrap_or(0);

        let record = match self.inner.store.lock().await.get_device(&adv.id) {
            Ok(record) => record,
            Err(e) => {
                warn!(device_id = %adv.id, "Store unavailable during discovery: {}", e);
                return DiscoveryOutcome::Ignored;
            }
        };

        let Some(record) = record else {
            self.record_candidate(&adv, name, kind, rssi).await;
            return DiscoveryOutcome::Candidate;
        };

        // Claim the connect slot atomically so re-entrant discoveries no-op.
        {
            let mut devices = self.inner.devices.write().await;
            let entry = devices.entry(adv.id.clone()).or_insert(TrackedDevice {
                phase: LinkPhase::Discovered,
                name: name.clone(),
                kind,
                rssi,
            });
            entry.name = name.clone();
            entry.rssi = rssi;
            match entry.phase {
                LinkPhase::Connecting => return DiscoveryOutcome::AlreadyConnecting,
                LinkPhase::Connected => return DiscoveryOutcome::AlreadyConnected,
                LinkPhase::Discovered | LinkPhase::Disconnected => {
                    entry.phase = LinkPhase::Connecting;
                }
            }
        }

        info!(device_id = %adv.id, name = %name, role = %record.role, "Auto-connecting paired device");
        let attempt = with_timeout(
            "connect",
            self.inner.config.connect_timeout,
            self.inner.adapter.connect(&adv.id),
        )
        .await;

        match attempt {
            Ok(_) => {
                let link_up = self.inner.adapter.is_connected(&adv.id).await;
                if link_up && self.settle_connecting(&adv.id, LinkPhase::Connected).await {
                    let signal = if rssi != 0 { rssi } else { record.signal };
                    self.publish_connected(ConnectionState::connected(&record, signal))
                        .await;
                    return DiscoveryOutcome::Connected;
                }
                if self.settle_connecting(&adv.id, LinkPhase::Disconnected).await {
                    warn!(device_id = %adv.id, "Link dropped right after auto-connect");
                } else {
                    debug!(device_id = %adv.id, "Link dropped while connecting, already handled");
                }
                DiscoveryOutcome::ConnectFailed
            }
            Err(e) => {
                warn!(device_id = %adv.id, name = %name, "Auto-connect failed: {}", e);
                self.settle_connecting(&adv.id, LinkPhase::Discovered).await;
                DiscoveryOutcome::ConnectFailed
            }
        }
    }

    async fn record_candidate(&self, adv: &Advertisement, name: String, kind: DeviceKind, rssi: i16) {
        {
            let mut devices = self.inner.devices.write().await;
            let entry = devices.entry(adv.id.clone()).or_insert(TrackedDevice {
                phase: LinkPhase::Discovered,
                name: name.clone(),
                kind,
                rssi,
            });
            entry.name = name.clone();
            entry.rssi = rssi;
        }

        let hint = *self.inner.scan_hint.read().await;
        if let Some(hint) = hint
            && hint != kind
        {
            debug!(device_id = %adv.id, ?hint, ?kind, "Candidate kind differs from scan hint");
        }

        let candidate = ScannedCandidate {
            id: adv.id.clone(),
            name,
            address: adv.address.clone(),
            rssi,
            kind,
            role: UNPAIRED_ROLE.to_string(),
        };
        let is_new = self.inner.candidates.write().await.upsert(candidate.clone());
        if is_new {
            info!(device_id = %candidate.id, name = %candidate.name, kind = %kind, "Candidate found");
            self.inner
                .events
                .send(HostEvent::CandidateFound { device: candidate });
        }
    }

    /// Handle a link drop. Returns `true` if this call performed the
    /// transition; repeated calls for the same drop return `false`.
    #[tracing::instrument(skip(self))]
    pub async fn handle_disconnect(&self, id: &str) -> bool {
        let (name, kind) = {
            let mut devices = self.inner.devices.write().await;
            match devices.get_mut(id) {
                Some(entry) => match entry.phase {
                    LinkPhase::Connected | LinkPhase::Connecting => {
                        entry.phase = LinkPhase::Disconnected;
                        (entry.name.clone(), entry.kind)
                    }
                    LinkPhase::Discovered | LinkPhase::Disconnected => {
                        debug!(device_id = id, phase = ?entry.phase, "Disconnect without live link ignored");
                        return false;
                    }
                },
                None => {
                    devices.insert(
                        id.to_string(),
                        TrackedDevice {
                            phase: LinkPhase::Disconnected,
                            name: String::new(),
                            kind: DeviceKind::default(),
                            rssi: 0,
                        },
                    );
                    (String::new(), DeviceKind::default())
                }
            }
        };

        self.publish_disconnected(id, name, kind).await;
        true
    }

    async fn publish_disconnected(&self, id: &str, name: String, kind: DeviceKind) {
        let record = match self.inner.store.lock().await.get_device(id) {
            Ok(record) => record,
            Err(e) => {
                warn!(device_id = id, "Store unavailable during disconnect: {}", e);
                None
            }
        };
        let name = record
            .as_ref()
            .map(|r| r.name.clone())
            .filter(|n| !n.is_empty())
            .unwrap_or(name);

        let state = ConnectionState::disconnected(id, &name, record.as_ref(), kind);
        info!(device_id = id, name = %name, role = %state.role, "Device disconnected");
        self.inner.events.send(HostEvent::DeviceDisconnected {
            device: state.clone(),
        });
        self.inner.events.send(HostEvent::DeviceStatusUpdate {
            status: DeviceStatusUpdate::from(&state),
        });
        self.publish_snapshot().await;
    }

    async fn handle_adapter_state(&self, state: AdapterState) {
        debug!(?state, "Adapter state");
        if state != AdapterState::PoweredOn {
            return;
        }
        // Exactly one deferred attempt per registration.
        if self.inner.scan_deferred.swap(false, Ordering::SeqCst) {
            info!("Adapter ready, starting deferred scan");
            match self.try_start_scan().await {
                Ok(ScanStart::Started) => {}
                Ok(ScanStart::Deferred) => debug!("Deferred scan re-armed"),
                Err(e) => warn!("Deferred scan failed: {}", e),
            }
        }
    }

    // --- Commands ---

    /// Open a scan session.
    ///
    /// Clears the candidate list. `hint` narrows nothing on the radio side;
    /// it is kept for logging and the health view. When the adapter is not
    /// powered the scan is deferred until it reports ready.
    pub async fn start_scan(&self, hint: Option<DeviceKind>) -> Result<ScanStart> {
        self.inner.candidates.write().await.clear();
        *self.inner.scan_hint.write().await = hint;
        self.try_start_scan().await
    }

    async fn try_start_scan(&self) -> Result<ScanStart> {
        let config = &self.inner.config;
        match self
            .inner
            .adapter
            .start_scan(&config.scan_filter, config.allow_duplicates)
            .await
        {
            Ok(()) => {
                info!(marker = %config.product_marker, "Scan started");
                Ok(ScanStart::Started)
            }
            Err(Error::AdapterNotReady(reason)) => {
                if !self.inner.scan_deferred.swap(true, Ordering::SeqCst) {
                    info!("Adapter not ready ({}), scan deferred", reason);
                }
                Ok(ScanStart::Deferred)
            }
            Err(e) => Err(e),
        }
    }

    /// Close the scan session. Safe to call when not scanning.
    pub async fn stop_scan(&self) -> Result<()> {
        self.inner.scan_deferred.store(false, Ordering::SeqCst);
        self.inner.candidates.write().await.clear();
        *self.inner.scan_hint.write().await = None;
        self.inner.adapter.stop_scan().await
    }

    /// Pair a peripheral.
    ///
    /// On success the record is committed and `device-paired`,
    /// `device-connected` and a snapshot are published. If the link dropped
    /// before the commit, `device-disconnected` replaces `device-connected`.
    /// On failure a `pairing-failed` event is published and the error
    /// returned.
    pub async fn pair(&self, request: PairingRequest) -> Result<DeviceRecord> {
        let id = request.id.clone();
        let previous = self.phase(&id).await;
        self.set_phase(&id, LinkPhase::Connecting).await;

        let mut driver = PairingDriver::new(
            Arc::clone(&self.inner.adapter),
            Arc::clone(&self.inner.store),
            self.inner.config.pairing_timeouts(),
        );

        match driver.run(&request).await {
            Ok(record) => {
                self.inner.candidates.write().await.remove(&id);
                {
                    let mut devices = self.inner.devices.write().await;
                    let entry = devices.entry(id.clone()).or_insert(TrackedDevice {
                        phase: LinkPhase::Connecting,
                        name: String::new(),
                        kind: record.kind,
                        rssi: 0,
                    });
                    entry.name = record.name.clone();
                    entry.kind = record.kind;
                    entry.rssi = record.signal;
                }
                self.inner.events.send(HostEvent::DevicePaired {
                    device: record.clone(),
                });

                let link_up = self.inner.adapter.is_connected(&id).await;
                if link_up && self.settle_connecting(&id, LinkPhase::Connected).await {
                    self.publish_connected(ConnectionState::connected(&record, record.signal))
                        .await;
                } else if self.settle_connecting(&id, LinkPhase::Disconnected).await {
                    warn!(device_id = %id, "Link dropped before pairing commit");
                    self.publish_disconnected(&id, record.name.clone(), record.kind)
                        .await;
                } else {
                    debug!(device_id = %id, "Link dropped during pairing, already handled");
                    self.publish_snapshot().await;
                }
                Ok(record)
            }
            Err(e) => {
                let restored = if self.inner.adapter.is_connected(&id).await {
                    LinkPhase::Connected
                } else {
                    match previous {
                        Some(LinkPhase::Disconnected) => LinkPhase::Disconnected,
                        _ => LinkPhase::Discovered,
                    }
                };
                self.set_phase(&id, restored).await;
                self.inner.events.send(HostEvent::PairingFailed {
                    id: id.clone(),
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Remove a pairing record. Succeeds whether or not a record existed.
    ///
    /// The device itself is not told to forget its network; see
    /// [`forget_network`](Self::forget_network).
    pub async fn unpair(&self, id: &str) -> Result<bool> {
        let removed = self.inner.store.lock().await.remove_device(id)?;
        info!(device_id = id, removed, "Unpaired");
        self.publish_snapshot().await;
        Ok(removed)
    }

    /// Ask a device to forget its network credentials. Best effort.
    #[tracing::instrument(skip(self))]
    pub async fn forget_network(&self, id: &str) -> ForgetOutcome {
        if self.inner.adapter.advertisement(id).await.is_none() {
            warn!(device_id = id, "Forget-network target unknown to the radio stack");
            return ForgetOutcome::Unreachable;
        }
        let adapter = &self.inner.adapter;
        let op = self.inner.config.operation_timeout;

        let handle = match with_timeout("connect", self.inner.config.connect_timeout, adapter.connect(id)).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!(device_id = id, "Forget-network target unreachable: {}", e);
                return ForgetOutcome::Unreachable;
            }
        };

        let chars = match with_timeout(
            "discover provisioning service",
            op,
            adapter.discover_characteristics(&handle, PROVISIONING_SERVICE, &[ROLE]),
        )
        .await
        {
            Ok(chars) => chars,
            Err(e) => {
                warn!(device_id = id, "Forget-network discovery failed: {}", e);
                return ForgetOutcome::Failed;
            }
        };
        let Some(role_ch) = find_characteristic(&chars, ROLE) else {
            warn!(device_id = id, "Forget-network: role characteristic missing");
            return ForgetOutcome::Failed;
        };

        match with_timeout(
            "write forget command",
            op,
            adapter.write(&handle, &role_ch, &[FORGET_NETWORK_COMMAND], false),
        )
        .await
        {
            Ok(()) => {
                info!(device_id = id, "Forget-network command sent");
                ForgetOutcome::Sent
            }
            Err(e) => {
                warn!(device_id = id, "Forget-network write failed: {}", e);
                ForgetOutcome::Failed
            }
        }
    }

    // --- Queries ---

    /// The enriched paired-device list.
    pub async fn paired_devices(&self) -> Result<Vec<EnrichedDevice>> {
        let records = self.inner.store.lock().await.list_devices()?;
        let connected = self.inner.adapter.connected_ids().await;
        Ok(merge_view(records, &connected))
    }

    /// Candidates seen during the current scan session.
    pub async fn scanned_devices(&self) -> Vec<ScannedCandidate> {
        self.inner.candidates.read().await.to_vec()
    }

    /// Link phase of a tracked device.
    pub async fn phase(&self, id: &str) -> Option<LinkPhase> {
        self.inner.devices.read().await.get(id).map(|d| d.phase)
    }

    /// Number of devices currently tracked as connected.
    pub async fn connected_count(&self) -> usize {
        self.inner
            .devices
            .read()
            .await
            .values()
            .filter(|d| d.phase == LinkPhase::Connected)
            .count()
    }

    pub async fn scan_status(&self) -> ScanStatus {
        ScanStatus {
            scanning: self.inner.adapter.is_scanning().await,
            deferred: self.inner.scan_deferred.load(Ordering::SeqCst),
            candidates: self.inner.candidates.read().await.len(),
        }
    }

    /// Recompute the enriched list and publish it as a snapshot.
    pub async fn broadcast_status(&self) -> Result<Vec<EnrichedDevice>> {
        let devices = self.paired_devices().await?;
        self.inner.events.send(HostEvent::ConnectionStatusSnapshot {
            devices: devices.clone(),
        });
        Ok(devices)
    }

    // --- Helpers ---

    async fn set_phase(&self, id: &str, phase: LinkPhase) {
        let mut devices = self.inner.devices.write().await;
        match devices.get_mut(id) {
            Some(entry) => entry.phase = phase,
            None => {
                devices.insert(
                    id.to_string(),
                    TrackedDevice {
                        phase,
                        name: String::new(),
                        kind: DeviceKind::default(),
                        rssi: 0,
                    },
                );
            }
        }
    }

    /// Move `id` out of `Connecting`. Returns `false` when another flow
    /// already moved it, e.g. a disconnect that arrived mid-connect.
    async fn settle_connecting(&self, id: &str, phase: LinkPhase) -> bool {
        let mut devices = self.inner.devices.write().await;
        match devices.get_mut(id) {
            Some(entry) if entry.phase == LinkPhase::Connecting => {
                entry.phase = phase;
                true
            }
            _ => false,
        }
    }

    async fn publish_connected(&self, state: ConnectionState) {
        info!(device_id = %state.id, name = %state.name, role = %state.role, "Device connected");
        self.inner.events.send(HostEvent::DeviceStatusUpdate {
            status: DeviceStatusUpdate::from(&state),
        });
        self.inner
            .events
            .send(HostEvent::DeviceConnected { device: state });
        self.publish_snapshot().await;
    }

    async fn publish_snapshot(&self) {
        if let Err(e) = self.broadcast_status().await {
            warn!("Failed to publish status snapshot: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockAdapter;

    fn engine_with(adapter: Arc<MockAdapter>) -> ReconciliationEngine {
        let store = Arc::new(Mutex::new(Store::open_in_memory().unwrap()));
        ReconciliationEngine::new(adapter, store, EngineConfig::default()).unwrap()
    }

    fn adv(id: &str, name: &str) -> Advertisement {
        Advertisement {
            id: id.to_string(),
            name: Some(name.to_string()),
            address: String::new(),
            rssi: Some(-60),
        }
    }

    #[test]
    fn test_config_validation() {
        assert!(EngineConfig::default().validate().is_ok());
        assert!(EngineConfig::new().product_marker(" ").validate().is_err());
        assert!(
            EngineConfig::new()
                .status_interval(Duration::ZERO)
                .validate()
                .is_err()
        );
        assert!(
            EngineConfig::new()
                .connect_timeout(Duration::ZERO)
                .validate()
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_non_matching_name_is_ignored() {
        let adapter = Arc::new(MockAdapter::new());
        let engine = engine_with(adapter);
        let outcome = engine.handle_discovery(adv("x", "JBL Flip")).await;
        assert_eq!(outcome, DiscoveryOutcome::Ignored);
        assert_eq!(engine.phase("x").await, None);
    }

    #[tokio::test]
    async fn test_unknown_disconnect_is_tracked_once() {
        let adapter = Arc::new(MockAdapter::new());
        let engine = engine_with(adapter);
        assert!(engine.handle_disconnect("ghost").await);
        assert!(!engine.handle_disconnect("ghost").await);
        assert_eq!(engine.phase("ghost").await, Some(LinkPhase::Disconnected));
    }

    #[tokio::test]
    async fn test_start_stop_idempotent() {
        let adapter = Arc::new(MockAdapter::new());
        let engine = engine_with(adapter);
        engine.start().await;
        engine.start().await;
        assert!(engine.is_running().await);
        engine.stop().await;
        engine.stop().await;
        assert!(!engine.is_running().await);
    }

    #[tokio::test]
    async fn test_stop_scan_clears_candidates() {
        let adapter = Arc::new(MockAdapter::new());
        let engine = engine_with(adapter);
        engine.start_scan(None).await.unwrap();
        engine.handle_discovery(adv("a", "HALO Shoe")).await;
        assert_eq!(engine.scanned_devices().await.len(), 1);

        engine.stop_scan().await.unwrap();
        assert!(engine.scanned_devices().await.is_empty());
        engine.stop_scan().await.unwrap();
    }
}
