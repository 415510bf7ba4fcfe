//! Pairing protocol driver.
//!
//! Pairing provisions a peripheral with network credentials and a role,
//! reads back the identity it was assigned, and commits a
//! [`DeviceRecord`]. The driver walks a fixed sequence of states:
//!
//! ```text
//! Idle -> Connecting -> DiscoveringProvisioningService -> WritingCredentials
//!      -> DiscoveringInfoService -> ReadingIdentity -> Committed
//! ```
//!
//! Any error before the commit moves the driver to `Failed` and nothing is
//! written to the store. Provisioning writes are sent without
//! acknowledgement, so a device that ignores them is not detected here.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use halo_store::Store;
use halo_types::uuids::{
    FIRMWARE_ID, HARDWARE_ADDRESS, INFO_CHARACTERISTICS, INFO_SERVICE, NETWORK_ADDRESS,
    NETWORK_NAME, NETWORK_SECRET, PROVISIONING_CHARACTERISTICS, PROVISIONING_SERVICE, ROLE,
    SIGNAL_STRENGTH,
};
use halo_types::{DeviceKind, DeviceRecord, decode_text, parse_signal};

use crate::error::{Error, Result};
use crate::radio::{CharacteristicHandle, ConnectionHandle, RadioAdapter, find_characteristic};
use crate::util::with_timeout;

/// Network credentials pushed to a device during pairing.
///
/// `Debug` redacts the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct NetworkCredentials {
    pub name: String,
    pub secret: String,
}

impl NetworkCredentials {
    pub fn new(name: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            secret: secret.into(),
        }
    }
}

impl fmt::Debug for NetworkCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkCredentials")
            .field("name", &self.name)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// A user-initiated pairing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingRequest {
    pub id: String,
    pub role: String,
    pub credentials: NetworkCredentials,
}

impl PairingRequest {
    pub fn new(id: impl Into<String>, role: impl Into<String>, credentials: NetworkCredentials) -> Self {
        Self {
            id: id.into(),
            role: role.into(),
            credentials,
        }
    }
}

/// Pairing progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingState {
    Idle,
    Connecting,
    DiscoveringProvisioningService,
    WritingCredentials,
    DiscoveringInfoService,
    ReadingIdentity,
    Committed,
    Failed,
}

/// Timeouts applied to pairing steps.
#[derive(Debug, Clone, Copy)]
pub struct PairingTimeouts {
    pub connect: Duration,
    pub operation: Duration,
}

impl Default for PairingTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            operation: Duration::from_secs(10),
        }
    }
}

/// Identity read back from the info service. Empty fields were unavailable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Identity {
    ip: String,
    address: String,
    signal: Option<i16>,
    uuid: String,
}

/// Runs one pairing attempt against a peripheral.
pub struct PairingDriver {
    adapter: Arc<dyn RadioAdapter>,
    store: Arc<Mutex<Store>>,
    timeouts: PairingTimeouts,
    state: PairingState,
}

impl PairingDriver {
    pub fn new(
        adapter: Arc<dyn RadioAdapter>,
        store: Arc<Mutex<Store>>,
        timeouts: PairingTimeouts,
    ) -> Self {
        Self {
            adapter,
            store,
            timeouts,
            state: PairingState::Idle,
        }
    }

    /// Current state of the driver.
    pub fn state(&self) -> PairingState {
        self.state
    }

    fn transition(&mut self, id: &str, next: PairingState) {
        debug!(device_id = id, from = ?self.state, to = ?next, "Pairing state");
        self.state = next;
    }

    /// Pair a peripheral and commit its record.
    ///
    /// Returns the committed record. On error no record is written; writes
    /// already delivered to the device are not rolled back.
    #[tracing::instrument(skip(self, request), fields(device_id = %request.id, role = %request.role))]
    pub async fn run(&mut self, request: &PairingRequest) -> Result<DeviceRecord> {
        let id = request.id.as_str();
        let Some(adv) = self.adapter.advertisement(id).await else {
            self.transition(id, PairingState::Failed);
            return Err(Error::PeripheralNotFound(id.to_string()));
        };
        let was_connected = self.adapter.is_connected(id).await;

        match self.provision(request).await {
            Ok(identity) => {
                let name = adv.name.unwrap_or_default();
                let record = DeviceRecord {
                    id: id.to_string(),
                    kind: DeviceKind::from_name(&name),
                    name,
                    role: request.role.clone(),
                    address: identity.address,
                    ip: identity.ip,
                    signal: identity.signal.or(adv.rssi).unwrap_or(0),
                    uuid: identity.uuid,
                };

                let committed = self.store.lock().await.replace_device(&record);
                if let Err(e) = committed {
                    self.transition(id, PairingState::Failed);
                    return Err(e.into());
                }
                self.transition(id, PairingState::Committed);
                info!(device_id = id, name = %record.name, "Pairing committed");
                Ok(record)
            }
            Err(e) => {
                self.transition(id, PairingState::Failed);
                warn!(device_id = id, "Pairing failed: {}", e);
                if !was_connected && let Err(err) = self.adapter.disconnect(id).await {
                    debug!(device_id = id, "Disconnect after failed pairing failed: {}", err);
                }
                Err(e)
            }
        }
    }

    async fn provision(&mut self, request: &PairingRequest) -> Result<Identity> {
        let id = request.id.as_str();
        let adapter = Arc::clone(&self.adapter);
        let op = self.timeouts.operation;

        self.transition(id, PairingState::Connecting);
        let handle = with_timeout("connect", self.timeouts.connect, adapter.connect(id)).await?;

        self.transition(id, PairingState::DiscoveringProvisioningService);
        let chars = with_timeout(
            "discover provisioning service",
            op,
            adapter.discover_characteristics(&handle, PROVISIONING_SERVICE, &PROVISIONING_CHARACTERISTICS),
        )
        .await?;
        let name_ch = require(&chars, id, NETWORK_NAME)?;
        let secret_ch = require(&chars, id, NETWORK_SECRET)?;
        let role_ch = require(&chars, id, ROLE)?;

        self.transition(id, PairingState::WritingCredentials);
        let writes = [
            (name_ch, request.credentials.name.as_bytes()),
            (secret_ch, request.credentials.secret.as_bytes()),
            (role_ch, request.role.as_bytes()),
        ];
        for (ch, data) in writes {
            with_timeout("write credentials", op, adapter.write(&handle, &ch, data, false)).await?;
        }
        info!(device_id = id, network = %request.credentials.name, "Credentials written");

        self.transition(id, PairingState::DiscoveringInfoService);
        let info = with_timeout(
            "discover info service",
            op,
            adapter.discover_characteristics(&handle, INFO_SERVICE, &INFO_CHARACTERISTICS),
        )
        .await?;

        self.transition(id, PairingState::ReadingIdentity);
        let identity = Identity {
            ip: self
                .read_text(&handle, &info, NETWORK_ADDRESS)
                .await
                .unwrap_or_default(),
            address: self
                .read_text(&handle, &info, HARDWARE_ADDRESS)
                .await
                .unwrap_or_default(),
            signal: self
                .read_optional(&handle, &info, SIGNAL_STRENGTH)
                .await
                .and_then(|raw| parse_signal(&raw)),
            uuid: self
                .read_text(&handle, &info, FIRMWARE_ID)
                .await
                .unwrap_or_default(),
        };
        debug!(device_id = id, ?identity, "Identity read back");
        Ok(identity)
    }

    async fn read_text(
        &self,
        handle: &ConnectionHandle,
        chars: &[CharacteristicHandle],
        uuid: uuid::Uuid,
    ) -> Option<String> {
        self.read_optional(handle, chars, uuid)
            .await
            .map(|raw| decode_text(&raw))
    }

    /// Read an info characteristic; absence or failure yields `None`.
    async fn read_optional(
        &self,
        handle: &ConnectionHandle,
        chars: &[CharacteristicHandle],
        uuid: uuid::Uuid,
    ) -> Option<Vec<u8>> {
        let Some(ch) = find_characteristic(chars, uuid) else {
            debug!(device_id = %handle.id, %uuid, "Info characteristic absent");
            return None;
        };
        match with_timeout("read identity", self.timeouts.operation, self.adapter.read(handle, &ch)).await {
            Ok(bytes) => Some(bytes.to_vec()),
            Err(e) => {
                warn!(device_id = %handle.id, %uuid, "Info read failed, using fallback: {}", e);
                None
            }
        }
    }
}

fn require(chars: &[CharacteristicHandle], id: &str, uuid: uuid::Uuid) -> Result<CharacteristicHandle> {
    find_characteristic(chars, uuid).ok_or_else(|| Error::characteristic_not_found(id, uuid))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockAdapter;

    fn setup() -> (Arc<MockAdapter>, Arc<Mutex<Store>>) {
        let adapter = Arc::new(MockAdapter::new());
        adapter.add_peripheral("abc123", "HALO Shoe-42", -58);
        let store = Arc::new(Mutex::new(Store::open_in_memory().unwrap()));
        (adapter, store)
    }

    fn request(role: &str) -> PairingRequest {
        PairingRequest::new("abc123", role, NetworkCredentials::new("NET", "pw"))
    }

    #[test]
    fn test_credentials_debug_redacts_secret() {
        let debug = format!("{:?}", NetworkCredentials::new("NET", "hunter2"));
        assert!(debug.contains("NET"));
        assert!(!debug.contains("hunter2"));
    }

    #[tokio::test]
    async fn test_pair_writes_in_order_without_ack() {
        let (adapter, store) = setup();
        let mut driver = PairingDriver::new(adapter.clone(), store, PairingTimeouts::default());

        let record = driver.run(&request("L")).await.unwrap();
        assert_eq!(driver.state(), PairingState::Committed);
        assert_eq!(record.role, "L");

        let writes = adapter.writes_to("abc123");
        let order: Vec<_> = writes.iter().map(|w| w.characteristic).collect();
        assert_eq!(order, [NETWORK_NAME, NETWORK_SECRET, ROLE]);
        assert_eq!(writes[0].data, b"NET");
        assert_eq!(writes[1].data, b"pw");
        assert_eq!(writes[2].data, b"L");
        assert!(writes.iter().all(|w| !w.require_ack));
    }

    #[tokio::test]
    async fn test_identity_fallbacks() {
        let (adapter, store) = setup();
        adapter.set_characteristic("abc123", INFO_SERVICE, HARDWARE_ADDRESS, b"AA:BB:CC");
        adapter.set_characteristic("abc123", INFO_SERVICE, SIGNAL_STRENGTH, b"72");
        let mut driver = PairingDriver::new(adapter, store.clone(), PairingTimeouts::default());

        let record = driver.run(&request("L")).await.unwrap();
        assert_eq!(record.address, "AA:BB:CC");
        assert_eq!(record.signal, 72);
        assert_eq!(record.uuid, "");
        assert_eq!(record.ip, "");
        assert_eq!(store.lock().await.get_device("abc123").unwrap(), Some(record));
    }

    #[tokio::test]
    async fn test_zero_signal_falls_back_to_rssi() {
        let (adapter, store) = setup();
        adapter.set_characteristic("abc123", INFO_SERVICE, SIGNAL_STRENGTH, b"0");
        adapter.set_characteristic("abc123", INFO_SERVICE, NETWORK_ADDRESS, b"10.0.0.9");
        adapter.fail_read("abc123", NETWORK_ADDRESS);
        let mut driver = PairingDriver::new(adapter, store, PairingTimeouts::default());

        let record = driver.run(&request("R")).await.unwrap();
        assert_eq!(record.signal, -58);
        assert_eq!(record.ip, "");
    }

    #[tokio::test]
    async fn test_write_failure_commits_nothing() {
        let (adapter, store) = setup();
        adapter.fail_write("abc123", NETWORK_SECRET);
        let mut driver = PairingDriver::new(adapter.clone(), store.clone(), PairingTimeouts::default());

        let err = driver.run(&request("L")).await.unwrap_err();
        assert!(err.is_io());
        assert_eq!(driver.state(), PairingState::Failed);
        assert!(store.lock().await.list_devices().unwrap().is_empty());
        assert!(!adapter.is_connected("abc123").await);
    }

    #[tokio::test]
    async fn test_missing_provisioning_characteristic_is_protocol_error() {
        let (adapter, store) = setup();
        adapter.remove_characteristic("abc123", PROVISIONING_SERVICE, ROLE);
        let mut driver = PairingDriver::new(adapter.clone(), store.clone(), PairingTimeouts::default());

        let err = driver.run(&request("L")).await.unwrap_err();
        assert!(err.is_protocol());
        assert!(adapter.writes().is_empty());
        assert!(store.lock().await.list_devices().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_peripheral_never_connects() {
        let (adapter, store) = setup();
        let mut driver = PairingDriver::new(adapter.clone(), store, PairingTimeouts::default());

        let req = PairingRequest::new("ghost", "L", NetworkCredentials::new("NET", "pw"));
        let err = driver.run(&req).await.unwrap_err();
        assert!(matches!(err, Error::PeripheralNotFound(_)));
        assert_eq!(adapter.connect_attempts("ghost"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout() {
        let (adapter, store) = setup();
        adapter.set_connect_latency("abc123", Duration::from_secs(60));
        let timeouts = PairingTimeouts {
            connect: Duration::from_secs(2),
            operation: Duration::from_secs(2),
        };
        let mut driver = PairingDriver::new(adapter, store.clone(), timeouts);

        let err = driver.run(&request("L")).await.unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
        assert!(store.lock().await.list_devices().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_gun_kind_inferred_from_name() {
        let (adapter, store) = setup();
        adapter.add_peripheral("g1", "HALO GUN Alpha", -40);
        let mut driver = PairingDriver::new(adapter, store, PairingTimeouts::default());

        let req = PairingRequest::new("g1", "primary", NetworkCredentials::new("NET", "pw"));
        let record = driver.run(&req).await.unwrap();
        assert_eq!(record.kind, DeviceKind::Gun);
        assert_eq!(record.role, "primary");
    }
}
