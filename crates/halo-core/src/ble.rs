//! Platform BLE adapter built on btleplug.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CentralState, Characteristic, Manager as _, Peripheral as _,
    ScanFilter as BtScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::{RwLock, broadcast};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::radio::{
    AdapterState, Advertisement, CharacteristicHandle, ConnectionHandle, RadioAdapter, RadioEvent,
};
use crate::scan::ScanFilter;
use crate::util::format_peripheral_id;

/// Get the first available Bluetooth adapter.
pub async fn get_adapter() -> Result<Adapter> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;

    adapters
        .into_iter()
        .next()
        .ok_or_else(|| Error::AdapterNotReady("no Bluetooth adapter available".to_string()))
}

type PeripheralCache = Arc<RwLock<HashMap<String, Peripheral>>>;

/// [`RadioAdapter`] over the host's BLE central stack.
///
/// A background task translates btleplug central events into
/// [`RadioEvent`]s. The task stops when the adapter is dropped.
pub struct BleAdapter {
    adapter: Adapter,
    peripherals: PeripheralCache,
    events: broadcast::Sender<RadioEvent>,
    scanning: AtomicBool,
    allow_duplicates: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl BleAdapter {
    /// Open the first available adapter.
    pub async fn new() -> Result<Self> {
        let adapter = get_adapter().await?;
        Self::with_adapter(adapter).await
    }

    /// Wrap an already opened adapter.
    pub async fn with_adapter(adapter: Adapter) -> Result<Self> {
        let (events, _) = broadcast::channel(256);
        let peripherals: PeripheralCache = Arc::new(RwLock::new(HashMap::new()));
        let allow_duplicates = Arc::new(AtomicBool::new(true));
        let cancel = CancellationToken::new();

        let stream = adapter.events().await?;
        let pump = EventPump {
            adapter: adapter.clone(),
            peripherals: Arc::clone(&peripherals),
            events: events.clone(),
            allow_duplicates: Arc::clone(&allow_duplicates),
        };
        let token = cancel.clone();
        tokio::spawn(async move {
            let mut stream = stream;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    event = stream.next() => match event {
                        Some(event) => pump.handle(event).await,
                        None => {
                            warn!("BLE event stream ended");
                            break;
                        }
                    }
                }
            }
            debug!("BLE event pump stopped");
        });

        info!("BLE adapter ready");
        Ok(Self {
            adapter,
            peripherals,
            events,
            scanning: AtomicBool::new(false),
            allow_duplicates,
            cancel,
        })
    }

    async fn peripheral(&self, id: &str) -> Result<Peripheral> {
        if let Some(p) = self.peripherals.read().await.get(id) {
            return Ok(p.clone());
        }
        for p in self.adapter.peripherals().await? {
            if format_peripheral_id(&p.id()) == id {
                self.peripherals
                    .write()
                    .await
                    .insert(id.to_string(), p.clone());
                return Ok(p);
            }
        }
        Err(Error::PeripheralNotFound(id.to_string()))
    }

    async fn find_characteristic(
        &self,
        handle: &ConnectionHandle,
        characteristic: &CharacteristicHandle,
    ) -> Result<(Peripheral, Characteristic)> {
        let peripheral = self.peripheral(&handle.id).await?;
        let found = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == characteristic.uuid && c.service_uuid == characteristic.service)
            .ok_or_else(|| Error::characteristic_not_found(&handle.id, characteristic.uuid))?;
        Ok((peripheral, found))
    }
}

impl Drop for BleAdapter {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct EventPump {
    adapter: Adapter,
    peripherals: PeripheralCache,
    events: broadcast::Sender<RadioEvent>,
    allow_duplicates: Arc<AtomicBool>,
}

impl EventPump {
    async fn handle(&self, event: CentralEvent) {
        match event {
            CentralEvent::DeviceDiscovered(pid) => self.forward_advertisement(&pid).await,
            CentralEvent::DeviceUpdated(pid) => {
                if self.allow_duplicates.load(Ordering::Relaxed) {
                    self.forward_advertisement(&pid).await;
                }
            }
            CentralEvent::DeviceDisconnected(pid) => {
                let id = format_peripheral_id(&pid);
                debug!(device_id = %id, "Link dropped");
                let _ = self.events.send(RadioEvent::Disconnected { id });
            }
            CentralEvent::StateUpdate(state) => {
                let state = map_state(state);
                info!(?state, "Adapter state changed");
                let _ = self.events.send(RadioEvent::StateChanged(state));
            }
            _ => {}
        }
    }

    async fn forward_advertisement(&self, pid: &PeripheralId) {
        let peripheral = match self.adapter.peripheral(pid).await {
            Ok(p) => p,
            Err(e) => {
                debug!("Discovered peripheral vanished: {}", e);
                return;
            }
        };
        let id = format_peripheral_id(pid);
        let props = match peripheral.properties().await {
            Ok(Some(props)) => props,
            Ok(None) => return,
            Err(e) => {
                debug!(device_id = %id, "Failed to read advertisement properties: {}", e);
                return;
            }
        };
        self.peripherals
            .write()
            .await
            .insert(id.clone(), peripheral);

        let _ = self.events.send(RadioEvent::Discovered(Advertisement {
            id,
            name: props.local_name,
            address: props.address.to_string(),
            rssi: props.rssi,
        }));
    }
}

fn map_state(state: CentralState) -> AdapterState {
    match state {
        CentralState::PoweredOn => AdapterState::PoweredOn,
        CentralState::PoweredOff => AdapterState::PoweredOff,
        _ => AdapterState::Unknown,
    }
}

#[async_trait]
impl RadioAdapter for BleAdapter {
    fn events(&self) -> broadcast::Receiver<RadioEvent> {
        self.events.subscribe()
    }

    async fn state(&self) -> AdapterState {
        match self.adapter.adapter_state().await {
            Ok(state) => map_state(state),
            Err(e) => {
                debug!("Failed to query adapter state: {}", e);
                AdapterState::Unknown
            }
        }
    }

    async fn start_scan(&self, filter: &ScanFilter, allow_duplicates: bool) -> Result<()> {
        let state = self.state().await;
        if state != AdapterState::PoweredOn {
            return Err(Error::AdapterNotReady(format!("adapter state {state:?}")));
        }
        self.allow_duplicates
            .store(allow_duplicates, Ordering::Relaxed);

        let mut bt_filter = BtScanFilter::default();
        bt_filter.services = filter.services.clone();
        self.adapter.start_scan(bt_filter).await?;
        self.scanning.store(true, Ordering::SeqCst);
        info!("BLE scan started");
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        if !self.scanning.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.adapter.stop_scan().await?;
        info!("BLE scan stopped");
        Ok(())
    }

    async fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::SeqCst)
    }

    #[tracing::instrument(skip(self), fields(device_id = %id))]
    async fn connect(&self, id: &str) -> Result<ConnectionHandle> {
        let peripheral = self.peripheral(id).await?;
        if !peripheral.is_connected().await.unwrap_or(false) {
            peripheral
                .connect()
                .await
                .map_err(|e| Error::connection_failed(id, e.to_string()))?;
        }
        Ok(ConnectionHandle { id: id.to_string() })
    }

    async fn discover_characteristics(
        &self,
        handle: &ConnectionHandle,
        service: Uuid,
        characteristics: &[Uuid],
    ) -> Result<Vec<CharacteristicHandle>> {
        let peripheral = self.peripheral(&handle.id).await?;
        peripheral.discover_services().await?;

        let services = peripheral.services();
        let found = services
            .iter()
            .find(|s| s.uuid == service)
            .ok_or_else(|| Error::service_not_found(&handle.id, service))?;

        Ok(found
            .characteristics
            .iter()
            .filter(|c| characteristics.contains(&c.uuid))
            .map(|c| CharacteristicHandle {
                service,
                uuid: c.uuid,
            })
            .collect())
    }

    async fn read(
        &self,
        handle: &ConnectionHandle,
        characteristic: &CharacteristicHandle,
    ) -> Result<Bytes> {
        let (peripheral, ch) = self.find_characteristic(handle, characteristic).await?;
        let data = peripheral
            .read(&ch)
            .await
            .map_err(|e| Error::read_failed(characteristic.uuid, e.to_string()))?;
        Ok(Bytes::from(data))
    }

    async fn write(
        &self,
        handle: &ConnectionHandle,
        characteristic: &CharacteristicHandle,
        data: &[u8],
        require_ack: bool,
    ) -> Result<()> {
        let (peripheral, ch) = self.find_characteristic(handle, characteristic).await?;
        let write_type = if require_ack {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };
        peripheral
            .write(&ch, data, write_type)
            .await
            .map_err(|e| Error::write_failed(characteristic.uuid, e.to_string()))
    }

    async fn disconnect(&self, id: &str) -> Result<()> {
        let peripheral = self.peripheral(id).await?;
        if peripheral.is_connected().await.unwrap_or(false) {
            peripheral.disconnect().await?;
        }
        Ok(())
    }

    async fn is_connected(&self, id: &str) -> bool {
        match self.peripheral(id).await {
            Ok(p) => p.is_connected().await.unwrap_or(false),
            Err(_) => false,
        }
    }

    async fn connected_ids(&self) -> Vec<String> {
        let cached: Vec<(String, Peripheral)> = self
            .peripherals
            .read()
            .await
            .iter()
            .map(|(id, p)| (id.clone(), p.clone()))
            .collect();

        let mut ids = Vec::new();
        for (id, peripheral) in cached {
            if peripheral.is_connected().await.unwrap_or(false) {
                ids.push(id);
            }
        }
        ids.sort();
        ids
    }

    async fn advertisement(&self, id: &str) -> Option<Advertisement> {
        let peripheral = self.peripheral(id).await.ok()?;
        let props = peripheral.properties().await.ok().flatten()?;
        Some(Advertisement {
            id: id.to_string(),
            name: props.local_name,
            address: props.address.to_string(),
            rssi: props.rssi,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_state() {
        assert_eq!(map_state(CentralState::PoweredOn), AdapterState::PoweredOn);
        assert_eq!(map_state(CentralState::PoweredOff), AdapterState::PoweredOff);
        assert_eq!(map_state(CentralState::Unknown), AdapterState::Unknown);
    }
}
