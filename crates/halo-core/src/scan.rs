//! Discovery filters and one-shot scanning.
//!
//! Continuous discovery is driven by the reconciliation engine. This
//! module also provides [`scan_for_devices`], a bounded scan that collects
//! matching advertisements without touching the engine.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use halo_types::{DEFAULT_PRODUCT_MARKER, DeviceKind, matches_product_name};

use crate::error::Result;
use crate::radio::{Advertisement, RadioAdapter, RadioEvent};

/// Capability filter passed to the radio stack when scanning.
///
/// An empty service list means "report every advertisement"; name
/// filtering is applied by the consumer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanFilter {
    pub services: Vec<Uuid>,
}

impl ScanFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only report peripherals advertising `service`.
    pub fn service(mut self, service: Uuid) -> Self {
        if !self.services.contains(&service) {
            self.services.push(service);
        }
        self
    }
}

/// Options for a bounded scan.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// How long to scan for devices.
    pub duration: Duration,
    /// Case-insensitive substring an advertised name must contain.
    pub product_marker: String,
    /// Only keep devices of this kind, if set.
    pub kind: Option<DeviceKind>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(5),
            product_marker: DEFAULT_PRODUCT_MARKER.to_string(),
            kind: None,
        }
    }
}

impl ScanOptions {
    /// Create new scan options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set scan duration in seconds.
    pub fn duration_secs(mut self, secs: u64) -> Self {
        self.duration = Duration::from_secs(secs);
        self
    }

    /// Set the product-name marker.
    pub fn product_marker(mut self, marker: impl Into<String>) -> Self {
        self.product_marker = marker.into();
        self
    }

    /// Only keep devices whose name classifies as `kind`.
    pub fn kind(mut self, kind: DeviceKind) -> Self {
        self.kind = Some(kind);
        self
    }
}

/// Scan for matching devices for a fixed duration.
///
/// Returns one entry per peripheral id, keeping the latest sighting, in
/// first-seen order. An empty list is not an error.
pub async fn scan_for_devices(
    adapter: &dyn RadioAdapter,
    options: ScanOptions,
) -> Result<Vec<Advertisement>> {
    let mut events = adapter.events();
    info!(
        "Starting BLE scan for {} seconds...",
        options.duration.as_secs()
    );
    adapter.start_scan(&ScanFilter::default(), true).await?;

    let mut order: Vec<String> = Vec::new();
    let mut seen: HashMap<String, Advertisement> = HashMap::new();
    let deadline = tokio::time::sleep(options.duration);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            event = events.recv() => match event {
                Ok(RadioEvent::Discovered(adv)) => {
                    if !matches_product_name(adv.name.as_deref(), &options.product_marker) {
                        continue;
                    }
                    let name = adv.name.as_deref().unwrap_or_default();
                    if options.kind.is_some_and(|k| DeviceKind::from_name(name) != k) {
                        continue;
                    }
                    if !seen.contains_key(&adv.id) {
                        debug!(device_id = %adv.id, name, "Found device");
                        order.push(adv.id.clone());
                    }
                    seen.insert(adv.id.clone(), adv);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => warn!("Scan lagged, skipped {} events", n),
                Err(RecvError::Closed) => break,
            }
        }
    }

    adapter.stop_scan().await?;

    let devices: Vec<Advertisement> = order
        .into_iter()
        .filter_map(|id| seen.remove(&id))
        .collect();
    info!("Scan complete. Found {} device(s)", devices.len());
    Ok(devices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockAdapter;
    use std::sync::Arc;

    #[test]
    fn test_filter_dedupes_services() {
        let filter = ScanFilter::new()
            .service(halo_types::uuids::PROVISIONING_SERVICE)
            .service(halo_types::uuids::PROVISIONING_SERVICE);
        assert_eq!(filter.services.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_for_devices_filters_and_dedupes() {
        let adapter = Arc::new(MockAdapter::new());
        adapter.add_peripheral("a", "HALO Shoe-1", -60);
        adapter.add_peripheral("b", "HALO Gun-2", -50);
        adapter.add_peripheral("c", "Speaker", -40);

        let scanner = adapter.clone();
        let task = tokio::spawn(async move {
            scan_for_devices(scanner.as_ref(), ScanOptions::new().duration_secs(2)).await
        });

        tokio::task::yield_now().await;
        while !adapter.is_scanning().await {
            tokio::task::yield_now().await;
        }
        adapter.advertise("a");
        adapter.advertise("c");
        adapter.advertise("b");
        adapter.advertise_with_rssi("a", -30);

        let devices = task.await.unwrap().unwrap();
        let ids: Vec<&str> = devices.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);
        assert_eq!(devices[0].rssi, Some(-30));
        assert!(!adapter.is_scanning().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_for_devices_kind_filter() {
        let adapter = Arc::new(MockAdapter::new());
        adapter.add_peripheral("a", "HALO Shoe-1", -60);
        adapter.add_peripheral("b", "HALO Gun-2", -50);

        let scanner = adapter.clone();
        let task = tokio::spawn(async move {
            let options = ScanOptions::new().duration_secs(1).kind(DeviceKind::Gun);
            scan_for_devices(scanner.as_ref(), options).await
        });

        while !adapter.is_scanning().await {
            tokio::task::yield_now().await;
        }
        adapter.advertise("a");
        adapter.advertise("b");

        let devices = task.await.unwrap().unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].id, "b");
    }
}
