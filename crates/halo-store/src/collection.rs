//! Versioned on-disk layout of the paired-device collection.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use halo_types::DeviceRecord;

use crate::error::{Error, Result};

/// Settings key the paired-device collection is stored under.
pub const PAIRED_DEVICES_KEY: &str = "pairedDevices";

/// Current version of the persisted collection layout.
pub const COLLECTION_VERSION: u32 = 1;

/// Paired-device records as written to the settings table.
///
/// Earlier releases wrote a bare JSON array of records. Those are read as
/// version 0 and rewritten with a version tag on the next save.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedCollection {
    pub version: u32,
    #[serde(default)]
    pub devices: Vec<DeviceRecord>,
}

impl Default for PersistedCollection {
    fn default() -> Self {
        Self {
            version: COLLECTION_VERSION,
            devices: Vec::new(),
        }
    }
}

impl PersistedCollection {
    /// Decode a stored collection, migrating legacy layouts.
    pub fn decode(raw: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(raw)?;

        if value.is_array() {
            let devices: Vec<DeviceRecord> = serde_json::from_value(value)?;
            info!(
                count = devices.len(),
                "Migrating unversioned paired-device collection"
            );
            return Ok(Self {
                version: COLLECTION_VERSION,
                devices: dedupe_by_id(devices),
            });
        }

        let found = value
            .get("version")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(0);
        if found > u64::from(COLLECTION_VERSION) {
            return Err(Error::UnsupportedVersion {
                found: u32::try_from(found).unwrap_or(u32::MAX),
                supported: COLLECTION_VERSION,
            });
        }

        let mut collection: PersistedCollection = serde_json::from_value(value)?;
        collection.version = COLLECTION_VERSION;
        collection.devices = dedupe_by_id(collection.devices);
        Ok(collection)
    }

    /// Encode the collection at the current version.
    pub fn encode(&self) -> Result<String> {
        let current = PersistedCollection {
            version: COLLECTION_VERSION,
            devices: self.devices.clone(),
        };
        Ok(serde_json::to_string(&current)?)
    }

    /// Replace the record with the same id, or append it.
    ///
    /// Remove-then-insert: no field of an earlier record survives.
    pub fn replace(&mut self, record: DeviceRecord) {
        self.devices.retain(|d| d.id != record.id);
        self.devices.push(record);
    }

    /// Remove the record with `id`. Returns `true` if one existed.
    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.devices.len();
        self.devices.retain(|d| d.id != id);
        self.devices.len() != before
    }

    pub fn get(&self, id: &str) -> Option<&DeviceRecord> {
        self.devices.iter().find(|d| d.id == id)
    }
}

/// Collapse duplicate ids, keeping the last occurrence in its position.
fn dedupe_by_id(devices: Vec<DeviceRecord>) -> Vec<DeviceRecord> {
    let mut out: Vec<DeviceRecord> = Vec::with_capacity(devices.len());
    for device in devices {
        if let Some(pos) = out.iter().position(|d| d.id == device.id) {
            warn!(device_id = %device.id, "Dropping duplicate paired-device record");
            out.remove(pos);
        }
        out.push(device);
    }
    out
}
