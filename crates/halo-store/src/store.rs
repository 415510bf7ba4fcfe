//! Main store implementation.

use std::path::Path;

use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use serde::de::DeserializeOwned;
use time::OffsetDateTime;
use tracing::{debug, info};

use halo_types::DeviceRecord;

use crate::collection::{PAIRED_DEVICES_KEY, PersistedCollection};
use crate::error::{Error, Result};
use crate::schema;

/// SQLite-based settings store holding the paired-device collection.
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        info!("Opening settings database at {}", path.display());
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;

        schema::initialize(&conn)?;

        Ok(Self { conn })
    }

    /// Open the default database location.
    pub fn open_default() -> Result<Self> {
        Self::open(crate::default_db_path())
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self { conn })
    }
}

// Generic key-value operations
impl Store {
    /// Read the raw JSON text stored under `key`.
    pub fn get_raw(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row("SELECT value FROM settings WHERE key = ?", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    /// Write raw JSON text under `key`, replacing any previous value.
    pub fn set_raw(&self, key: &str, value: &str) -> Result<()> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        self.conn.execute(
            "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = ?3",
            rusqlite::params![key, value, now],
        )?;
        debug!(key, "Setting written");
        Ok(())
    }

    /// Read and deserialize the value stored under `key`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get_raw(key)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Serialize and store `value` under `key`.
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        self.set_raw(key, &raw)
    }

    /// Delete `key`. Returns `true` if it existed.
    pub fn remove_key(&self, key: &str) -> Result<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM settings WHERE key = ?", [key])?;
        Ok(removed > 0)
    }
}

// Paired-device operations
impl Store {
    /// Load the paired-device collection, migrating legacy layouts.
    pub fn load_collection(&self) -> Result<PersistedCollection> {
        match self.get_raw(PAIRED_DEVICES_KEY)? {
            Some(raw) => PersistedCollection::decode(&raw),
            None => Ok(PersistedCollection::default()),
        }
    }

    fn save_collection(&self, collection: &PersistedCollection) -> Result<()> {
        let raw = collection.encode()?;
        self.set_raw(PAIRED_DEVICES_KEY, &raw)
    }

    /// All paired device records, in insertion order.
    pub fn list_devices(&self) -> Result<Vec<DeviceRecord>> {
        Ok(self.load_collection()?.devices)
    }

    /// Get the record for a radio-layer id.
    pub fn get_device(&self, id: &str) -> Result<Option<DeviceRecord>> {
        Ok(self.load_collection()?.get(id).cloned())
    }

    /// Commit a pairing record, replacing any record with the same id.
    ///
    /// The read-modify-write runs inside one transaction.
    pub fn replace_device(&self, record: &DeviceRecord) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        let mut collection = self.load_collection()?;
        collection.replace(record.clone());
        self.save_collection(&collection)?;
        tx.commit()?;

        info!(device_id = %record.id, role = %record.role, "Paired device record committed");
        Ok(())
    }

    /// Remove the record for `id`. Returns `true` if a record was removed.
    pub fn remove_device(&self, id: &str) -> Result<bool> {
        let tx = self.conn.unchecked_transaction()?;
        let mut collection = self.load_collection()?;
        let removed = collection.remove(id);
        if removed {
            self.save_collection(&collection)?;
        }
        tx.commit()?;

        if removed {
            info!(device_id = id, "Paired device record removed");
        } else {
            debug!(device_id = id, "No paired device record to remove");
        }
        Ok(removed)
    }

    /// Number of paired devices.
    pub fn count_devices(&self) -> Result<usize> {
        Ok(self.load_collection()?.devices.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::COLLECTION_VERSION;
    use halo_types::DeviceKind;

    fn record(id: &str, role: &str) -> DeviceRecord {
        DeviceRecord {
            id: id.to_string(),
            name: "HALO Shoe-42".to_string(),
            kind: DeviceKind::Shoe,
            role: role.to_string(),
            address: "AA:BB:CC".to_string(),
            ip: "192.168.1.20".to_string(),
            signal: 72,
            uuid: "fw-1".to_string(),
        }
    }

    #[test]
    fn test_open_in_memory() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.list_devices().unwrap().is_empty());
    }

    #[test]
    fn test_replace_device_is_unique_per_id() {
        let store = Store::open_in_memory().unwrap();
        store.replace_device(&record("abc123", "L")).unwrap();
        store.replace_device(&record("abc123", "R")).unwrap();

        let devices = store.list_devices().unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].role, "R");
    }

    #[test]
    fn test_replace_does_not_merge_fields() {
        let store = Store::open_in_memory().unwrap();
        store.replace_device(&record("abc123", "L")).unwrap();

        let mut fresh = record("abc123", "L");
        fresh.ip = String::new();
        fresh.uuid = String::new();
        store.replace_device(&fresh).unwrap();

        let stored = store.get_device("abc123").unwrap().unwrap();
        assert_eq!(stored.ip, "");
        assert_eq!(stored.uuid, "");
    }

    #[test]
    fn test_remove_device() {
        let store = Store::open_in_memory().unwrap();
        store.replace_device(&record("a", "L")).unwrap();
        store.replace_device(&record("b", "R")).unwrap();

        assert!(store.remove_device("a").unwrap());
        assert!(!store.remove_device("a").unwrap());
        assert!(store.get_device("a").unwrap().is_none());
        assert_eq!(store.count_devices().unwrap(), 1);
    }

    #[test]
    fn test_generic_get_set() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.get::<String>("theme").unwrap(), None);

        store.set("theme", "dark").unwrap();
        assert_eq!(store.get::<String>("theme").unwrap().as_deref(), Some("dark"));

        assert!(store.remove_key("theme").unwrap());
        assert!(!store.remove_key("theme").unwrap());
    }

    #[test]
    fn test_legacy_array_is_migrated_on_write() {
        let store = Store::open_in_memory().unwrap();
        store
            .set_raw(
                PAIRED_DEVICES_KEY,
                r#"[{"id":"old","name":"HALO Gun","role":"R","type":"gun"}]"#,
            )
            .unwrap();

        assert_eq!(store.get_device("old").unwrap().unwrap().kind, DeviceKind::Gun);

        store.replace_device(&record("new", "L")).unwrap();
        let raw = store.get_raw(PAIRED_DEVICES_KEY).unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["version"], COLLECTION_VERSION);
        assert_eq!(value["devices"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_newer_collection_is_refused() {
        let store = Store::open_in_memory().unwrap();
        store
            .set_raw(PAIRED_DEVICES_KEY, r#"{"version":99,"devices":[]}"#)
            .unwrap();

        assert!(matches!(
            store.list_devices(),
            Err(Error::UnsupportedVersion { found: 99, .. })
        ));
        // Nothing is overwritten on a refused read.
        assert!(store.replace_device(&record("a", "L")).is_err());
        assert!(store.get_raw(PAIRED_DEVICES_KEY).unwrap().unwrap().contains("99"));
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.db");

        {
            let store = Store::open(&path).unwrap();
            store.replace_device(&record("abc123", "L")).unwrap();
        }

        let store = Store::open(&path).unwrap();
        let stored = store.get_device("abc123").unwrap().unwrap();
        assert_eq!(stored.role, "L");
        assert_eq!(stored.signal, 72);
    }
}
