//! Local persistence for paired HALO devices.
//!
//! This crate provides a small SQLite-backed settings store. Paired device
//! records live as one versioned JSON collection under a well-known key,
//! so the table doubles as a general key-value store for host settings.
//!
//! # Features
//!
//! - Generic JSON get/set by key
//! - Paired-device collection keyed by radio-layer id (replace, never append)
//! - Version tag on the persisted collection with legacy migration
//!
//! # Example
//!
//! ```no_run
//! use halo_store::Store;
//!
//! let store = Store::open_default()?;
//! for device in store.list_devices()? {
//!     println!("{} ({})", device.name, device.role);
//! }
//! # Ok::<(), halo_store::Error>(())
//! ```

mod collection;
mod error;
mod schema;
mod store;

pub use collection::{COLLECTION_VERSION, PAIRED_DEVICES_KEY, PersistedCollection};
pub use error::{Error, Result};
pub use store::Store;

/// Default database path following platform conventions.
///
/// - Linux: `~/.local/share/halo/settings.db`
/// - macOS: `~/Library/Application Support/halo/settings.db`
/// - Windows: `C:\Users\<user>\AppData\Local\halo\settings.db`
pub fn default_db_path() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("halo")
        .join("settings.db")
}
