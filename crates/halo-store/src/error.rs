//! Error types for halo-store.

use std::path::PathBuf;

/// Result type for halo-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in halo-store.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Database error from SQLite.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Failed to create database directory.
    #[error("Failed to create database directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The persisted collection was written by a newer release.
    #[error("Unsupported paired-device collection version {found} (supported: {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },

    /// The database schema is newer than this release understands.
    #[error("Unsupported database schema version {found} (supported: {supported})")]
    UnsupportedSchema { found: i32, supported: i32 },
}
