//! Error types for data parsing in halo-types.

use thiserror::Error;

/// Errors that can occur when parsing HALO device data.
///
/// This error type is platform-agnostic and does not include
/// BLE-specific errors (those belong in halo-core).
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ParseError {
    /// A device kind string that is not one of the known kinds.
    #[error("Unknown device kind: '{0}'")]
    UnknownKind(String),

    /// A characteristic payload that could not be interpreted.
    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

/// Result type alias using halo-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
