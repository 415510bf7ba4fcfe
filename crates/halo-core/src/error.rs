//! Error types for halo-core.
//!
//! This module defines the errors that can occur while scanning for,
//! connecting to and provisioning HALO devices.
//!
//! # Error Classes
//!
//! | Error | Class | Engine behaviour |
//! |-------|-------|------------------|
//! | [`Error::AdapterNotReady`] | adapter | Scan start deferred until the adapter reports powered on |
//! | [`Error::ConnectionFailed`] | connection | Surfaced to the caller; no retry by the engine |
//! | [`Error::ServiceNotFound`] | protocol | Pairing aborted, nothing committed |
//! | [`Error::CharacteristicNotFound`] | protocol | Pairing aborted when a provisioning characteristic is missing |
//! | [`Error::WriteFailed`] | io | Pairing aborted, writes already applied on the device stay applied |
//! | [`Error::ReadFailed`] | io | Non-fatal during identity read-back, fallback used |
//! | [`Error::Store`] | store | Propagated to the caller, no pending write is cached |
//! | [`Error::Timeout`] | connection | Treated like a failed connect or step |
//!
//! Auto-reconnect failures are never surfaced; they are logged at `warn`
//! and the next advertisement from the device triggers the next attempt.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur when communicating with HALO devices.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Bluetooth Low Energy error from the platform stack.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// The radio adapter is missing or not powered on.
    #[error("Bluetooth adapter not ready: {0}")]
    AdapterNotReady(String),

    /// The radio stack has never reported a peripheral with this id.
    #[error("Peripheral not found: {0}")]
    PeripheralNotFound(String),

    /// Peripheral unreachable or the link was rejected.
    #[error("Connection to {device_id} failed: {reason}")]
    ConnectionFailed {
        /// The peripheral that failed to connect.
        device_id: String,
        /// Human-readable failure reason.
        reason: String,
    },

    /// Operation attempted on a peripheral that is not connected.
    #[error("Not connected to {0}")]
    NotConnected(String),

    /// Expected GATT service missing (firmware mismatch).
    #[error("Service {service} not found on {device_id}")]
    ServiceNotFound {
        /// The peripheral that was searched.
        device_id: String,
        /// The missing service UUID.
        service: Uuid,
    },

    /// Expected GATT characteristic missing.
    #[error("Characteristic {uuid} not found on {device_id}")]
    CharacteristicNotFound {
        /// The peripheral that was searched.
        device_id: String,
        /// The missing characteristic UUID.
        uuid: Uuid,
    },

    /// Characteristic read failed mid-operation.
    #[error("Read of characteristic {uuid} failed: {reason}")]
    ReadFailed {
        /// The characteristic UUID.
        uuid: Uuid,
        /// The reason for the failure.
        reason: String,
    },

    /// Characteristic write failed mid-operation.
    #[error("Write to characteristic {uuid} failed: {reason}")]
    WriteFailed {
        /// The characteristic UUID.
        uuid: Uuid,
        /// The reason for the failure.
        reason: String,
    },

    /// Paired-device store error.
    #[error("Store error: {0}")]
    Store(#[from] halo_store::Error),

    /// Operation timed out.
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The timeout duration.
        duration: Duration,
    },

    /// Operation was cancelled.
    #[error("Operation cancelled")]
    Cancelled,

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Create a connection failure.
    pub fn connection_failed(device_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            device_id: device_id.into(),
            reason: reason.into(),
        }
    }

    /// Create a timeout error with operation context.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a service not found error.
    pub fn service_not_found(device_id: impl Into<String>, service: Uuid) -> Self {
        Self::ServiceNotFound {
            device_id: device_id.into(),
            service,
        }
    }

    /// Create a characteristic not found error.
    pub fn characteristic_not_found(device_id: impl Into<String>, uuid: Uuid) -> Self {
        Self::CharacteristicNotFound {
            device_id: device_id.into(),
            uuid,
        }
    }

    /// Create a read failure.
    pub fn read_failed(uuid: Uuid, reason: impl Into<String>) -> Self {
        Self::ReadFailed {
            uuid,
            reason: reason.into(),
        }
    }

    /// Create a write failure.
    pub fn write_failed(uuid: Uuid, reason: impl Into<String>) -> Self {
        Self::WriteFailed {
            uuid,
            reason: reason.into(),
        }
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Firmware mismatch: an expected service or characteristic is absent.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            Self::ServiceNotFound { .. } | Self::CharacteristicNotFound { .. }
        )
    }

    /// A read or write failed mid-operation, typically from link loss.
    pub fn is_io(&self) -> bool {
        matches!(
            self,
            Self::ReadFailed { .. } | Self::WriteFailed { .. } | Self::NotConnected(_)
        )
    }

    /// The peripheral could not be reached or the link was refused.
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed { .. } | Self::Timeout { .. } | Self::PeripheralNotFound(_)
        )
    }
}

impl From<halo_types::ParseError> for Error {
    fn from(err: halo_types::ParseError) -> Self {
        Error::InvalidConfig(err.to_string())
    }
}

/// Result type alias using halo-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use halo_types::uuids::{PROVISIONING_SERVICE, ROLE};

    #[test]
    fn test_error_display() {
        let err = Error::connection_failed("abc123", "out of range");
        assert_eq!(err.to_string(), "Connection to abc123 failed: out of range");

        let err = Error::service_not_found("abc123", PROVISIONING_SERVICE);
        assert!(err.to_string().contains("0000a000"));

        let err = Error::timeout("connect", Duration::from_secs(10));
        assert!(err.to_string().contains("connect"));
        assert!(err.to_string().contains("10s"));
    }

    #[test]
    fn test_classification() {
        assert!(Error::service_not_found("x", PROVISIONING_SERVICE).is_protocol());
        assert!(Error::characteristic_not_found("x", ROLE).is_protocol());
        assert!(Error::write_failed(ROLE, "link lost").is_io());
        assert!(Error::read_failed(ROLE, "link lost").is_io());
        assert!(Error::connection_failed("x", "nope").is_connection());
        assert!(Error::timeout("connect", Duration::from_secs(1)).is_connection());
        assert!(!Error::Cancelled.is_io());
        assert!(!Error::AdapterNotReady("off".into()).is_protocol());
    }

    #[test]
    fn test_btleplug_error_conversion() {
        fn _assert_from_impl<T: From<btleplug::Error>>() {}
        _assert_from_impl::<Error>();
    }

    #[test]
    fn test_store_error_conversion() {
        let store_err = halo_store::Error::UnsupportedVersion {
            found: 2,
            supported: 1,
        };
        let err: Error = store_err.into();
        assert!(matches!(err, Error::Store(_)));
        assert!(err.to_string().contains("version 2"));
    }
}
