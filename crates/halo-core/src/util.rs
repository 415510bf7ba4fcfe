//! Utility functions for halo-core.

use std::future::Future;
use std::time::Duration;

use btleplug::platform::PeripheralId;

use crate::error::{Error, Result};

/// Format a peripheral ID as a string.
///
/// On macOS, peripheral IDs are UUIDs. On other platforms, they may be
/// MAC addresses or other formats. This function extracts the useful
/// identifier string.
pub fn format_peripheral_id(id: &PeripheralId) -> String {
    strip_debug_wrapper(&format!("{:?}", id))
}

fn strip_debug_wrapper(debug: &str) -> String {
    debug
        .trim_start_matches("PeripheralId(")
        .trim_end_matches(')')
        .to_string()
}

/// Run `fut` with a deadline, mapping expiry to [`Error::Timeout`].
pub async fn with_timeout<T, F>(operation: &str, duration: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::timeout(operation, duration)),
    }
}
