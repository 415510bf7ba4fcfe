//! Core types for HALO device pairing and connection state.

use core::fmt;
use core::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{ParseError, ParseResult};

/// Role reported for a device that has no pairing record.
pub const UNPAIRED_ROLE: &str = "unpaired";

/// Product-name marker every HALO peripheral carries in its advertised name.
pub const DEFAULT_PRODUCT_MARKER: &str = "HALO";

/// Name marker that classifies a peripheral as a gun.
const GUN_MARKER: &str = "gun";

/// Kind of HALO peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum DeviceKind {
    /// Shoe sensor. The default for anything not recognised as a gun.
    #[default]
    Shoe,
    /// Handheld gun controller.
    Gun,
    /// Haptic suit.
    Suit,
    /// Any other peripheral (belts, headsets).
    Other,
}

impl DeviceKind {
    /// Infer the device kind from an advertised name.
    ///
    /// A case-insensitive `"gun"` substring yields [`DeviceKind::Gun`];
    /// every other name yields [`DeviceKind::Shoe`]. Suits and other
    /// peripherals are never inferred, only assigned.
    ///
    /// ```
    /// use halo_types::DeviceKind;
    ///
    /// assert_eq!(DeviceKind::from_name("HALO Gun Alpha-001"), DeviceKind::Gun);
    /// assert_eq!(DeviceKind::from_name("HALO Shoe-42"), DeviceKind::Shoe);
    /// assert_eq!(DeviceKind::from_name("HALO Suit"), DeviceKind::Shoe);
    /// ```
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        if name.to_lowercase().contains(GUN_MARKER) {
            DeviceKind::Gun
        } else {
            DeviceKind::Shoe
        }
    }

    /// Lowercase wire name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::Shoe => "shoe",
            DeviceKind::Gun => "gun",
            DeviceKind::Suit => "suit",
            DeviceKind::Other => "other",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceKind {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "shoe" => Ok(DeviceKind::Shoe),
            "gun" => Ok(DeviceKind::Gun),
            "suit" => Ok(DeviceKind::Suit),
            "other" => Ok(DeviceKind::Other),
            _ => Err(ParseError::UnknownKind(s.to_string())),
        }
    }
}

/// Check whether an advertised name belongs to one of our devices.
///
/// The comparison is a case-insensitive substring match against `marker`.
/// Advertisements without a name never match.
pub fn matches_product_name(name: Option<&str>, marker: &str) -> bool {
    match name {
        Some(name) if !marker.is_empty() => name.to_lowercase().contains(&marker.to_lowercase()),
        _ => false,
    }
}

/// Decode a signal-strength characteristic payload.
///
/// The firmware reports the value as a UTF-8 decimal string, padded with
/// NULs or whitespace.
pub fn decode_signal(payload: &[u8]) -> ParseResult<i16> {
    let text = std::str::from_utf8(payload)
        .map_err(|_| ParseError::InvalidValue("signal payload is not UTF-8".to_string()))?;
    let trimmed = text.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    trimmed
        .parse::<i16>()
        .map_err(|_| ParseError::InvalidValue(format!("signal {trimmed:?}")))
}

/// Parse a signal-strength payload, treating zero and unparseable values
/// as "no reading" so callers fall back to the advertisement RSSI.
pub fn parse_signal(payload: &[u8]) -> Option<i16> {
    match decode_signal(payload) {
        Ok(0) | Err(_) => None,
        Ok(value) => Some(value),
    }
}

/// Decode a UTF-8 characteristic payload, trimming trailing NULs and whitespace.
pub fn decode_text(payload: &[u8]) -> String {
    String::from_utf8_lossy(payload)
        .trim_matches(|c: char| c == '\0' || c.is_whitespace())
        .to_string()
}

/// Persisted pairing record for one peripheral.
///
/// `id` is the radio-layer identifier assigned by the platform BLE stack.
/// It is distinct from `address` (reported by the device firmware) and
/// from `uuid` (the firmware identifier).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DeviceRecord {
    /// Radio-layer peripheral identifier.
    pub id: String,
    /// Advertised name at pairing time.
    pub name: String,
    /// Kind inferred at discovery time.
    #[cfg_attr(feature = "serde", serde(rename = "type", default))]
    pub kind: DeviceKind,
    /// Role assigned at pairing time (e.g. `"L"`, `"R"`, `"primary"`).
    #[cfg_attr(feature = "serde", serde(default = "unpaired_role"))]
    pub role: String,
    /// Hardware address reported by the firmware.
    #[cfg_attr(feature = "serde", serde(default))]
    pub address: String,
    /// Network address assigned after joining the configured network.
    #[cfg_attr(feature = "serde", serde(default))]
    pub ip: String,
    /// Last observed signal strength.
    #[cfg_attr(feature = "serde", serde(default))]
    pub signal: i16,
    /// Firmware-reported unique identifier.
    #[cfg_attr(feature = "serde", serde(default))]
    pub uuid: String,
}

#[cfg(feature = "serde")]
fn unpaired_role() -> String {
    UNPAIRED_ROLE.to_string()
}

/// Live connection status of one peripheral. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct ConnectionState {
    pub id: String,
    pub name: String,
    pub is_connected: bool,
    pub role: String,
    #[cfg_attr(feature = "serde", serde(rename = "type"))]
    pub kind: DeviceKind,
    pub ip: String,
    pub signal: i16,
    pub address: String,
}

impl ConnectionState {
    /// Connected state for a stored record, carrying the live signal strength.
    pub fn connected(record: &DeviceRecord, signal: i16) -> Self {
        Self {
            id: record.id.clone(),
            name: record.name.clone(),
            is_connected: true,
            role: record.role.clone(),
            kind: record.kind,
            ip: record.ip.clone(),
            signal,
            address: record.address.clone(),
        }
    }

    /// Disconnected state.
    ///
    /// Role, kind, ip and address come from the stored record when one
    /// exists; otherwise role is [`UNPAIRED_ROLE`], kind is `fallback_kind`
    /// and the addresses are empty.
    pub fn disconnected(
        id: &str,
        name: &str,
        record: Option<&DeviceRecord>,
        fallback_kind: DeviceKind,
    ) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            is_connected: false,
            role: record.map_or_else(|| UNPAIRED_ROLE.to_string(), |r| r.role.clone()),
            kind: record.map_or(fallback_kind, |r| r.kind),
            ip: record.map(|r| r.ip.clone()).unwrap_or_default(),
            signal: 0,
            address: record.map(|r| r.address.clone()).unwrap_or_default(),
        }
    }
}

/// A stored record joined with its live connection flag.
///
/// This is the shape pushed to the presentation layer for every status
/// snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct EnrichedDevice {
    #[cfg_attr(feature = "serde", serde(flatten))]
    pub record: DeviceRecord,
    pub is_connected: bool,
}

impl EnrichedDevice {
    /// Left-join a record with the set of currently connected ids.
    pub fn merge(record: DeviceRecord, connected_ids: &[String]) -> Self {
        let is_connected = connected_ids.iter().any(|id| *id == record.id);
        Self {
            record,
            is_connected,
        }
    }
}

/// A matching discovery sighting of a peripheral that is not yet paired.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ScannedCandidate {
    pub id: String,
    pub name: String,
    /// Radio-layer hardware address from the advertisement.
    #[cfg_attr(feature = "serde", serde(default))]
    pub address: String,
    #[cfg_attr(feature = "serde", serde(default))]
    pub rssi: i16,
    #[cfg_attr(feature = "serde", serde(rename = "type", default))]
    pub kind: DeviceKind,
    #[cfg_attr(feature = "serde", serde(default = "unpaired_role"))]
    pub role: String,
}

/// Compact per-device status for dashboards.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct DeviceStatusUpdate {
    pub id: String,
    pub name: String,
    pub is_connected: bool,
    pub ip: String,
    pub mac: String,
    pub signal: i16,
}

impl From<&ConnectionState> for DeviceStatusUpdate {
    fn from(state: &ConnectionState) -> Self {
        if state.is_connected {
            Self {
                id: state.id.clone(),
                name: state.name.clone(),
                is_connected: true,
                ip: state.ip.clone(),
                mac: state.address.clone(),
                signal: state.signal,
            }
        } else {
            Self {
                id: state.id.clone(),
                name: state.name.clone(),
                is_connected: false,
                ip: String::new(),
                mac: String::new(),
                signal: 0,
            }
        }
    }
}
