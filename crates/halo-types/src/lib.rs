//! Platform-agnostic types for HALO wearable devices.
//!
//! This crate provides the shared vocabulary used by the pairing engine
//! (halo-core), the settings store (halo-store) and the host service
//! (halo-service).
//!
//! # Features
//!
//! - Device records, live connection states and scanned candidates
//! - Name-based device classification and product filtering
//! - UUID constants for the provisioning and info GATT services
//! - Error types for data parsing
//!
//! # Example
//!
//! ```
//! use halo_types::{DeviceKind, matches_product_name};
//!
//! assert!(matches_product_name(Some("HALO Gun Alpha"), "HALO"));
//! assert_eq!(DeviceKind::from_name("HALO Gun Alpha"), DeviceKind::Gun);
//! ```

pub mod candidates;
pub mod error;
pub mod types;
pub mod uuid;

pub use candidates::{CandidateList, merge_candidates};
pub use error::{ParseError, ParseResult};
pub use types::{
    ConnectionState, DEFAULT_PRODUCT_MARKER, DeviceKind, DeviceRecord, DeviceStatusUpdate,
    EnrichedDevice, ScannedCandidate, UNPAIRED_ROLE, decode_signal, decode_text,
    matches_product_name, parse_signal,
};
pub use uuid as uuids;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_display() {
        let err = ParseError::UnknownKind("belt".to_string());
        assert_eq!(err.to_string(), "Unknown device kind: 'belt'");
        let err = ParseError::InvalidValue("signal".to_string());
        assert_eq!(err.to_string(), "Invalid value: signal");
    }

    #[test]
    fn test_kind_display_matches_serde() {
        assert_eq!(DeviceKind::Gun.to_string(), "gun");
        assert_eq!(
            serde_json::to_string(&DeviceKind::Suit).unwrap(),
            "\"suit\""
        );
    }

    #[test]
    fn test_connection_state_wire_shape() {
        let record = DeviceRecord {
            id: "abc123".to_string(),
            name: "HALO Shoe-42".to_string(),
            kind: DeviceKind::Shoe,
            role: "L".to_string(),
            address: "AA:BB".to_string(),
            ip: "10.0.0.3".to_string(),
            signal: 0,
            uuid: "fw-1".to_string(),
        };
        let json = serde_json::to_value(ConnectionState::connected(&record, -48)).unwrap();
        assert_eq!(json["isConnected"], true);
        assert_eq!(json["type"], "shoe");
        assert_eq!(json["signal"], -48);
    }

    #[test]
    fn test_legacy_record_json_parses() {
        let json = r#"{"id":"abc123","name":"HALO Shoe-42","address":"AA:BB","role":"L","type":"shoe","ip":"192.168.1.20","signal":72,"uuid":"xyz"}"#;
        let record: DeviceRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.kind, DeviceKind::Shoe);
        assert_eq!(record.signal, 72);
    }
}

/// Property-based tests for classification and payload parsing.
#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Classification is a pure function of the name.
        #[test]
        fn kind_from_name_is_deterministic(name in ".*") {
            prop_assert_eq!(DeviceKind::from_name(&name), DeviceKind::from_name(&name));
        }

        /// Any name containing "gun" in any casing is a gun.
        #[test]
        fn names_with_gun_are_guns(prefix in "[a-zA-Z ]{0,8}", suffix in "[a-zA-Z0-9 ]{0,8}", upper: bool) {
            let marker = if upper { "GUN" } else { "gun" };
            let name = format!("{prefix}{marker}{suffix}");
            prop_assert_eq!(DeviceKind::from_name(&name), DeviceKind::Gun);
        }

        /// Classification only ever infers shoes or guns.
        #[test]
        fn inferred_kind_is_shoe_or_gun(name in ".*") {
            let kind = DeviceKind::from_name(&name);
            prop_assert!(matches!(kind, DeviceKind::Shoe | DeviceKind::Gun));
        }

        /// Names without the marker never pass the product filter.
        #[test]
        fn filter_rejects_names_without_marker(name in "[b-gB-G0-9 ]{0,16}") {
            prop_assert!(!matches_product_name(Some(&name), DEFAULT_PRODUCT_MARKER));
        }

        /// Signal parsing never panics and never yields zero.
        #[test]
        fn parse_signal_never_yields_zero(data: Vec<u8>) {
            prop_assert_ne!(parse_signal(&data), Some(0));
        }

        /// Merging never drops a local candidate.
        #[test]
        fn merge_keeps_all_local(ids in proptest::collection::hash_set("[a-z]{1,6}", 0..8)) {
            let local: Vec<ScannedCandidate> = ids
                .iter()
                .map(|id| ScannedCandidate {
                    id: id.clone(),
                    name: format!("HALO {id}"),
                    address: String::new(),
                    rssi: -60,
                    kind: DeviceKind::Shoe,
                    role: UNPAIRED_ROLE.to_string(),
                })
                .collect();
            let merged = merge_candidates(&local, &local);
            prop_assert_eq!(merged.len(), local.len());
        }
    }
}
