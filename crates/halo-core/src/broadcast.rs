//! Status broadcast channel.
//!
//! The enriched paired-device list is pushed immediately on every pairing,
//! connect and disconnect, and periodically by [`start_status_ticker`] as a
//! consistency backstop. Consumers receive the full list every time.

use std::time::Duration;

use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use halo_types::{DeviceRecord, EnrichedDevice};

use crate::engine::ReconciliationEngine;

/// Left-join stored records with the set of ids that have a live link.
///
/// Order follows `records`.
pub fn merge_view(records: Vec<DeviceRecord>, connected_ids: &[String]) -> Vec<EnrichedDevice> {
    records
        .into_iter()
        .map(|record| EnrichedDevice::merge(record, connected_ids))
        .collect()
}

/// Spawn the periodic status ticker.
///
/// Every `period` the engine recomputes the merged view from the store and
/// the adapter's live links and publishes a snapshot. The task runs until
/// `cancel` fires.
pub fn start_status_ticker(
    engine: ReconciliationEngine,
    period: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Status ticker cancelled, shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    match engine.broadcast_status().await {
                        Ok(devices) => debug!(count = devices.len(), "Status snapshot published"),
                        Err(e) => warn!("Status snapshot failed: {}", e),
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use halo_types::DeviceKind;

    fn record(id: &str) -> DeviceRecord {
        DeviceRecord {
            id: id.to_string(),
            name: format!("HALO {id}"),
            kind: DeviceKind::Shoe,
            role: "L".to_string(),
            address: String::new(),
            ip: String::new(),
            signal: 0,
            uuid: String::new(),
        }
    }

    #[test]
    fn test_merge_view_left_join() {
        let view = merge_view(
            vec![record("a"), record("b"), record("c")],
            &["b".to_string(), "zzz".to_string()],
        );
        let flags: Vec<(&str, bool)> = view
            .iter()
            .map(|d| (d.record.id.as_str(), d.is_connected))
            .collect();
        assert_eq!(flags, [("a", false), ("b", true), ("c", false)]);
    }

    #[test]
    fn test_merge_view_empty() {
        assert!(merge_view(vec![], &["a".to_string()]).is_empty());
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Every record appears once, in order, connected iff its id is live.
            #[test]
            fn merge_view_preserves_records(
                ids in proptest::collection::vec("[a-z]{1,4}", 0..12),
                live in proptest::collection::vec("[a-z]{1,4}", 0..12),
            ) {
                let records: Vec<DeviceRecord> = ids.iter().map(|id| record(id)).collect();
                let view = merge_view(records.clone(), &live);

                prop_assert_eq!(view.len(), records.len());
                for (device, original) in view.iter().zip(&records) {
                    prop_assert_eq!(&device.record, original);
                    prop_assert_eq!(device.is_connected, live.contains(&original.id));
                }
            }
        }
    }
}
