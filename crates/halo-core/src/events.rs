//! Outbound notifications for the presentation layer.
//!
//! The engine publishes every connection-state transition as a
//! [`HostEvent`] on a broadcast channel. Event names are the wire
//! contract: each event serializes with an `"event"` tag in kebab-case.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use halo_types::{
    ConnectionState, DeviceRecord, DeviceStatusUpdate, EnrichedDevice, ScannedCandidate,
};

/// Events emitted by the reconciliation engine.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event types
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
#[non_exhaustive]
pub enum HostEvent {
    /// A matching, unpaired peripheral was sighted during a scan.
    CandidateFound { device: ScannedCandidate },
    /// A paired peripheral connected.
    DeviceConnected { device: ConnectionState },
    /// A peripheral's link dropped.
    DeviceDisconnected { device: ConnectionState },
    /// Compact status line for one peripheral.
    DeviceStatusUpdate { status: DeviceStatusUpdate },
    /// A pairing was committed to the store.
    DevicePaired { device: DeviceRecord },
    /// A pairing attempt failed; nothing was committed.
    PairingFailed { id: String, error: String },
    /// Full enriched paired-device list.
    ConnectionStatusSnapshot { devices: Vec<EnrichedDevice> },
}

impl HostEvent {
    /// Wire name of this event.
    pub fn name(&self) -> &'static str {
        match self {
            HostEvent::CandidateFound { .. } => "candidate-found",
            HostEvent::DeviceConnected { .. } => "device-connected",
            HostEvent::DeviceDisconnected { .. } => "device-disconnected",
            HostEvent::DeviceStatusUpdate { .. } => "device-status-update",
            HostEvent::DevicePaired { .. } => "device-paired",
            HostEvent::PairingFailed { .. } => "pairing-failed",
            HostEvent::ConnectionStatusSnapshot { .. } => "connection-status-snapshot",
        }
    }
}

/// Sender for host events.
pub type EventSender = broadcast::Sender<HostEvent>;

/// Receiver for host events.
pub type EventReceiver = broadcast::Receiver<HostEvent>;

/// Event dispatcher for sending events to multiple receivers.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: EventSender,
}

impl EventDispatcher {
    /// Create a new event dispatcher.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Send an event.
    pub fn send(&self, event: HostEvent) {
        // Ignore error if no receivers
        let _ = self.sender.send(event);
    }

    /// Get the number of active receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_tag_matches_name() {
        let events = [
            HostEvent::PairingFailed {
                id: "a".into(),
                error: "boom".into(),
            },
            HostEvent::ConnectionStatusSnapshot { devices: vec![] },
        ];
        for event in events {
            let json = serde_json::to_value(&event).unwrap();
            assert_eq!(json["event"], event.name());
        }
    }

    #[test]
    fn test_pairing_failed_shape() {
        let json = serde_json::to_string(&HostEvent::PairingFailed {
            id: "abc123".into(),
            error: "timeout".into(),
        })
        .unwrap();
        assert_eq!(
            json,
            r#"{"event":"pairing-failed","id":"abc123","error":"timeout"}"#
        );
    }

    #[tokio::test]
    async fn test_dispatcher_fans_out() {
        let dispatcher = EventDispatcher::new(8);
        let mut a = dispatcher.subscribe();
        let mut b = dispatcher.subscribe();
        assert_eq!(dispatcher.receiver_count(), 2);

        dispatcher.send(HostEvent::ConnectionStatusSnapshot { devices: vec![] });
        assert_eq!(a.recv().await.unwrap().name(), "connection-status-snapshot");
        assert_eq!(b.recv().await.unwrap().name(), "connection-status-snapshot");
    }

    #[test]
    fn test_send_without_receivers_is_ignored() {
        let dispatcher = EventDispatcher::default();
        dispatcher.send(HostEvent::ConnectionStatusSnapshot { devices: vec![] });
    }
}
