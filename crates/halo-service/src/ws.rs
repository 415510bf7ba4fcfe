//! WebSocket handler for the outbound event stream.
//!
//! Each message is one JSON object tagged with `"event"`, e.g.
//! `{"event":"device-connected","device":{...}}`.

use std::sync::Arc;

use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use halo_core::HostEvent;

use crate::state::AppState;

/// Create the WebSocket router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/api/ws", get(ws_handler))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

fn encode(event: &HostEvent) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            warn!(event = event.name(), "Failed to serialize event: {}", e);
            None
        }
    }
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    // Subscribe before the snapshot so nothing published meanwhile is lost.
    let mut rx = state.engine.subscribe();

    info!("WebSocket client connected");

    match state.engine.paired_devices().await {
        Ok(devices) => {
            let snapshot = HostEvent::ConnectionStatusSnapshot { devices };
            if let Some(message) = encode(&snapshot)
                && sender.send(message).await.is_err()
            {
                info!("WebSocket client disconnected during initial snapshot");
                return;
            }
        }
        Err(e) => warn!("Initial snapshot unavailable: {}", e),
    }
    debug!("Sent initial snapshot to WebSocket client");

    let mut send_task = tokio::spawn(async move {
        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(n)) => {
                    warn!("WebSocket client lagged, skipped {} events", n);
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            let Some(message) = encode(&event) else {
                continue;
            };
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!("WebSocket receive error: {}", e);
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    info!("WebSocket client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use halo_core::DeviceKind;
    use halo_types::ScannedCandidate;

    #[test]
    fn test_encode_tags_event_name() {
        let event = HostEvent::CandidateFound {
            device: ScannedCandidate {
                id: "abc".to_string(),
                name: "HALO Suit-1".to_string(),
                address: String::new(),
                rssi: -70,
                kind: DeviceKind::Suit,
                role: "unpaired".to_string(),
            },
        };
        let Some(Message::Text(text)) = encode(&event) else {
            panic!("expected text message");
        };
        let json: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
        assert_eq!(json["event"], "candidate-found");
        assert_eq!(json["device"]["type"], "suit");
    }
}
