//! Live stats WebSocket.
//!
//! Pushes a JSON `stats` message on every snapshot and a `ping` message after
//! 30 seconds without anything from the client.

use std::time::Duration;

use axum::{
    Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::api::server::AppState;
use crate::stats::StatsSnapshot;

/// Client silence after which a ping message is sent.
const IDLE_PING_SECS: u64 = 30;

pub fn router() -> Router<AppState> {
    Router::new().route("/ws/stats", get(stats_ws))
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum OutgoingMessage<'a> {
    Stats(&'a StatsSnapshot),
    Ping,
}

impl OutgoingMessage<'_> {
    fn to_message(&self) -> Option<Message> {
        serde_json::to_string(self)
            .ok()
            .map(|json| Message::Text(json.into()))
    }
}

async fn stats_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    // Joining pushes a snapshot to every subscriber, this one included.
    let mut subscription = state.media.stats().subscribe();

    let idle = Duration::from_secs(IDLE_PING_SECS);
    let mut deadline = Instant::now() + idle;

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                        deadline = Instant::now() + idle;
                    }
                    Some(Ok(_)) => {
                        deadline = Instant::now() + idle;
                    }
                    Some(Err(e)) => {
                        debug!("WebSocket error: {}", e);
                        break;
                    }
                }
            }

            snapshot = subscription.receiver.recv() => {
                match snapshot {
                    Ok(snapshot) => {
                        let Some(message) = OutgoingMessage::Stats(&snapshot).to_message() else {
                            continue;
                        };
                        if sender.send(message).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Stats receiver lagged by {} messages", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }

            _ = tokio::time::sleep_until(deadline) => {
                let Some(message) = OutgoingMessage::Ping.to_message() else {
                    break;
                };
                if sender.send(message).await.is_err() {
                    break;
                }
                deadline = Instant::now() + idle;
            }
        }
    }

    debug!("Stats WebSocket closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outgoing_message_shape() {
        let snapshot = StatsSnapshot {
            heartbeats: 3,
            connected_clients: 1,
            total_conversions: 7,
            total_bandwidth_mb: 1.5,
        };
        let json = serde_json::to_value(OutgoingMessage::Stats(&snapshot)).unwrap();
        assert_eq!(json["type"], "stats");
        assert_eq!(json["heartbeats"], 3);
        assert_eq!(json["total_bandwidth_mb"], 1.5);

        let json = serde_json::to_value(OutgoingMessage::Ping).unwrap();
        assert_eq!(json, serde_json::json!({ "type": "ping" }));
    }
}
