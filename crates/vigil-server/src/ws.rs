//! WebSocket endpoint for live subscriptions.
//!
//! Clients send JSON `{type: "subscribe"|"unsubscribe"|"ping", topics?: []}`
//! and receive the bus frames matching their subscription. The server pings
//! every 30s and closes clients that have not answered within 60s. Eviction
//! by the bus (slow consumer) surfaces here as a closed frame channel.

use crate::state::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use serde::Deserialize;
use std::time::{Duration, Instant};

const PING_INTERVAL: Duration = Duration::from_secs(30);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Deserialize)]
struct ClientMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    topics: Vec<String>,
}

pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| client_loop(socket, state))
}

async fn client_loop(mut socket: WebSocket, state: AppState) {
    let (subscriber, mut frames) = state.bus.add_subscriber();
    let id = subscriber.id();
    tracing::info!(id, "WebSocket client connected");

    let mut ping_tick = tokio::time::interval(PING_INTERVAL);
    ping_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut last_seen = Instant::now();

    loop {
        tokio::select! {
            frame = frames.recv() => {
                match frame {
                    Some(frame) => {
                        if socket.send(Message::Text(frame.into())).await.is_err() {
                            break;
                        }
                    }
                    // Sender dropped: the bus evicted us.
                    None => break,
                }
            }
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        last_seen = Instant::now();
                        handle_client_message(&subscriber, &mut socket, &text).await;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_seen = Instant::now();
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(id, error = %e, "WebSocket read error");
                        break;
                    }
                }
            }
            _ = ping_tick.tick() => {
                if last_seen.elapsed() > CLIENT_TIMEOUT {
                    tracing::info!(id, "WebSocket client timed out");
                    break;
                }
                if socket.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
        }
    }

    state.bus.remove_subscriber(id);
    tracing::info!(id, "WebSocket client disconnected");
}

async fn handle_client_message(
    subscriber: &crate::bus::Subscriber,
    socket: &mut WebSocket,
    text: &str,
) {
    let msg: ClientMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            tracing::debug!(error = %e, "Unparseable client message");
            return;
        }
    };

    match msg.kind.as_str() {
        "subscribe" => subscriber.subscribe(&msg.topics),
        "unsubscribe" => subscriber.unsubscribe(&msg.topics),
        "ping" => {
            let _ = socket
                .send(Message::Text(r#"{"type":"pong"}"#.to_string().into()))
                .await;
        }
        other => {
            tracing::warn!(kind = other, "Unknown client message type");
        }
    }
}
