//! Real-time event stream over WebSocket
//!
//! The handshake requires a bearer credential (query param or
//! `Authorization: Bearer` header) validated before any subscription
//! exists. A connection is auto-subscribed to its user topic and can
//! subscribe/unsubscribe per conversation. Delivery is best-effort with
//! no replay buffer: a client that falls behind or disconnects misses
//! the gap and reconciles with a pull-based refresh.

use std::collections::HashMap;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use unibox_core::events::{EventEnvelope, Topic, TopicHub};

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub access_token: Option<String>,
    pub user_id: String,
}

/// Operations a client may send on an open connection
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum ClientOp {
    Subscribe { conversation_id: String },
    Unsubscribe { conversation_id: String },
}

fn bearer_from(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(ToString::to_string)
}

/// WebSocket upgrade with credential check before any subscription
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let token = query
        .access_token
        .clone()
        .or_else(|| bearer_from(&headers))
        .unwrap_or_default();

    if let Err(e) = state.auth.validate(&token) {
        warn!(user_id = %query.user_id, "websocket handshake rejected: {}", e);
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "invalid credential" })),
        )
            .into_response();
    }

    let hub = state.hub.clone();
    let user_id = query.user_id;
    ws.on_upgrade(move |socket| handle_socket(socket, hub, user_id))
}

/// Forward one topic's events into the connection's funnel
fn spawn_forwarder(
    hub: TopicHub,
    topic: Topic,
    events_tx: mpsc::UnboundedSender<EventEnvelope>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut rx = hub.subscribe(topic).await;
        loop {
            match rx.recv().await {
                Ok(envelope) => {
                    if events_tx.send(envelope).is_err() {
                        break;
                    }
                }
                // Lagged: the gap is lost by design, keep streaming
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    debug!(missed, "subscriber lagged, dropping events");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

async fn handle_socket(mut socket: WebSocket, hub: TopicHub, user_id: String) {
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let mut subscriptions: HashMap<String, JoinHandle<()>> = HashMap::new();

    // Device-spanning channel for this user, always on
    let user_task = spawn_forwarder(hub.clone(), Topic::user(user_id.clone()), events_tx.clone());

    debug!(user_id = %user_id, "websocket connected");

    loop {
        tokio::select! {
            Some(envelope) = events_rx.recv() => {
                let frame = json!({
                    "event": envelope.event,
                    "data": envelope.data,
                    "timestamp": envelope.timestamp,
                });
                if socket.send(Message::Text(frame.to_string())).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientOp>(&text) {
                            Ok(ClientOp::Subscribe { conversation_id }) => {
                                if !subscriptions.contains_key(&conversation_id) {
                                    let task = spawn_forwarder(
                                        hub.clone(),
                                        Topic::conversation(conversation_id.clone()),
                                        events_tx.clone(),
                                    );
                                    subscriptions.insert(conversation_id.clone(), task);
                                }
                                let ack = json!({
                                    "event": "subscribed",
                                    "data": { "conversation_id": conversation_id },
                                    "timestamp": chrono::Utc::now(),
                                });
                                if socket.send(Message::Text(ack.to_string())).await.is_err() {
                                    break;
                                }
                            }
                            Ok(ClientOp::Unsubscribe { conversation_id }) => {
                                if let Some(task) = subscriptions.remove(&conversation_id) {
                                    task.abort();
                                }
                            }
                            Err(e) => {
                                debug!("ignoring malformed client op: {}", e);
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("websocket receive error: {}", e);
                        break;
                    }
                }
            }
        }
    }

    user_task.abort();
    for (_, task) in subscriptions {
        task.abort();
    }
    debug!(user_id = %user_id, "websocket disconnected");
}
