//! WebSocket endpoint for the push gateway.
//!
//! Clients connect to `/ws` with a bearer token and may then join or leave
//! project and sprint rooms:
//!
//! ```json
//! {"event": "join-project", "data": 7}
//! ```
//!
//! Server frames have the same shape, `{"event": ..., "data": ...}`.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use scrumflow_core::defaults;

use super::auth::{extract_token, Claims};
use super::push::Gateway;
use super::registry::{ConnectionId, Room};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct WsParams {
    token: Option<String>,
}

/// A room command sent by a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomCommand {
    Join(Room),
    Leave(Room),
}

#[derive(Deserialize)]
struct ClientFrame {
    event: String,
    #[serde(default)]
    data: JsonValue,
}

/// Parse a client frame. Unknown events and non-numeric ids yield `None`.
pub fn parse_client_frame(text: &str) -> Option<RoomCommand> {
    let frame: ClientFrame = serde_json::from_str(text).ok()?;
    let id = match &frame.data {
        JsonValue::Number(n) => n.as_i64()?,
        JsonValue::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    match frame.event.as_str() {
        "join-project" => Some(RoomCommand::Join(Room::Project(id))),
        "join-sprint" => Some(RoomCommand::Join(Room::Sprint(id))),
        "leave-project" => Some(RoomCommand::Leave(Room::Project(id))),
        "leave-sprint" => Some(RoomCommand::Leave(Room::Sprint(id))),
        _ => None,
    }
}

/// WebSocket upgrade handler.
///
/// The upgrade always completes; a missing or invalid token closes the socket
/// straight away without sending anything.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let gateway = state.gateway.clone();
    let claims = match extract_token(params.token, &headers) {
        Some(token) => match gateway.authenticate(&token) {
            Ok(claims) => Some(claims),
            Err(e) => {
                warn!(subsystem = "gateway", error = %e, "WebSocket authentication failed");
                None
            }
        },
        None => {
            debug!(subsystem = "gateway", "WebSocket connection without token");
            None
        }
    };

    ws.on_upgrade(move |socket| async move {
        match claims {
            Some(claims) => handle_connection(socket, gateway, claims).await,
            None => close_unauthenticated(socket).await,
        }
    })
}

async fn close_unauthenticated(mut socket: WebSocket) {
    let _ = socket.send(Message::Close(None)).await;
}

async fn handle_connection(socket: WebSocket, gateway: Gateway, claims: Claims) {
    let conn_id: ConnectionId = Uuid::now_v7();
    let user_id = claims.user_id;
    let (frame_tx, mut frame_rx) = mpsc::unbounded_channel::<String>();
    gateway.registry().register(conn_id, user_id, frame_tx);
    info!(subsystem = "gateway", connection_id = %conn_id, user_id, "Client connected");

    let (mut sender, mut receiver) = socket.split();

    let mut send_task = tokio::spawn(async move {
        let mut ping_interval =
            tokio::time::interval(Duration::from_secs(defaults::WS_PING_INTERVAL_SECS));
        // The first tick completes immediately.
        ping_interval.tick().await;
        loop {
            tokio::select! {
                frame = frame_rx.recv() => {
                    let Some(frame) = frame else { break };
                    if sender.send(Message::Text(frame)).await.is_err() {
                        break;
                    }
                }
                _ = ping_interval.tick() => {
                    if sender.send(Message::Ping(vec![])).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let registry = gateway.registry().clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match parse_client_frame(&text) {
                    Some(RoomCommand::Join(room)) => {
                        registry.join(conn_id, room);
                        debug!(subsystem = "gateway", connection_id = %conn_id, room = %room, "Joined room");
                    }
                    Some(RoomCommand::Leave(room)) => {
                        registry.leave(conn_id, room);
                        debug!(subsystem = "gateway", connection_id = %conn_id, room = %room, "Left room");
                    }
                    None => {
                        debug!(subsystem = "gateway", connection_id = %conn_id, "Ignoring client frame");
                    }
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    gateway.registry().unregister(conn_id);
    info!(subsystem = "gateway", connection_id = %conn_id, user_id, "Client disconnected");
}
