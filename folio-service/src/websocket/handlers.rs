//! WebSocket connection handling.

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::messages::{ClientMessage, ServerMessage};
use super::registry::LiveRegistry;

/// Drive one WebSocket connection until the client goes away.
///
/// The session is registered for the lifetime of the socket and removed on
/// close, so nothing is published to dead connections.
pub async fn handle_ws_connection(socket: WebSocket, registry: Arc<LiveRegistry>) {
    let session_id = uuid::Uuid::new_v4().to_string();
    info!(session_id = %session_id, "New WebSocket connection");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (msg_tx, mut msg_rx) = mpsc::unbounded_channel::<ServerMessage>();
    registry.add_connection(session_id.clone(), msg_tx);

    let send_session = session_id.clone();
    let send_task = tokio::spawn(async move {
        while let Some(msg) = msg_rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(json) => {
                    if ws_tx.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    error!(error = %e, "Failed to serialize WebSocket message");
                }
            }
        }
        debug!(session_id = %send_session, "WebSocket send task ended");
    });

    while let Some(result) = ws_rx.next().await {
        match result {
            Ok(Message::Text(text)) => {
                handle_client_message(&session_id, text.as_str(), &registry);
            }
            Ok(Message::Binary(data)) => {
                if let Ok(text) = String::from_utf8(data.to_vec()) {
                    handle_client_message(&session_id, text.as_str(), &registry);
                }
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(session_id = %session_id, "WebSocket connection closed by client");
                break;
            }
            Err(e) => {
                error!(session_id = %session_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    registry.remove_connection(&session_id);
    send_task.abort();
    info!(session_id = %session_id, "WebSocket connection closed");
}

fn handle_client_message(session_id: &str, text: &str, registry: &LiveRegistry) {
    let msg: ClientMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            warn!(session_id = %session_id, error = %e, "Failed to parse client message");
            registry.send_to(
                session_id,
                ServerMessage::Error {
                    code: "parse_error".to_string(),
                    message: format!("Failed to parse message: {}", e),
                    recoverable: true,
                },
            );
            return;
        }
    };

    match msg {
        ClientMessage::Subscribe { owner_id } => {
            if owner_id.trim().is_empty() {
                registry.send_to(
                    session_id,
                    ServerMessage::Error {
                        code: "invalid_owner".to_string(),
                        message: "ownerId must not be empty".to_string(),
                        recoverable: true,
                    },
                );
                return;
            }
            registry.subscribe(session_id, &owner_id);
            debug!(session_id = %session_id, owner_id = %owner_id, "Subscribed to document updates");
            registry.send_to(session_id, ServerMessage::Subscribed { owner_id });
        }
        ClientMessage::Unsubscribe => {
            registry.unsubscribe(session_id);
            debug!(session_id = %session_id, "Unsubscribed from document updates");
            registry.send_to(session_id, ServerMessage::Unsubscribed);
        }
        ClientMessage::Ping => {
            let timestamp = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0);
            registry.send_to(session_id, ServerMessage::Pong { timestamp });
        }
    }
}
