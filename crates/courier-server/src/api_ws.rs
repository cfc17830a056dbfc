//! WebSocket API handler and connection management.

use crate::AppState;
use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message as AxumMessage, WebSocket},
        ConnectInfo, Extension, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use courier_relay::{DeliveryError, EventSink};
use courier_types::{InvocationInput, OutboundEvent};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{collections::HashMap, net::SocketAddr, sync::Arc};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// Outbound frames buffered per connection before pushes wait on the writer.
const CONNECTION_BUFFER: usize = 256;

/// Maximum accepted prompt length (64 KiB).
const MAX_PROMPT_LEN: usize = 65_536;

/// Messages received from the client.
#[derive(Debug, Deserialize)]
#[serde(tag = "action")]
pub enum IncomingMessage {
    #[serde(rename = "sendMessage")]
    SendMessage {
        #[serde(default)]
        prompt: Option<String>,
        #[serde(default, rename = "sessionId")]
        session_id: Option<String>,
        #[serde(default)]
        history: Option<Value>,
    },
}

/// Frames the server originates itself; relay events are sent as-is.
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum OutgoingMessage {
    #[serde(rename = "error")]
    Error { message: String },
}

/// Manages active WebSocket connections.
///
/// Cloning is cheap; all clones share the same connection table.
#[derive(Clone, Default)]
pub struct ConnectionManager {
    /// Active connections: connection id -> outbound frame sender.
    connections: Arc<RwLock<HashMap<String, mpsc::Sender<String>>>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection and returns its freshly minted id.
    pub async fn add_connection(&self, sender: mpsc::Sender<String>) -> String {
        let connection_id = Uuid::new_v4().to_string();
        self.connections
            .write()
            .await
            .insert(connection_id.clone(), sender);
        connection_id
    }

    pub async fn remove_connection(&self, connection_id: &str) {
        self.connections.write().await.remove(connection_id);
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Queues a serialized frame for one connection, waiting for buffer space.
    pub async fn send(&self, connection_id: &str, frame: String) -> Result<(), DeliveryError> {
        let sender = self
            .connections
            .read()
            .await
            .get(connection_id)
            .cloned()
            .ok_or_else(|| DeliveryError::ConnectionGone(connection_id.to_string()))?;

        sender
            .send(frame)
            .await
            .map_err(|_| DeliveryError::ConnectionGone(connection_id.to_string()))
    }

    async fn send_error(&self, connection_id: &str, message: String) {
        match serde_json::to_string(&OutgoingMessage::Error { message }) {
            Ok(json) => {
                if let Err(e) = self.send(connection_id, json).await {
                    tracing::warn!(
                        connection_id = %connection_id,
                        "failed to send WebSocket error to client: {}",
                        e
                    );
                }
            }
            Err(e) => {
                tracing::error!("failed to serialize WebSocket error message: {}", e);
            }
        }
    }
}

#[async_trait]
impl EventSink for ConnectionManager {
    async fn push(&self, connection_id: &str, event: &OutboundEvent) -> Result<(), DeliveryError> {
        let frame = event.to_frame_json()?;
        self.send(connection_id, frame).await
    }
}

/// Upgrades `GET /ws` to a WebSocket.
pub async fn ws_handler(
    Extension(state): Extension<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    tracing::debug!(remote_addr = %addr, "websocket upgrade requested");
    ws.on_upgrade(move |socket| handle_socket(socket, state, addr))
}

/// Outcome of decoding one inbound text frame.
#[derive(Debug, PartialEq)]
enum Inbound {
    Prompt {
        prompt: String,
        session_id: Option<String>,
    },
    Rejected(String),
}

fn parse_inbound(text: &str) -> Inbound {
    let incoming = match serde_json::from_str::<IncomingMessage>(text) {
        Ok(incoming) => incoming,
        Err(e) => {
            let action = serde_json::from_str::<Value>(text)
                .ok()
                .and_then(|v| v.get("action").and_then(Value::as_str).map(str::to_string));
            return match action {
                Some(action) if action != "sendMessage" => {
                    Inbound::Rejected(format!("Unsupported action: {}", action))
                }
                _ => {
                    tracing::debug!("malformed websocket message: {}", e);
                    Inbound::Rejected("Malformed message".to_string())
                }
            };
        }
    };

    let IncomingMessage::SendMessage {
        prompt,
        session_id,
        history,
    } = incoming;

    if let Some(history) = history {
        if !history.is_array() && !history.is_null() {
            tracing::warn!("ignoring history that is not a list");
        }
    }

    match prompt.map(|p| p.trim().to_string()) {
        None => Inbound::Rejected("No prompt provided".to_string()),
        Some(p) if p.is_empty() => Inbound::Rejected("No prompt provided".to_string()),
        Some(p) if p.len() > MAX_PROMPT_LEN => Inbound::Rejected(format!(
            "Prompt exceeds maximum length of {} bytes",
            MAX_PROMPT_LEN
        )),
        Some(prompt) => Inbound::Prompt {
            prompt,
            session_id: session_id.filter(|s| !s.is_empty()),
        },
    }
}

/// Handles the WebSocket connection.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, addr: SocketAddr) {
    let (mut sender, mut receiver) = socket.split();

    // Bounded so a stalled client applies backpressure to its own invocations.
    let (tx, mut rx) = mpsc::channel::<String>(CONNECTION_BUFFER);

    let connection_id = state.connection_manager.add_connection(tx).await;
    tracing::info!(connection_id = %connection_id, remote_addr = %addr, "websocket connected");

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(AxumMessage::Text(msg.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = receiver.next().await {
        let text = match msg {
            AxumMessage::Text(text) => text,
            AxumMessage::Close(_) => break,
            _ => continue,
        };

        match parse_inbound(text.as_str()) {
            Inbound::Prompt { prompt, session_id } => {
                let input = InvocationInput {
                    prompt,
                    connection_id: connection_id.clone(),
                    session_id,
                };
                let state = state.clone();
                tokio::spawn(async move {
                    let outcome = state.relay.handle(&input).await;
                    if outcome.is_success() {
                        tracing::info!(
                            connection_id = %input.connection_id,
                            status = outcome.status_code,
                            "invocation finished"
                        );
                    } else {
                        tracing::warn!(
                            connection_id = %input.connection_id,
                            status = outcome.status_code,
                            body = %outcome.body,
                            "invocation failed"
                        );
                        state
                            .connection_manager
                            .send_error(&input.connection_id, "Invocation failed".to_string())
                            .await;
                    }
                });
            }
            Inbound::Rejected(message) => {
                state
                    .connection_manager
                    .send_error(&connection_id, message)
                    .await;
            }
        }
    }

    state.connection_manager.remove_connection(&connection_id).await;
    send_task.abort();
    tracing::info!(connection_id = %connection_id, "websocket disconnected");
}
