//! WebSocket streaming API.
//!
//! Every socket registers a bounded outbound queue with the session gateway.
//! Chat events land in that queue without ever blocking the publisher; the
//! socket loop drains it alongside inbound client frames.

#![allow(missing_docs)]

use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::HeaderMap,
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt, stream::SplitSink};
use haggle_common::AppError;
use haggle_core::{ChatEvent, SendMessageInput};
use haggle_db::entities::chat_message::MessageType;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::middleware::AppState;

/// Events a slow socket may fall behind by before new ones are dropped.
pub const OUTBOUND_QUEUE: usize = 64;

/// Streaming query parameters.
#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    /// Access token for authentication.
    #[serde(rename = "i")]
    pub token: Option<String>,
}

/// Client-to-server frame.
#[derive(Debug, Deserialize)]
#[serde(
    tag = "type",
    content = "body",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ClientFrame {
    /// Subscribe to a chat's events.
    JoinChat { chat_id: String },
    /// Drop a chat subscription.
    LeaveChat { chat_id: String },
    /// Start a typing indicator.
    TypingStart { chat_id: String },
    /// Stop a typing indicator.
    TypingStop { chat_id: String },
    /// Send a message.
    SendMessage {
        chat_id: String,
        message_type: Option<MessageType>,
        content: Option<String>,
        offer_amount: Option<i64>,
        reply_to_id: Option<String>,
    },
    /// Acknowledge messages.
    MarkRead {
        chat_id: String,
        message_ids: Option<Vec<String>>,
    },
    /// Keepalive.
    Ping,
}

/// Server-to-client frame.
#[derive(Debug, Serialize)]
#[serde(
    tag = "type",
    content = "body",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ServerFrame {
    /// Session established.
    Connected {
        connection_id: String,
        user_id: Option<String>,
    },
    /// Subscribed to a chat.
    Joined { chat_id: String },
    /// Unsubscribed from a chat.
    Left { chat_id: String },
    /// A chat event.
    Event(ChatEvent),
    /// A client frame failed.
    Error {
        code: String,
        message: String,
        chat_id: Option<String>,
    },
    /// Keepalive reply.
    Pong,
}

impl ServerFrame {
    fn error(err: &AppError, chat_id: Option<&str>) -> Self {
        Self::Error {
            code: err.error_code().to_string(),
            message: err.to_string(),
            chat_id: chat_id.map(ToString::to_string),
        }
    }
}

/// WebSocket handler for streaming.
///
/// The token comes from the `i` query parameter, falling back to an
/// `Authorization: Bearer` header.
pub async fn streaming_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let token = query.token.or_else(|| {
        headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(|v| v.trim().to_string())
    });

    ws.on_upgrade(move |socket| handle_socket(socket, token, state))
}

/// Handle a WebSocket connection.
async fn handle_socket(socket: WebSocket, token: Option<String>, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut events) = mpsc::channel::<ChatEvent>(OUTBOUND_QUEUE);

    let connection_id = state.gateway.open(tx).await;

    let user = match state
        .gateway
        .authenticate(&connection_id, token.as_deref())
        .await
    {
        Ok(user) => user,
        Err(e) => {
            warn!(error = %e, connection_id = %connection_id, "Streaming authentication failed");
            None
        }
    };

    info!(
        connection_id = %connection_id,
        user_id = ?user.as_ref().map(|u| &u.id),
        "Streaming connection established"
    );

    let hello = ServerFrame::Connected {
        connection_id: connection_id.clone(),
        user_id: user.map(|u| u.id),
    };

    if send_frame(&mut sender, &hello).await {
        loop {
            tokio::select! {
                inbound = receiver.next() => {
                    match inbound {
                        Some(Ok(Message::Text(text))) => {
                            state.gateway.touch(&connection_id).await;
                            let reply = match serde_json::from_str::<ClientFrame>(&text) {
                                Ok(frame) => handle_client_frame(&state, &connection_id, frame).await,
                                Err(e) => {
                                    debug!(error = %e, "Unparseable client frame");
                                    Some(ServerFrame::error(
                                        &AppError::BadRequest(format!("Invalid frame: {e}")),
                                        None,
                                    ))
                                }
                            };
                            if let Some(reply) = reply
                                && !send_frame(&mut sender, &reply).await
                            {
                                break;
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            state.gateway.touch(&connection_id).await;
                            if sender.send(Message::Pong(data)).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            debug!(connection_id = %connection_id, "Client closed connection");
                            break;
                        }
                        Some(Ok(_)) => {
                            state.gateway.touch(&connection_id).await;
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, connection_id = %connection_id, "WebSocket error");
                            break;
                        }
                    }
                }

                outbound = events.recv() => {
                    let Some(event) = outbound else { break };
                    if !send_frame(&mut sender, &ServerFrame::Event(event)).await {
                        break;
                    }
                }
            }
        }
    }

    state.gateway.disconnect(&connection_id).await;
    info!(connection_id = %connection_id, "Streaming connection closed");
}

/// Apply one client frame. Returns the direct reply, if any.
async fn handle_client_frame(
    state: &AppState,
    connection_id: &str,
    frame: ClientFrame,
) -> Option<ServerFrame> {
    match frame {
        ClientFrame::JoinChat { chat_id } => {
            match state.gateway.join(connection_id, &chat_id).await {
                Ok(_) => Some(ServerFrame::Joined { chat_id }),
                Err(e) => Some(ServerFrame::error(&e, Some(&chat_id))),
            }
        }
        ClientFrame::LeaveChat { chat_id } => {
            state.gateway.leave(connection_id, &chat_id).await;
            Some(ServerFrame::Left { chat_id })
        }
        ClientFrame::TypingStart { chat_id } => state
            .gateway
            .typing(connection_id, &chat_id, true)
            .await
            .err()
            .map(|e| ServerFrame::error(&e, Some(&chat_id))),
        ClientFrame::TypingStop { chat_id } => state
            .gateway
            .typing(connection_id, &chat_id, false)
            .await
            .err()
            .map(|e| ServerFrame::error(&e, Some(&chat_id))),
        ClientFrame::SendMessage {
            chat_id,
            message_type,
            content,
            offer_amount,
            reply_to_id,
        } => {
            let input = SendMessageInput {
                message_type: message_type.unwrap_or(MessageType::Text),
                content,
                offer_amount,
                reply_to_id,
            };
            // The sender's own devices see the message as a messageCreated event
            state
                .gateway
                .send_message(connection_id, &chat_id, input)
                .await
                .err()
                .map(|e| ServerFrame::error(&e, Some(&chat_id)))
        }
        ClientFrame::MarkRead {
            chat_id,
            message_ids,
        } => state
            .gateway
            .mark_read(connection_id, &chat_id, message_ids.as_deref())
            .await
            .err()
            .map(|e| ServerFrame::error(&e, Some(&chat_id))),
        ClientFrame::Ping => Some(ServerFrame::Pong),
    }
}

/// Serialize and send a frame. Returns false once the socket is gone.
async fn send_frame(sender: &mut SplitSink<WebSocket, Message>, frame: &ServerFrame) -> bool {
    let json = match serde_json::to_string(frame) {
        Ok(json) => json,
        Err(e) => {
            warn!(error = %e, "Failed to serialize server frame");
            return true;
        }
    };

    sender.send(Message::Text(json.into())).await.is_ok()
}
