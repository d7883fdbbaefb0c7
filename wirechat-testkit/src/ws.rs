//! WebSocket side of the test backend: registration, routing, presence.
//!
//! The connection lifecycle:
//! 1. Wait for a `registerUser` envelope carrying the numeric user id.
//! 2. Register the connection (a duplicate register replaces the old one),
//!    mark the user online, and tell everyone else.
//! 3. Enter the message loop, routing envelopes to recipients.
//! 4. On disconnect, unregister and broadcast the user going offline.
//!
//! Messages are always stored; they are only *forwarded* when the
//! recipient has a live socket. Offline recipients catch up over REST.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;

use wirechat_proto::codec;
use wirechat_proto::envelope::Envelope;
use wirechat_proto::outbound::{MarkAsSeen, SendMessage, StatusChange, TypingSignal};
use wirechat_proto::presence::PresenceStatus;

use crate::state::BackendState;

/// Expiry hint attached to forwarded typing signals, in milliseconds.
const TYPING_EXPIRES_MS: u64 = 3000;

/// axum handler that upgrades an HTTP request to a WebSocket connection.
pub async fn upgrade(
    ws: axum::extract::ws::WebSocketUpgrade,
    axum::extract::State(state): axum::extract::State<Arc<BackendState>>,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handles an upgraded WebSocket connection for a single user.
pub async fn handle_socket(socket: WebSocket, state: Arc<BackendState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Wait for the registerUser envelope.
    let Some(user_id) = wait_for_register(&mut ws_receiver).await else {
        tracing::warn!("socket dropped before registerUser arrived");
        return;
    };

    tracing::info!(user_id = %user_id, "user registering");

    // Channel feeding this connection's writer task.
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    if state.register_connection(user_id, tx).await.is_some() {
        tracing::info!(user_id = %user_id, "replaced existing connection (duplicate register)");
    }
    state
        .set_presence(user_id, true, PresenceStatus::Online)
        .await;
    broadcast_status(&state, user_id).await;

    // Writer task: forward channel messages onto the WebSocket.
    let writer_user_id = user_id;
    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                tracing::warn!(user_id = %writer_user_id, "WebSocket write failed");
                break;
            }
        }
    });

    // Reader loop: process incoming envelopes from this user.
    let reader_state = Arc::clone(&state);
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Text(text) => {
                    handle_frame(user_id, text.as_str(), &reader_state).await;
                }
                Message::Close(_) => {
                    tracing::info!(user_id = %user_id, "received close frame");
                    break;
                }
                _ => {
                    // Ignore binary, ping, pong frames.
                }
            }
        }
    });

    // Whichever half exits first takes the other down with it.
    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            read_task.abort();
        }
    }

    state.unregister_connection(user_id).await;
    state
        .set_presence(user_id, false, PresenceStatus::Offline)
        .await;
    broadcast_status(&state, user_id).await;
    tracing::info!(user_id = %user_id, "user disconnected and unregistered");
}

/// Waits for the first envelope, expecting `registerUser`.
///
/// Returns the user id, or `None` when the connection closes or the first
/// envelope is anything else.
async fn wait_for_register(
    receiver: &mut (impl StreamExt<Item = Result<Message, axum::Error>> + Unpin),
) -> Option<i64> {
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => match codec::decode(text.as_str()) {
                Ok(envelope) if envelope.event == "registerUser" => {
                    // The id arrives as a bare number, but tolerate a
                    // numeric string.
                    let id = envelope.data.as_i64().or_else(|| {
                        envelope.data.as_str().and_then(|raw| raw.parse().ok())
                    });
                    if id.is_none() {
                        tracing::warn!(data = %envelope.data, "registerUser without a usable id");
                    }
                    return id;
                }
                Ok(envelope) => {
                    tracing::warn!(event = %envelope.event, "expected registerUser first");
                    return None;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to decode registration frame");
                    return None;
                }
            },
            Message::Close(_) => return None,
            _ => {
                // Skip non-text frames (ping/pong) during registration.
            }
        }
    }
    None
}

/// Handles one text frame from a registered user.
async fn handle_frame(user_id: i64, frame: &str, state: &Arc<BackendState>) {
    let envelope = match codec::decode(frame) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::warn!(user_id = %user_id, error = %e, "failed to decode frame");
            return;
        }
    };

    match envelope.event.as_str() {
        "sendMessage" => match serde_json::from_value::<SendMessage>(envelope.data) {
            Ok(send) => handle_send(user_id, send, state).await,
            Err(e) => tracing::warn!(user_id = %user_id, error = %e, "bad sendMessage payload"),
        },
        "markAsSeen" => match serde_json::from_value::<MarkAsSeen>(envelope.data) {
            Ok(seen) => handle_seen(user_id, seen, state).await,
            Err(e) => tracing::warn!(user_id = %user_id, error = %e, "bad markAsSeen payload"),
        },
        "typing" => match serde_json::from_value::<TypingSignal>(envelope.data) {
            Ok(signal) => handle_typing(user_id, signal, state).await,
            Err(e) => tracing::warn!(user_id = %user_id, error = %e, "bad typing payload"),
        },
        "statusChange" => match serde_json::from_value::<StatusChange>(envelope.data) {
            Ok(change) => {
                state
                    .set_presence(user_id, change.status.appears_online(), change.status)
                    .await;
                broadcast_status(state, user_id).await;
            }
            Err(e) => tracing::warn!(user_id = %user_id, error = %e, "bad statusChange payload"),
        },
        "heartbeat" => {
            state.record_heartbeat();
            tracing::trace!(user_id = %user_id, "heartbeat");
        }
        "registerUser" => {
            tracing::warn!(user_id = %user_id, "duplicate registerUser on a live connection");
        }
        other => {
            tracing::debug!(user_id = %user_id, event = %other, "unhandled event");
        }
    }
}

/// Stores an outbound message, acknowledges it to the sender, and forwards
/// it to the recipient when connected.
async fn handle_send(user_id: i64, send: SendMessage, state: &Arc<BackendState>) {
    let to = send.to_user_id.as_i64();
    let row = state
        .insert_message(user_id, to, &send.content, send.message_type)
        .await;

    tracing::debug!(from = %user_id, to = %to, id = %row.id, "routing message");

    // Acknowledge to the sender with the server-assigned id.
    let ack = Envelope::new(
        "messageSent",
        json!({
            "id": row.id,
            "toUserId": row.to,
            "createdAt": row.created_at,
        }),
    );
    state.send_to_user(user_id, &ack).await;

    // Forward live when the recipient has a socket; offline recipients
    // pick the row up over REST.
    let forward = Envelope::new(
        "newMessage",
        json!({
            "id": row.id,
            "fromUserId": row.from,
            "content": row.content,
            "createdAt": row.created_at,
            "messageType": row.kind,
            "delivered": true,
        }),
    );
    if state.send_to_user(to, &forward).await {
        state.mark_delivered(row.id).await;
    } else {
        tracing::debug!(to = %to, "recipient offline, message stored only");
    }
}

/// Applies a seen acknowledgment and notifies the messages' author.
async fn handle_seen(user_id: i64, seen: MarkAsSeen, state: &Arc<BackendState>) {
    let author = seen.to_user_id.as_i64();
    let changed = state.mark_seen(user_id, author, &seen.message_id).await;
    tracing::debug!(reader = %user_id, author = %author, changed = %changed, "seen receipt");

    let receipt = Envelope::new(
        "messageSeen",
        json!({
            "messageId": seen.message_id,
            "fromUserId": user_id,
        }),
    );
    state.send_to_user(author, &receipt).await;
}

/// Forwards a typing signal to the conversation's peer with an expiry hint.
async fn handle_typing(user_id: i64, signal: TypingSignal, state: &Arc<BackendState>) {
    let Ok(peer) = signal.conversation_id.parse::<i64>() else {
        tracing::warn!(
            user_id = %user_id,
            conversation = %signal.conversation_id,
            "typing signal for a non-numeric conversation"
        );
        return;
    };
    let update = Envelope::new(
        "userTyping",
        json!({
            "userId": user_id,
            "isTyping": signal.is_typing,
            "expiresIn": TYPING_EXPIRES_MS,
        }),
    );
    state.send_to_user(peer, &update).await;
}

/// Tells every other connected user about this user's presence.
async fn broadcast_status(state: &Arc<BackendState>, user_id: i64) {
    let Some(user) = state.user(user_id).await else {
        return;
    };
    let update = Envelope::new(
        "userStatusChanged",
        json!({
            "userId": user.id,
            "isOnline": user.is_online,
            "status": user.status,
        }),
    );
    for other in state.connected_users().await {
        if other != user_id {
            state.send_to_user(other, &update).await;
        }
    }
}
