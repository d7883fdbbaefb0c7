//! Client-to-server payloads and their envelope constructors.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::envelope::{Envelope, Timestamp};
use crate::message::MessageKind;
use crate::presence::PresenceStatus;
use crate::user::UserId;

/// Payload of the outbound `sendMessage` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    pub to_user_id: UserId,
    pub content: String,
    pub message_type: MessageKind,
}

/// Payload of the outbound `markAsSeen` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkAsSeen {
    /// A concrete message id, or [`crate::ack::LATEST_MESSAGE`].
    pub message_id: String,
    pub to_user_id: UserId,
}

/// Payload of the outbound `typing` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingSignal {
    /// The peer's conversation key in its string form.
    pub conversation_id: String,
    pub is_typing: bool,
}

/// Payload of the outbound `statusChange` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChange {
    pub status: PresenceStatus,
}

/// Envelope announcing the local identity after connect.
///
/// The payload is the bare numeric id, not an object.
#[must_use]
pub fn register_user(id: UserId) -> Envelope {
    Envelope::new("registerUser", json!(id.as_i64()))
}

/// Envelope carrying an outbound chat message.
#[must_use]
pub fn send_message(payload: &SendMessage) -> Envelope {
    Envelope::new("sendMessage", to_value(payload))
}

/// Envelope acknowledging that the peer's messages were seen.
#[must_use]
pub fn mark_as_seen(payload: &MarkAsSeen) -> Envelope {
    Envelope::new("markAsSeen", to_value(payload))
}

/// Envelope broadcasting the local typing state for one conversation.
#[must_use]
pub fn typing(payload: &TypingSignal) -> Envelope {
    Envelope::new("typing", to_value(payload))
}

/// Envelope changing the local user's advertised status.
#[must_use]
pub fn status_change(status: PresenceStatus) -> Envelope {
    Envelope::new("statusChange", to_value(&StatusChange { status }))
}

/// Keepalive envelope; the payload repeats the send time.
#[must_use]
pub fn heartbeat() -> Envelope {
    Envelope::new("heartbeat", json!({ "timestamp": Timestamp::now().as_millis() }))
}

// Outbound payloads hold only strings, numbers, and unit enums, which
// always serialize.
fn to_value<T: Serialize>(payload: &T) -> Value {
    serde_json::to_value(payload).unwrap_or(Value::Null)
}
