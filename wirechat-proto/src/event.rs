//! Inbound event demultiplexing.

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::ack::{SeenReceipt, SendReceipt};
use crate::envelope::Envelope;
use crate::message::WireMessage;
use crate::presence::StatusUpdate;
use crate::typing::TypingUpdate;

/// A recognized event tag whose payload does not match its documented shape.
#[derive(Debug, Error)]
#[error("malformed {event} payload: {source}")]
pub struct MalformedEvent {
    pub event: String,
    #[source]
    pub source: serde_json::Error,
}

/// Every socket event the client understands, plus a passthrough variant for
/// tags added server-side after this build shipped.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    NewMessage(WireMessage),
    MessageSent(SendReceipt),
    MessageSeen(SeenReceipt),
    StatusChanged(StatusUpdate),
    Typing(TypingUpdate),
    /// Group chat is not modeled client-side; the payload is forwarded as-is.
    GroupMessage(Value),
    ServerError(Value),
    Unknown { event: String, data: Value },
}

impl InboundEvent {
    /// Refines a decoded envelope into a typed event.
    ///
    /// Unknown tags are preserved verbatim in [`InboundEvent::Unknown`] so
    /// that subscribers registered by name still hear them.
    ///
    /// # Errors
    ///
    /// Returns [`MalformedEvent`] when a recognized tag carries data that
    /// does not deserialize to its payload type.
    pub fn from_envelope(envelope: Envelope) -> Result<Self, MalformedEvent> {
        let Envelope { event, data, .. } = envelope;
        match event.as_str() {
            "newMessage" => parse(&event, data).map(Self::NewMessage),
            "messageSent" => parse(&event, data).map(Self::MessageSent),
            "messageSeen" => parse(&event, data).map(Self::MessageSeen),
            "userStatusChanged" => parse(&event, data).map(Self::StatusChanged),
            "userTyping" => parse(&event, data).map(Self::Typing),
            "groupMessage" => Ok(Self::GroupMessage(data)),
            "error" => Ok(Self::ServerError(data)),
            _ => Ok(Self::Unknown { event, data }),
        }
    }

    /// The event name used for local subscriber dispatch.
    ///
    /// Message events are renamed from their wire tags; status and typing
    /// keep the wire tag, matching what subscribers historically listened
    /// for.
    #[must_use]
    pub fn local_name(&self) -> &str {
        match self {
            Self::NewMessage(_) => "message",
            Self::MessageSent(_) => "message-sent",
            Self::MessageSeen(_) => "message-seen",
            Self::StatusChanged(_) => "userStatusChanged",
            Self::Typing(_) => "userTyping",
            Self::GroupMessage(_) => "group-message",
            Self::ServerError(_) => "socket-error",
            Self::Unknown { event, .. } => event,
        }
    }

    /// The payload as the untyped value local subscribers receive.
    #[must_use]
    pub fn to_payload(&self) -> Value {
        match self {
            Self::NewMessage(msg) => to_value(msg),
            Self::MessageSent(receipt) => to_value(receipt),
            Self::MessageSeen(receipt) => to_value(receipt),
            Self::StatusChanged(update) => to_value(update),
            Self::Typing(update) => to_value(update),
            Self::GroupMessage(data) | Self::ServerError(data) | Self::Unknown { data, .. } => {
                data.clone()
            }
        }
    }
}

fn parse<T: DeserializeOwned>(event: &str, data: Value) -> Result<T, MalformedEvent> {
    serde_json::from_value(data).map_err(|source| MalformedEvent {
        event: event.to_owned(),
        source,
    })
}

// Typed payloads were parsed from JSON, so turning them back cannot fail.
fn to_value<T: serde::Serialize>(payload: &T) -> Value {
    serde_json::to_value(payload).unwrap_or(Value::Null)
}
