//! Message payloads.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::user::UserId;

/// Coarse payload classification carried with every message.
///
/// Delivery of non-text bodies is out of scope for the client; the kind is
/// round-tripped so a future renderer can branch on it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    File,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::File => "file",
        };
        write!(f, "{name}")
    }
}

/// Payload of the inbound `newMessage` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    /// Server-assigned message id.
    #[serde(deserialize_with = "flexible_id")]
    pub id: String,
    pub from_user_id: UserId,
    pub content: String,
    /// Server-side creation time, as the server formatted it.
    pub created_at: String,
    #[serde(default)]
    pub message_type: MessageKind,
    #[serde(default)]
    pub delivered: bool,
}

/// Accepts a message id sent as either a JSON number or a string.
///
/// Backends are inconsistent about this; the client always keys by the
/// string form.
pub(crate) fn flexible_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(i64),
        Text(String),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Num(n) => n.to_string(),
        Raw::Text(s) => s,
    })
}
