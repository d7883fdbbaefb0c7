//! Delivery and seen acknowledgment payloads.

use serde::{Deserialize, Serialize};

use crate::message::flexible_id;
use crate::user::UserId;

/// Sentinel accepted in place of a concrete id by seen-receipts, meaning
/// every outstanding outbound message for the peer.
pub const LATEST_MESSAGE: &str = "latest";

/// Payload of the inbound `messageSent` acknowledgment.
///
/// `id` is the server-assigned id that replaces the client's temporary id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendReceipt {
    #[serde(deserialize_with = "flexible_id")]
    pub id: String,
    pub to_user_id: UserId,
    pub created_at: String,
}

/// Payload of the inbound `messageSeen` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeenReceipt {
    #[serde(deserialize_with = "flexible_id")]
    pub message_id: String,
    pub from_user_id: UserId,
}

impl SeenReceipt {
    /// True when the receipt covers every outbound message for the peer
    /// rather than one concrete id.
    #[must_use]
    pub fn covers_latest(&self) -> bool {
        self.message_id == LATEST_MESSAGE
    }
}
