//! Typing indicator payloads.

use serde::{Deserialize, Serialize};

use crate::user::UserId;

/// Payload of the inbound `userTyping` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingUpdate {
    pub user_id: UserId,
    pub is_typing: bool,
    /// Milliseconds until the signal goes stale; receivers fall back on
    /// their own default window when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
}
