//! Presence status payloads.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::user::UserId;

/// Coarse availability advertised by a peer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Away,
    Busy,
    Invisible,
    #[default]
    Offline,
}

impl PresenceStatus {
    /// Whether a presence dot for this status renders as online.
    ///
    /// `invisible` is indistinguishable from `offline` to viewers even
    /// though the server tracks it as a distinct value.
    #[must_use]
    pub const fn appears_online(self) -> bool {
        matches!(self, Self::Online | Self::Away)
    }
}

impl fmt::Display for PresenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Online => "online",
            Self::Away => "away",
            Self::Busy => "busy",
            Self::Invisible => "invisible",
            Self::Offline => "offline",
        };
        write!(f, "{name}")
    }
}

/// Payload of the inbound `userStatusChanged` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub user_id: UserId,
    pub is_online: bool,
    /// Omitted by older backends; callers fall back on `is_online`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<PresenceStatus>,
}

impl StatusUpdate {
    /// The effective status, deriving one from the online flag when the
    /// backend omitted it.
    #[must_use]
    pub fn effective_status(&self) -> PresenceStatus {
        self.status.unwrap_or(if self.is_online {
            PresenceStatus::Online
        } else {
            PresenceStatus::Offline
        })
    }
}
