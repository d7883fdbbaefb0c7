//! Local identity and credential state.
//!
//! The session gates the connection lifecycle: no socket connect happens
//! without a signed-in identity, and losing the session tears everything
//! down. Credentials live here behind a lock because the REST layer rotates
//! them on refresh while other components read them.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use wirechat_proto::user::UserId;

/// The signed-in local user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: UserId,
    pub email: String,
    pub display_name: String,
}

impl Identity {
    /// Creates an identity, deriving the display name from the email.
    pub fn new(id: UserId, email: impl Into<String>) -> Self {
        let email = email.into();
        let display_name = display_name_from_email(&email);
        Self {
            id,
            email,
            display_name,
        }
    }

    /// Creates an identity with an explicit display name.
    pub fn with_display_name(
        id: UserId,
        email: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            id,
            email: email.into(),
            display_name: display_name.into(),
        }
    }

    /// Avatar initials derived from the display name.
    #[must_use]
    pub fn initials(&self) -> String {
        initials(&self.display_name)
    }
}

/// The local part of an email address, or the whole string when it has no
/// `@`.
#[must_use]
pub fn display_name_from_email(email: &str) -> String {
    email.split('@').next().unwrap_or(email).to_owned()
}

/// Uppercased first letters of up to two words.
#[must_use]
pub fn initials(name: &str) -> String {
    name.split_whitespace()
        .take(2)
        .filter_map(|word| word.chars().next())
        .flat_map(char::to_uppercase)
        .collect()
}

/// Bearer credentials for the REST collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Default)]
struct SessionState {
    identity: Option<Identity>,
    credentials: Option<Credentials>,
}

/// Shared, interior-mutable session state.
///
/// Components hold this via `Arc`; the REST layer rotates credentials in
/// place on refresh so every held handle sees the new token.
#[derive(Default)]
pub struct Session {
    inner: RwLock<SessionState>,
}

impl Session {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind an identity and its credentials.
    pub fn sign_in(&self, identity: Identity, credentials: Credentials) {
        let mut state = self.inner.write();
        tracing::info!(user = %identity.id, "session signed in");
        state.identity = Some(identity);
        state.credentials = Some(credentials);
    }

    /// Replace the credentials after a refresh, keeping the identity.
    pub fn rotate_credentials(&self, credentials: Credentials) {
        self.inner.write().credentials = Some(credentials);
        tracing::debug!("session credentials rotated");
    }

    /// Bind an identity restored from a snapshot, without credentials.
    ///
    /// The session stays unauthenticated until a sign-in supplies tokens;
    /// the restored identity only labels the persisted chat data.
    pub fn restore_identity(&self, identity: Identity) {
        self.inner.write().identity = Some(identity);
    }

    /// Drop identity and credentials. Safe to call repeatedly.
    pub fn clear(&self) {
        let mut state = self.inner.write();
        if state.identity.is_some() {
            tracing::info!("session cleared");
        }
        state.identity = None;
        state.credentials = None;
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        let state = self.inner.read();
        state.identity.is_some() && state.credentials.is_some()
    }

    #[must_use]
    pub fn identity(&self) -> Option<Identity> {
        self.inner.read().identity.clone()
    }

    #[must_use]
    pub fn user_id(&self) -> Option<UserId> {
        self.inner.read().identity.as_ref().map(|i| i.id)
    }

    #[must_use]
    pub fn credentials(&self) -> Option<Credentials> {
        self.inner.read().credentials.clone()
    }

    #[must_use]
    pub fn access_token(&self) -> Option<String> {
        self.inner
            .read()
            .credentials
            .as_ref()
            .map(|c| c.access_token.clone())
    }

    #[must_use]
    pub fn refresh_token(&self) -> Option<String> {
        self.inner
            .read()
            .credentials
            .as_ref()
            .map(|c| c.refresh_token.clone())
    }
}
