//! Seeded in-memory backend state shared by the REST and socket layers.
//!
//! [`BackendState`] plays the part of the real backend's database plus its
//! socket registry: users, message rows, bearer tokens, and one delivery
//! channel per connected user. Tests seed it directly and inspect it after
//! driving the client.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use axum::extract::ws::Message;
use tokio::sync::{RwLock, mpsc};

use wirechat_proto::codec;
use wirechat_proto::envelope::Envelope;
use wirechat_proto::message::MessageKind;
use wirechat_proto::presence::PresenceStatus;

/// Messages returned per history page.
pub const PAGE_SIZE: usize = 50;

/// One seeded account.
#[derive(Debug, Clone, PartialEq)]
pub struct TestUser {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub is_online: bool,
    pub status: PresenceStatus,
}

/// One stored message row.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMessage {
    pub id: i64,
    pub from: i64,
    pub to: i64,
    pub content: String,
    pub kind: MessageKind,
    pub created_at: String,
    pub delivered: bool,
    pub seen: bool,
}

/// One conversation row as the list endpoint reports it.
#[derive(Debug, Clone)]
pub struct SummaryRow {
    pub peer: TestUser,
    pub last: Option<StoredMessage>,
    pub unread: u32,
}

/// The whole backend world behind both the REST and socket surfaces.
pub struct BackendState {
    users: RwLock<HashMap<i64, TestUser>>,
    /// Message rows in insertion order; history pages slice this.
    messages: RwLock<Vec<StoredMessage>>,
    next_message_id: AtomicI64,
    access_tokens: RwLock<HashMap<String, i64>>,
    refresh_tokens: RwLock<HashMap<String, i64>>,
    next_token: AtomicU64,
    /// Maps user id to the channel feeding its WebSocket writer task.
    connections: RwLock<HashMap<i64, mpsc::UnboundedSender<Message>>>,
    /// Every `(reader, peer)` pair a read acknowledgment arrived for.
    read_marks: RwLock<Vec<(i64, i64)>>,
    heartbeats: AtomicU64,
}

impl Default for BackendState {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendState {
    /// Creates an empty world.
    #[must_use]
    pub fn new() -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            messages: RwLock::new(Vec::new()),
            next_message_id: AtomicI64::new(1),
            access_tokens: RwLock::new(HashMap::new()),
            refresh_tokens: RwLock::new(HashMap::new()),
            next_token: AtomicU64::new(1),
            connections: RwLock::new(HashMap::new()),
            read_marks: RwLock::new(Vec::new()),
            heartbeats: AtomicU64::new(0),
        }
    }

    // ---- users and credentials ----

    /// Seeds an account. Re-adding an id overwrites it.
    pub async fn add_user(&self, id: i64, name: &str, email: &str) {
        let mut users = self.users.write().await;
        users.insert(
            id,
            TestUser {
                id,
                name: name.to_owned(),
                email: email.to_owned(),
                is_online: false,
                status: PresenceStatus::Offline,
            },
        );
    }

    pub async fn user(&self, id: i64) -> Option<TestUser> {
        self.users.read().await.get(&id).cloned()
    }

    /// Issues a fresh `(access, refresh)` token pair for a user.
    pub async fn issue_tokens(&self, user_id: i64) -> (String, String) {
        let serial = self.next_token.fetch_add(1, Ordering::Relaxed);
        let access = format!("access-{serial}");
        let refresh = format!("refresh-{serial}");
        self.access_tokens
            .write()
            .await
            .insert(access.clone(), user_id);
        self.refresh_tokens
            .write()
            .await
            .insert(refresh.clone(), user_id);
        (access, refresh)
    }

    /// Invalidates one access token; the paired refresh token keeps working.
    pub async fn revoke_access(&self, token: &str) -> bool {
        self.access_tokens.write().await.remove(token).is_some()
    }

    /// Invalidates every token a user holds, so the refresh flow fails too.
    pub async fn revoke_user(&self, user_id: i64) {
        self.access_tokens
            .write()
            .await
            .retain(|_, owner| *owner != user_id);
        self.refresh_tokens
            .write()
            .await
            .retain(|_, owner| *owner != user_id);
    }

    /// Resolves a bearer token to a user id.
    pub async fn authenticate(&self, bearer: &str) -> Option<i64> {
        self.access_tokens.read().await.get(bearer).copied()
    }

    /// Exchanges a refresh token for a new pair, invalidating the old one.
    pub async fn rotate(&self, refresh_token: &str) -> Option<(String, String)> {
        let user_id = self.refresh_tokens.write().await.remove(refresh_token)?;
        Some(self.issue_tokens(user_id).await)
    }

    // ---- socket registry ----

    /// Registers a connection, returning the previous sender when the user
    /// was already connected. The replaced channel closes, which shuts the
    /// old writer task down.
    pub async fn register_connection(
        &self,
        user_id: i64,
        sender: mpsc::UnboundedSender<Message>,
    ) -> Option<mpsc::UnboundedSender<Message>> {
        self.connections.write().await.insert(user_id, sender)
    }

    pub async fn unregister_connection(
        &self,
        user_id: i64,
    ) -> Option<mpsc::UnboundedSender<Message>> {
        self.connections.write().await.remove(&user_id)
    }

    pub async fn connected(&self, user_id: i64) -> bool {
        self.connections.read().await.contains_key(&user_id)
    }

    /// Ids of every currently connected user.
    pub async fn connected_users(&self) -> Vec<i64> {
        self.connections.read().await.keys().copied().collect()
    }

    /// Encodes an envelope and pushes it down a user's socket. Returns
    /// `false` when the user is not connected or the frame could not be
    /// queued.
    pub async fn send_to_user(&self, user_id: i64, envelope: &Envelope) -> bool {
        let Some(sender) = self.connections.read().await.get(&user_id).cloned() else {
            return false;
        };
        match codec::encode(envelope) {
            Ok(frame) => sender.send(Message::Text(frame.into())).is_ok(),
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode injected envelope");
                false
            }
        }
    }

    /// Sends a Close frame to every connected user, simulating the backend
    /// dropping its sockets.
    pub async fn close_all_connections(&self) {
        let connections = self.connections.read().await;
        for (user_id, sender) in connections.iter() {
            tracing::info!(user_id = %user_id, "sending close frame");
            let _ = sender.send(Message::Close(None));
        }
    }

    /// Flips a user's advertised presence.
    pub async fn set_presence(&self, user_id: i64, is_online: bool, status: PresenceStatus) {
        let mut users = self.users.write().await;
        if let Some(user) = users.get_mut(&user_id) {
            user.is_online = is_online;
            user.status = status;
        }
    }

    // ---- messages ----

    /// Stores a message and returns the full row, id and timestamp assigned.
    pub async fn insert_message(
        &self,
        from: i64,
        to: i64,
        content: &str,
        kind: MessageKind,
    ) -> StoredMessage {
        let id = self.next_message_id.fetch_add(1, Ordering::Relaxed);
        let row = StoredMessage {
            id,
            from,
            to,
            content: content.to_owned(),
            kind,
            created_at: chrono::Utc::now().to_rfc3339(),
            delivered: false,
            seen: false,
        };
        self.messages.write().await.push(row.clone());
        row
    }

    /// Seeds a historical message; returns its id.
    pub async fn seed_message(&self, from: i64, to: i64, content: &str, seen: bool) -> i64 {
        let row = self
            .insert_message(from, to, content, MessageKind::Text)
            .await;
        if seen {
            let mut messages = self.messages.write().await;
            if let Some(stored) = messages.iter_mut().find(|m| m.id == row.id) {
                stored.seen = true;
                stored.delivered = true;
            }
        }
        row.id
    }

    /// Flags a message as handed to its recipient's live socket.
    pub async fn mark_delivered(&self, message_id: i64) {
        let mut messages = self.messages.write().await;
        if let Some(row) = messages.iter_mut().find(|m| m.id == message_id) {
            row.delivered = true;
        }
    }

    /// Marks messages sent by `peer` to `reader` as seen.
    ///
    /// `message_id` of `"latest"` covers all of them; a concrete id covers
    /// one row. Returns how many rows changed.
    pub async fn mark_seen(&self, reader: i64, peer: i64, message_id: &str) -> u32 {
        let concrete: Option<i64> = if message_id == "latest" {
            None
        } else {
            // A malformed id matches nothing rather than everything.
            match message_id.parse() {
                Ok(id) => Some(id),
                Err(_) => return 0,
            }
        };
        let mut changed = 0;
        let mut messages = self.messages.write().await;
        for row in messages.iter_mut() {
            if row.from == peer && row.to == reader && !row.seen {
                if let Some(id) = concrete
                    && row.id != id
                {
                    continue;
                }
                row.seen = true;
                changed += 1;
            }
        }
        changed
    }

    /// The REST read acknowledgment: marks the conversation seen and
    /// records the call for later inspection.
    pub async fn mark_read(&self, reader: i64, peer: i64) -> u32 {
        self.read_marks.write().await.push((reader, peer));
        self.mark_seen(reader, peer, "latest").await
    }

    /// How many read acknowledgments arrived for a `(reader, peer)` pair.
    pub async fn read_mark_count(&self, reader: i64, peer: i64) -> usize {
        self.read_marks
            .read()
            .await
            .iter()
            .filter(|(r, p)| *r == reader && *p == peer)
            .count()
    }

    /// Conversation rows for a user, most recent activity first.
    pub async fn summaries_for(&self, user_id: i64) -> Vec<SummaryRow> {
        let messages = self.messages.read().await;
        let users = self.users.read().await;

        // Collect the latest message and unread count per partner.
        let mut latest: HashMap<i64, StoredMessage> = HashMap::new();
        let mut unread: HashMap<i64, u32> = HashMap::new();
        for row in messages.iter() {
            let partner = if row.from == user_id {
                row.to
            } else if row.to == user_id {
                row.from
            } else {
                continue;
            };
            latest.insert(partner, row.clone());
            if row.to == user_id && !row.seen {
                *unread.entry(partner).or_default() += 1;
            }
        }

        let mut rows: Vec<SummaryRow> = latest
            .into_iter()
            .filter_map(|(partner, last)| {
                users.get(&partner).map(|peer| SummaryRow {
                    peer: peer.clone(),
                    unread: unread.get(&partner).copied().unwrap_or(0),
                    last: Some(last),
                })
            })
            .collect();
        // Newest conversation first, matching the list endpoint contract.
        rows.sort_by(|a, b| {
            let a_id = a.last.as_ref().map_or(0, |m| m.id);
            let b_id = b.last.as_ref().map_or(0, |m| m.id);
            b_id.cmp(&a_id)
        });
        rows
    }

    /// One page of the conversation between two users, oldest first within
    /// the page. Page 1 is the most recent slice.
    pub async fn history(&self, user_id: i64, peer: i64, page: u32) -> (Vec<StoredMessage>, bool) {
        let messages = self.messages.read().await;
        let thread: Vec<StoredMessage> = messages
            .iter()
            .filter(|m| {
                (m.from == user_id && m.to == peer) || (m.from == peer && m.to == user_id)
            })
            .cloned()
            .collect();

        let page = usize::try_from(page.max(1)).unwrap_or(1);
        let upper = thread.len().saturating_sub((page - 1) * PAGE_SIZE);
        let lower = upper.saturating_sub(PAGE_SIZE);
        let has_more = lower > 0;
        (thread[lower..upper].to_vec(), has_more)
    }

    /// Case-insensitive name or email search, excluding one id.
    pub async fn search(&self, query: &str, exclude: Option<i64>) -> Vec<TestUser> {
        let needle = query.to_lowercase();
        let users = self.users.read().await;
        let mut matches: Vec<TestUser> = users
            .values()
            .filter(|user| Some(user.id) != exclude)
            .filter(|user| {
                user.name.to_lowercase().contains(&needle)
                    || user.email.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect();
        matches.sort_by_key(|user| user.id);
        matches
    }

    // ---- diagnostics ----

    pub fn record_heartbeat(&self) {
        self.heartbeats.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn heartbeat_count(&self) -> u64 {
        self.heartbeats.load(Ordering::Relaxed)
    }

    /// Snapshot of one stored row, for assertions.
    pub async fn message(&self, id: i64) -> Option<StoredMessage> {
        self.messages.read().await.iter().find(|m| m.id == id).cloned()
    }

    /// All rows between two users, oldest first.
    pub async fn thread(&self, a: i64, b: i64) -> Vec<StoredMessage> {
        let messages = self.messages.read().await;
        messages
            .iter()
            .filter(|m| (m.from == a && m.to == b) || (m.from == b && m.to == a))
            .cloned()
            .collect()
    }
}
