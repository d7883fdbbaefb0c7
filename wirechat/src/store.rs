//! Conversation store: the single source of truth for chat state.
//!
//! Holds the conversation list, the per-peer message history, and the
//! active-conversation projection behind one mutex. Mutations are
//! synchronous critical sections; network calls happen outside the lock and
//! bracket a state transition. Outbound sends are optimistic — a message is
//! inserted as pending before the backend hears about it, then reconciled
//! by the `messageSent` acknowledgment or moved to an explicit failed state
//! with retry and discard actions.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use wirechat_proto::ack::{LATEST_MESSAGE, SeenReceipt, SendReceipt};
use wirechat_proto::message::{MessageKind, WireMessage};
use wirechat_proto::outbound;
use wirechat_proto::presence::StatusUpdate;
use wirechat_proto::user::UserId;

use crate::rest::{ApiError, ChatApi, ConversationSummary, HistoryMessage, PeerProfile};
use crate::socket::SocketClient;
use crate::transport::Connector;

/// Capacity of the store's notification channel.
const EVENT_BUFFER: usize = 64;

/// Window during which repeated read-receipts for one peer collapse into a
/// single network call.
const READ_COOLDOWN: Duration = Duration::from_secs(1);

/// Prefix of locally-generated ids for messages awaiting acknowledgment.
const TEMP_ID_PREFIX: &str = "temp-";

/// Errors from store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend request behind this operation failed.
    #[error("backend request failed: {0}")]
    Api(#[from] ApiError),

    /// The peer id is not a well-formed numeric id.
    #[error("invalid peer id: {0:?}")]
    InvalidPeer(String),

    /// No message with the given id exists for the peer.
    #[error("no message {0}")]
    UnknownMessage(String),
}

/// Who authored a message, from the local user's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Mine,
    Theirs,
}

/// Delivery lifecycle of a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryState {
    /// Optimistic local insert awaiting the server acknowledgment.
    Pending,
    /// Acknowledged by the backend (or sourced from it).
    Delivered,
    /// The send is known lost; the caller may retry or discard.
    Failed(String),
}

/// One message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Server-assigned id, or a `temp-` id until reconciled.
    pub id: String,
    pub text: String,
    pub direction: Direction,
    /// Display time, already formatted for rendering.
    pub timestamp: String,
    pub delivered: bool,
    pub seen: bool,
    pub kind: MessageKind,
    pub state: DeliveryState,
}

impl Message {
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.state == DeliveryState::Pending
    }

    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self.state, DeliveryState::Failed(_))
    }

    /// Builds the local form of a history row. Direction is inferred from
    /// the sender: the peer authored it, or the local user did.
    fn from_history(row: &HistoryMessage, peer: UserId) -> Self {
        let direction = if row.from_user_id == peer {
            Direction::Theirs
        } else {
            Direction::Mine
        };
        Self {
            id: row.id.clone(),
            text: row.content.clone(),
            direction,
            timestamp: display_time(&row.created_at),
            delivered: row.delivered,
            seen: row.seen,
            kind: row.message_type,
            state: DeliveryState::Delivered,
        }
    }
}

/// One conversation, keyed by the peer's user id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub peer: PeerProfile,
    pub last_message: Option<String>,
    pub last_message_at: Option<String>,
    pub unread_count: u32,
    /// Created client-side and not yet echoed by the backend.
    pub is_new: bool,
}

impl Conversation {
    fn from_summary(summary: ConversationSummary) -> Self {
        Self {
            peer: summary.peer,
            last_message: summary.last_message,
            last_message_at: summary.last_message_at,
            unread_count: summary.unread_count,
            is_new: false,
        }
    }

    fn provisional(peer: PeerProfile) -> Self {
        Self {
            peer,
            last_message: None,
            last_message_at: None,
            unread_count: 0,
            is_new: true,
        }
    }
}

/// Notifications for the view layer.
///
/// Emitted with `try_send`; a lagging subscriber loses notifications, not
/// state — the store itself is always the source of truth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    ConversationsUpdated,
    MessagesUpdated { peer: UserId },
    ActiveChanged { peer: Option<UserId> },
    SearchUpdated,
    Error { message: String },
}

/// The persisted subset of store state.
///
/// Connection, presence, search, and error state are deliberately absent —
/// they are rebuilt fresh on every start.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub conversations: Vec<Conversation>,
    pub messages: HashMap<UserId, Vec<Message>>,
    pub current_user: Option<UserId>,
}

#[derive(Default)]
struct StoreState {
    conversations: Vec<Conversation>,
    messages: HashMap<UserId, Vec<Message>>,
    active: Option<UserId>,
    current_user: Option<UserId>,
    search_results: Vec<PeerProfile>,
    search_seq: u64,
    last_read_sent: HashMap<UserId, Instant>,
    error: Option<String>,
    loading: bool,
}

/// The conversation store, generic over the REST seam and the socket's
/// dialing seam.
pub struct ChatStore<A: ChatApi, C: Connector> {
    api: Arc<A>,
    socket: Arc<SocketClient<C>>,
    state: Mutex<StoreState>,
    events: mpsc::Sender<StoreEvent>,
    dirty: AtomicBool,
    read_cooldown: Duration,
}

impl<A: ChatApi, C: Connector> ChatStore<A, C> {
    /// Creates a store and the receiver for its notifications.
    pub fn new(api: Arc<A>, socket: Arc<SocketClient<C>>) -> (Arc<Self>, mpsc::Receiver<StoreEvent>) {
        Self::with_read_cooldown(api, socket, READ_COOLDOWN)
    }

    /// Creates a store with an explicit read-receipt cooldown window.
    pub fn with_read_cooldown(
        api: Arc<A>,
        socket: Arc<SocketClient<C>>,
        read_cooldown: Duration,
    ) -> (Arc<Self>, mpsc::Receiver<StoreEvent>) {
        let (events, receiver) = mpsc::channel(EVENT_BUFFER);
        let store = Arc::new(Self {
            api,
            socket,
            state: Mutex::new(StoreState::default()),
            events,
            dirty: AtomicBool::new(false),
            read_cooldown,
        });
        (store, receiver)
    }

    // ---- conversation list ----

    /// Fetch the authoritative conversation list and merge it by peer key.
    ///
    /// Server rows update or insert their conversation; provisional
    /// client-side conversations the server has not echoed yet survive the
    /// merge. The active conversation's unread count stays zero throughout.
    ///
    /// # Errors
    ///
    /// Returns the underlying [`ApiError`] after recording it as the store
    /// error.
    pub async fn load_conversations(&self) -> Result<(), StoreError> {
        self.state.lock().loading = true;
        let summaries = match self.api.list_conversations().await {
            Ok(summaries) => summaries,
            Err(e) => {
                self.state.lock().loading = false;
                self.report_error("load conversations", &e);
                return Err(e.into());
            }
        };

        {
            let mut state = self.state.lock();
            let incoming: HashSet<UserId> = summaries.iter().map(|s| s.peer.id).collect();
            // Provisional entries the server does not know yet stay on top.
            let mut merged: Vec<Conversation> = state
                .conversations
                .iter()
                .filter(|c| c.is_new && !incoming.contains(&c.peer.id))
                .cloned()
                .collect();
            for summary in summaries {
                let mut conversation = Conversation::from_summary(summary);
                if state.active == Some(conversation.peer.id) {
                    conversation.unread_count = 0;
                }
                merged.push(conversation);
            }
            state.conversations = merged;
            state.loading = false;
            state.error = None;
        }

        self.mark_dirty();
        self.emit(StoreEvent::ConversationsUpdated);
        Ok(())
    }

    /// Set (or clear) the active conversation.
    ///
    /// Projects that peer's messages as the active view, clears any search
    /// results, and — when the conversation carries unread messages —
    /// triggers an asynchronous mark-as-read.
    pub fn set_active(self: &Arc<Self>, peer: Option<UserId>) {
        let needs_read = {
            let mut state = self.state.lock();
            state.active = peer;
            // Search and an open chat are mutually exclusive view modes.
            state.search_results.clear();
            peer.is_some_and(|p| {
                state
                    .conversations
                    .iter()
                    .any(|c| c.peer.id == p && c.unread_count > 0)
            })
        };

        self.emit(StoreEvent::ActiveChanged { peer });
        if needs_read {
            if let Some(p) = peer {
                let store = Arc::clone(self);
                tokio::spawn(async move {
                    if let Err(e) = store.mark_as_read(&p.to_string()).await {
                        tracing::warn!(err = %e, peer = %p, "mark-as-read on open failed");
                    }
                });
            }
        }
    }

    /// Replace one peer's message list with a freshly fetched history page.
    ///
    /// # Errors
    ///
    /// Returns the underlying [`ApiError`] after recording it.
    pub async fn load_messages(&self, peer: UserId) -> Result<(), StoreError> {
        let page = match self.api.conversation_messages(peer, 1).await {
            Ok(page) => page,
            Err(e) => {
                self.report_error("load messages", &e);
                return Err(e.into());
            }
        };
        let messages: Vec<Message> = page
            .messages
            .iter()
            .map(|row| Message::from_history(row, peer))
            .collect();

        self.state.lock().messages.insert(peer, messages);
        self.mark_dirty();
        self.emit(StoreEvent::MessagesUpdated { peer });
        Ok(())
    }

    // ---- messages ----

    /// Append one message to a peer's history.
    ///
    /// The message list is append-only and never re-sorted. The matching
    /// conversation's preview is updated when it exists; a message from a
    /// peer with no conversation entry is stored anyway and surfaces once
    /// the next list merge brings the conversation in. Unread only grows
    /// for incoming messages on a conversation that is not active.
    pub fn add_message(&self, peer: UserId, message: Message, incoming: bool) {
        let conversation_changed = {
            let mut state = self.state.lock();
            let preview = (message.text.clone(), message.timestamp.clone());
            state.messages.entry(peer).or_default().push(message);

            let active = state.active;
            if let Some(conversation) =
                state.conversations.iter_mut().find(|c| c.peer.id == peer)
            {
                conversation.last_message = Some(preview.0);
                conversation.last_message_at = Some(preview.1);
                if incoming && active != Some(peer) {
                    conversation.unread_count += 1;
                }
                true
            } else {
                false
            }
        };

        self.mark_dirty();
        self.emit(StoreEvent::MessagesUpdated { peer });
        if conversation_changed {
            self.emit(StoreEvent::ConversationsUpdated);
        }
    }

    /// Store an inbound wire message as an incoming entry.
    pub fn receive_wire_message(&self, wire: &WireMessage) {
        let message = Message {
            id: wire.id.clone(),
            text: wire.content.clone(),
            direction: Direction::Theirs,
            timestamp: display_time(&wire.created_at),
            delivered: true,
            seen: false,
            kind: wire.message_type,
            state: DeliveryState::Delivered,
        };
        self.add_message(wire.from_user_id, message, true);
    }

    /// Optimistically insert an outbound message, then hand it to the
    /// socket. Returns the temporary id.
    ///
    /// The insert happens before any network round-trip; the caller must
    /// not assume delivery until the acknowledgment reconciles the message.
    /// When the socket reports the envelope never reached the transport,
    /// the message moves straight to the failed state.
    pub async fn send_message(
        &self,
        to: UserId,
        content: impl Into<String>,
        kind: MessageKind,
    ) -> String {
        let content = content.into();
        let temp_id = format!("{TEMP_ID_PREFIX}{}", Uuid::now_v7());

        // Step 1: optimistic insert, visible immediately.
        let message = Message {
            id: temp_id.clone(),
            text: content.clone(),
            direction: Direction::Mine,
            timestamp: now_display(),
            delivered: false,
            seen: false,
            kind,
            state: DeliveryState::Pending,
        };
        self.add_message(to, message, false);

        // Step 2: hand the envelope to the socket.
        let payload = outbound::SendMessage {
            to_user_id: to,
            content,
            message_type: kind,
        };
        let handed_off = self.socket.send_envelope(outbound::send_message(&payload)).await;
        if !handed_off {
            self.mark_failed(to, &temp_id, "not connected");
        }
        temp_id
    }

    /// Reconcile the oldest pending outbound message for the receipt's peer:
    /// swap in the server id, flag it delivered.
    pub fn confirm_sent(&self, receipt: &SendReceipt) {
        let peer = receipt.to_user_id;
        let reconciled = {
            let mut state = self.state.lock();
            state
                .messages
                .get_mut(&peer)
                .and_then(|messages| {
                    messages
                        .iter_mut()
                        .find(|m| m.direction == Direction::Mine && m.is_pending())
                })
                .map(|message| {
                    message.id = receipt.id.clone();
                    message.delivered = true;
                    message.state = DeliveryState::Delivered;
                })
                .is_some()
        };

        if reconciled {
            self.mark_dirty();
            self.emit(StoreEvent::MessagesUpdated { peer });
        } else {
            tracing::debug!(peer = %peer, id = %receipt.id, "unmatched send receipt");
        }
    }

    /// Apply a seen-receipt: the `latest` sentinel covers every outbound
    /// message for the peer, a concrete id covers just that message.
    pub fn mark_seen(&self, receipt: &SeenReceipt) {
        let peer = receipt.from_user_id;
        let changed = {
            let mut state = self.state.lock();
            state.messages.get_mut(&peer).is_some_and(|messages| {
                let mut changed = false;
                for message in messages.iter_mut().filter(|m| m.direction == Direction::Mine) {
                    if receipt.covers_latest() || message.id == receipt.message_id {
                        changed |= !message.seen;
                        message.seen = true;
                    }
                }
                changed
            })
        };

        if changed {
            self.mark_dirty();
            self.emit(StoreEvent::MessagesUpdated { peer });
        }
    }

    /// Re-send a failed message with a fresh envelope.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnknownMessage`] when no such message exists.
    pub async fn retry_message(&self, peer: UserId, message_id: &str) -> Result<(), StoreError> {
        let resend = {
            let mut state = self.state.lock();
            let Some(message) = state
                .messages
                .get_mut(&peer)
                .and_then(|m| m.iter_mut().find(|m| m.id == message_id))
            else {
                return Err(StoreError::UnknownMessage(message_id.to_owned()));
            };
            if !message.is_failed() {
                tracing::warn!(id = message_id, "retry requested for a message that has not failed");
                None
            } else {
                message.state = DeliveryState::Pending;
                message.timestamp = now_display();
                Some((message.text.clone(), message.kind))
            }
        };

        let Some((content, kind)) = resend else {
            return Ok(());
        };
        self.emit(StoreEvent::MessagesUpdated { peer });

        let payload = outbound::SendMessage {
            to_user_id: peer,
            content,
            message_type: kind,
        };
        let handed_off = self.socket.send_envelope(outbound::send_message(&payload)).await;
        if !handed_off {
            self.mark_failed(peer, message_id, "not connected");
        }
        Ok(())
    }

    /// Drop a failed message and repair the conversation preview.
    pub fn discard_message(&self, peer: UserId, message_id: &str) {
        let removed = {
            let mut state = self.state.lock();
            let Some(messages) = state.messages.get_mut(&peer) else {
                return;
            };
            let before = messages.len();
            messages.retain(|m| !(m.id == message_id && m.is_failed()));
            let removed = messages.len() != before;
            if removed {
                let preview = messages
                    .last()
                    .map(|m| (m.text.clone(), m.timestamp.clone()));
                if let Some(conversation) =
                    state.conversations.iter_mut().find(|c| c.peer.id == peer)
                {
                    conversation.last_message = preview.as_ref().map(|p| p.0.clone());
                    conversation.last_message_at = preview.map(|p| p.1);
                }
            }
            removed
        };

        if removed {
            self.mark_dirty();
            self.emit(StoreEvent::MessagesUpdated { peer });
            self.emit(StoreEvent::ConversationsUpdated);
        } else {
            tracing::debug!(id = message_id, "discard matched no failed message");
        }
    }

    // ---- read receipts ----

    /// Acknowledge a conversation as read.
    ///
    /// Validates the peer id, collapses duplicate calls inside the cooldown
    /// window, and issues the REST acknowledgment. Only after that call
    /// succeeds does the local state change: unread drops to zero, the
    /// peer's messages flip to seen, and a `markAsSeen` envelope goes out.
    ///
    /// # Errors
    ///
    /// [`StoreError::InvalidPeer`] for ids that are not numeric strings;
    /// [`StoreError::Api`] when the acknowledgment fails (local state is
    /// left untouched).
    pub async fn mark_as_read(&self, peer_id: &str) -> Result<(), StoreError> {
        // Step 1: validate before any network traffic.
        let Ok(peer) = peer_id.parse::<UserId>() else {
            tracing::warn!(peer = peer_id, "mark-as-read called with a malformed peer id");
            return Err(StoreError::InvalidPeer(peer_id.to_owned()));
        };

        // Step 2: cooldown, recorded at entry so in-flight calls collapse.
        {
            let mut state = self.state.lock();
            let now = Instant::now();
            if let Some(last) = state.last_read_sent.get(&peer) {
                if now.duration_since(*last) < self.read_cooldown {
                    tracing::debug!(peer = %peer, "read receipt suppressed by cooldown");
                    return Ok(());
                }
            }
            state.last_read_sent.insert(peer, now);
        }

        // Step 3: the REST acknowledgment comes first; local state moves
        // only after it lands.
        if let Err(e) = self.api.mark_conversation_read(peer).await {
            self.report_error("mark as read", &e);
            return Err(e.into());
        }

        // Step 4: zero unread and flag the peer's messages seen.
        {
            let mut state = self.state.lock();
            if let Some(conversation) =
                state.conversations.iter_mut().find(|c| c.peer.id == peer)
            {
                conversation.unread_count = 0;
            }
            if let Some(messages) = state.messages.get_mut(&peer) {
                for message in messages.iter_mut().filter(|m| m.direction == Direction::Theirs) {
                    message.seen = true;
                }
            }
        }
        self.mark_dirty();
        self.emit(StoreEvent::ConversationsUpdated);
        self.emit(StoreEvent::MessagesUpdated { peer });

        // Step 5: tell the peer their latest messages were seen.
        let payload = outbound::MarkAsSeen {
            message_id: LATEST_MESSAGE.to_owned(),
            to_user_id: peer,
        };
        let _ = self.socket.send_envelope(outbound::mark_as_seen(&payload)).await;
        Ok(())
    }

    // ---- search and new chats ----

    /// Search users by name or email, excluding the local user.
    ///
    /// An empty query clears results without a request. Responses are
    /// sequence-checked: only the answer to the most recently issued
    /// request is applied, stale answers are dropped.
    ///
    /// # Errors
    ///
    /// Returns the underlying [`ApiError`]; stale failures are swallowed.
    pub async fn search_users(&self, query: &str, self_id: UserId) -> Result<(), StoreError> {
        let trimmed = query.trim();
        if trimmed.is_empty() {
            self.state.lock().search_results.clear();
            self.emit(StoreEvent::SearchUpdated);
            return Ok(());
        }

        let seq = {
            let mut state = self.state.lock();
            state.search_seq += 1;
            state.search_seq
        };

        match self.api.search_users(trimmed, self_id).await {
            Ok(profiles) => {
                let applied = {
                    let mut state = self.state.lock();
                    if seq == state.search_seq {
                        state.search_results = profiles;
                        true
                    } else {
                        false
                    }
                };
                if applied {
                    self.emit(StoreEvent::SearchUpdated);
                } else {
                    tracing::debug!(seq = seq, "stale search response dropped");
                }
                Ok(())
            }
            Err(e) => {
                let current = self.state.lock().search_seq;
                if seq == current {
                    self.report_error("search users", &e);
                    Err(e.into())
                } else {
                    tracing::debug!(seq = seq, "stale search failure dropped");
                    Ok(())
                }
            }
        }
    }

    /// Drop any search results.
    pub fn clear_search(&self) {
        self.state.lock().search_results.clear();
        self.emit(StoreEvent::SearchUpdated);
    }

    /// Open a chat with a peer, creating a provisional conversation when
    /// none exists yet.
    ///
    /// Idempotent: an existing conversation is returned and made active,
    /// never duplicated.
    ///
    /// # Errors
    ///
    /// Returns the underlying [`ApiError`] when the peer's profile cannot
    /// be fetched for a new conversation.
    pub async fn start_new_chat(self: &Arc<Self>, peer: UserId) -> Result<Conversation, StoreError> {
        // Step 1: idempotent fast path.
        let existing = {
            let state = self.state.lock();
            state
                .conversations
                .iter()
                .find(|c| c.peer.id == peer)
                .cloned()
        };
        if let Some(conversation) = existing {
            self.set_active(Some(peer));
            return Ok(conversation);
        }

        // Step 2: synthesize a provisional conversation from the profile.
        let profile = match self.api.fetch_user(peer).await {
            Ok(profile) => profile,
            Err(e) => {
                self.report_error("start new chat", &e);
                return Err(e.into());
            }
        };
        let conversation = {
            let mut state = self.state.lock();
            // A racing call may have inserted it while we fetched.
            if let Some(existing) = state
                .conversations
                .iter()
                .find(|c| c.peer.id == peer)
                .cloned()
            {
                existing
            } else {
                let conversation = Conversation::provisional(profile);
                state.conversations.insert(0, conversation.clone());
                state.messages.entry(peer).or_default();
                conversation
            }
        };

        self.mark_dirty();
        self.emit(StoreEvent::ConversationsUpdated);
        self.set_active(Some(peer));
        Ok(conversation)
    }

    // ---- presence passthrough ----

    /// Patch the peer profile of the matching conversation. A status for a
    /// peer without a conversation is a no-op.
    pub fn update_user_status(&self, update: &StatusUpdate) {
        let changed = {
            let mut state = self.state.lock();
            state
                .conversations
                .iter_mut()
                .find(|c| c.peer.id == update.user_id)
                .map(|conversation| {
                    conversation.peer.is_online = update.is_online;
                    conversation.peer.status = Some(update.effective_status());
                })
                .is_some()
        };
        if changed {
            self.mark_dirty();
            self.emit(StoreEvent::ConversationsUpdated);
        }
    }

    // ---- session lifecycle ----

    /// Bind the local user id (persisted alongside the chat data).
    pub fn bind_user(&self, id: UserId) {
        self.state.lock().current_user = Some(id);
        self.mark_dirty();
    }

    /// Atomically wipe all conversation, message, search, and error state.
    pub fn clear(&self) {
        *self.state.lock() = StoreState::default();
        self.mark_dirty();
        self.emit(StoreEvent::ConversationsUpdated);
        self.emit(StoreEvent::ActiveChanged { peer: None });
    }

    /// The persisted subset of the current state.
    pub fn snapshot(&self) -> StoreSnapshot {
        let state = self.state.lock();
        StoreSnapshot {
            conversations: state.conversations.clone(),
            messages: state.messages.clone(),
            current_user: state.current_user,
        }
    }

    /// Rehydrate from a persisted snapshot. Does not mark the store dirty —
    /// the snapshot is what disk already holds.
    pub fn restore(&self, snapshot: StoreSnapshot) {
        {
            let mut state = self.state.lock();
            state.conversations = snapshot.conversations;
            state.messages = snapshot.messages;
            state.current_user = snapshot.current_user;
        }
        self.emit(StoreEvent::ConversationsUpdated);
    }

    /// True when a mutation happened since the last call. Drives the
    /// persistence flush task.
    pub fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::Relaxed)
    }

    /// Re-flag unsaved data after a failed flush so the next tick retries.
    pub(crate) fn mark_dirty_for_retry(&self) {
        self.mark_dirty();
    }

    // ---- projections ----

    #[must_use]
    pub fn conversations(&self) -> Vec<Conversation> {
        self.state.lock().conversations.clone()
    }

    #[must_use]
    pub fn conversation(&self, peer: UserId) -> Option<Conversation> {
        self.state
            .lock()
            .conversations
            .iter()
            .find(|c| c.peer.id == peer)
            .cloned()
    }

    #[must_use]
    pub fn active_peer(&self) -> Option<UserId> {
        self.state.lock().active
    }

    #[must_use]
    pub fn active_conversation(&self) -> Option<Conversation> {
        let state = self.state.lock();
        let active = state.active?;
        state
            .conversations
            .iter()
            .find(|c| c.peer.id == active)
            .cloned()
    }

    /// The active conversation's messages, in insertion order.
    #[must_use]
    pub fn active_messages(&self) -> Vec<Message> {
        let state = self.state.lock();
        state
            .active
            .and_then(|peer| state.messages.get(&peer).cloned())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn messages_for(&self, peer: UserId) -> Vec<Message> {
        self.state
            .lock()
            .messages
            .get(&peer)
            .cloned()
            .unwrap_or_default()
    }

    #[must_use]
    pub fn search_results(&self) -> Vec<PeerProfile> {
        self.state.lock().search_results.clone()
    }

    #[must_use]
    pub fn error(&self) -> Option<String> {
        self.state.lock().error.clone()
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.state.lock().loading
    }

    #[must_use]
    pub fn current_user(&self) -> Option<UserId> {
        self.state.lock().current_user
    }

    /// Total unread across all conversations.
    #[must_use]
    pub fn unread_total(&self) -> u32 {
        self.state
            .lock()
            .conversations
            .iter()
            .map(|c| c.unread_count)
            .sum()
    }

    // ---- internals ----

    fn mark_failed(&self, peer: UserId, message_id: &str, reason: &str) {
        let changed = {
            let mut state = self.state.lock();
            state
                .messages
                .get_mut(&peer)
                .and_then(|m| m.iter_mut().find(|m| m.id == message_id))
                .map(|message| {
                    message.state = DeliveryState::Failed(reason.to_owned());
                    message.delivered = false;
                })
                .is_some()
        };
        if changed {
            tracing::warn!(peer = %peer, id = message_id, reason = reason, "message send failed");
            self.mark_dirty();
            self.emit(StoreEvent::MessagesUpdated { peer });
        }
    }

    fn report_error(&self, context: &str, err: &ApiError) {
        tracing::warn!(err = %err, context = context, "store operation failed");
        self.state.lock().error = Some(err.to_string());
        self.emit(StoreEvent::Error {
            message: err.to_string(),
        });
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Relaxed);
    }

    fn emit(&self, event: StoreEvent) {
        if let Err(e) = self.events.try_send(event) {
            tracing::debug!(err = %e, "store event dropped");
        }
    }
}

/// Local wall-clock display time for a freshly created message.
#[must_use]
pub fn now_display() -> String {
    chrono::Local::now().format("%H:%M").to_string()
}

/// Display form of a server-side creation time; unparseable input renders
/// as a placeholder rather than failing the message.
#[must_use]
pub fn display_time(created_at: &str) -> String {
    chrono::DateTime::parse_from_rfc3339(created_at).map_or_else(
        |_| "??:??".to_owned(),
        |dt| dt.with_timezone(&chrono::Local).format("%H:%M").to_string(),
    )
}
