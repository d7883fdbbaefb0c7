//! Client facade wiring the socket, store, presence, and session together.
//!
//! This module owns the event plumbing between the connection manager and
//! the state holders, plus the session lifecycle (login, logout, expiry).
//!
//! # Architecture
//!
//! ```text
//! view layer  ←─ StoreEvent / PresenceEvent / ClientEvent ─  background tasks
//!             ── facade calls (send, open, search, ...) →
//! ```
//!
//! Socket callbacks are synchronous; anything that needs to await (the
//! settle delay, REST calls) is spawned onto the runtime from inside them.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use wirechat_proto::ack::{SeenReceipt, SendReceipt};
use wirechat_proto::message::{MessageKind, WireMessage};
use wirechat_proto::outbound;
use wirechat_proto::presence::{PresenceStatus, StatusUpdate};
use wirechat_proto::typing::TypingUpdate;
use wirechat_proto::user::UserId;

use crate::config::ClientConfig;
use crate::persist;
use crate::presence::{PresenceEvent, PresenceTracker, TypingSignaler};
use crate::rest::{ApiError, ChatApi, RestClient};
use crate::session::{Credentials, Identity, Session};
use crate::socket::{SocketClient, SocketConfig};
use crate::store::{ChatStore, Conversation, StoreError, StoreEvent};
use crate::transport::{Connector, TransportError};
use crate::transport::ws::WsConnector;

/// Capacity of the client notification channel.
const EVENT_BUFFER: usize = 64;

/// Errors from facade operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The operation needs a signed-in session.
    #[error("not signed in")]
    NotSignedIn,

    /// The socket could not be established.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A store operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Connection-level notifications for the view layer.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// The socket is open and registered.
    Connected,
    /// The transport dropped without an explicit disconnect.
    Disconnected,
    /// The server pushed an error envelope.
    SocketError { message: String },
    /// A group payload arrived; forwarded verbatim, no group model here.
    GroupMessage { payload: Value },
    /// Token refresh failed; the client tore the session down.
    SessionExpired,
}

/// Tunables for assembling a client.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub socket: SocketConfig,
    /// Wait between `connected` and the first conversation load.
    pub settle_delay: Duration,
    pub read_cooldown: Duration,
    pub typing_quiet: Duration,
    pub typing_expiry: Duration,
    pub snapshot_path: Option<PathBuf>,
    pub flush_interval: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            socket: SocketConfig::default(),
            settle_delay: Duration::from_secs(1),
            read_cooldown: Duration::from_secs(1),
            typing_quiet: Duration::from_secs(2),
            typing_expiry: Duration::from_secs(2),
            snapshot_path: None,
            flush_interval: persist::DEFAULT_FLUSH_INTERVAL,
        }
    }
}

impl From<&ClientConfig> for ClientOptions {
    fn from(config: &ClientConfig) -> Self {
        Self {
            socket: SocketConfig {
                heartbeat_interval: config.heartbeat_interval,
                register_delay: config.register_delay,
            },
            settle_delay: config.settle_delay,
            read_cooldown: config.read_cooldown,
            typing_quiet: config.typing_quiet,
            typing_expiry: config.typing_expiry,
            snapshot_path: config
                .snapshot_path
                .clone()
                .or_else(|| persist::default_snapshot_path().ok()),
            flush_interval: config.flush_interval,
        }
    }
}

/// Receivers handed to the view layer at assembly.
pub struct ClientHandles {
    pub store_events: mpsc::Receiver<StoreEvent>,
    pub presence_events: mpsc::Receiver<PresenceEvent>,
    pub client_events: mpsc::Receiver<ClientEvent>,
}

/// The assembled chat client.
pub struct ChatClient<A: ChatApi, C: Connector> {
    session: Arc<Session>,
    socket: Arc<SocketClient<C>>,
    store: Arc<ChatStore<A, C>>,
    presence: Arc<PresenceTracker>,
    typing: Arc<TypingSignaler<C>>,
    events: mpsc::Sender<ClientEvent>,
    settle_delay: Duration,
    snapshot_path: Option<PathBuf>,
    flush_interval: Duration,
    flush_task: Mutex<Option<JoinHandle<()>>>,
    wired: AtomicBool,
    local_status: Mutex<PresenceStatus>,
}

impl ChatClient<RestClient, WsConnector> {
    /// Assemble a production client from resolved configuration.
    #[must_use]
    pub fn from_config(config: &ClientConfig) -> (Arc<Self>, ClientHandles) {
        let session = Arc::new(Session::new());
        let api = Arc::new(RestClient::new(config.api_url.clone(), Arc::clone(&session)));
        let connector = WsConnector::new(config.ws_url.clone());
        Self::assemble(api, connector, session, ClientOptions::from(config))
    }
}

impl<A: ChatApi, C: Connector> ChatClient<A, C> {
    /// Assemble a client over explicit seams. Restores any persisted
    /// snapshot before anything can connect.
    pub fn assemble(
        api: Arc<A>,
        connector: C,
        session: Arc<Session>,
        options: ClientOptions,
    ) -> (Arc<Self>, ClientHandles) {
        let socket = Arc::new(SocketClient::with_config(connector, options.socket));
        let (store, store_events) =
            ChatStore::with_read_cooldown(api, Arc::clone(&socket), options.read_cooldown);
        let (presence, presence_events) = PresenceTracker::with_default_expiry(options.typing_expiry);
        let typing = TypingSignaler::with_quiet_window(Arc::clone(&socket), options.typing_quiet);
        let (events, client_events) = mpsc::channel(EVENT_BUFFER);

        let client = Arc::new(Self {
            session,
            socket,
            store,
            presence,
            typing,
            events,
            settle_delay: options.settle_delay,
            snapshot_path: options.snapshot_path,
            flush_interval: options.flush_interval,
            flush_task: Mutex::new(None),
            wired: AtomicBool::new(false),
            local_status: Mutex::new(PresenceStatus::Online),
        });
        client.restore_from_disk();

        (
            client,
            ClientHandles {
                store_events,
                presence_events,
                client_events,
            },
        )
    }

    // ---- session lifecycle ----

    /// Sign in and bring the connection up.
    ///
    /// Restored data belonging to a different user is cleared first, the
    /// session and store bind the identity, socket listeners are
    /// (re)registered, the persistence flush starts, and the socket dials.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] when the dial fails; the session
    /// stays signed in so a retry can reconnect.
    pub async fn login(
        self: &Arc<Self>,
        id: UserId,
        email: &str,
        credentials: Credentials,
    ) -> Result<(), ClientError> {
        // Step 1: another user's restored data must not leak into this
        // session.
        if self.store.current_user().is_some_and(|prior| prior != id) {
            tracing::info!(user = %id, "persisted data belongs to a different user; clearing");
            self.store.clear();
        }

        // Step 2: bind identity and credentials.
        self.session.sign_in(Identity::new(id, email), credentials);
        self.store.bind_user(id);

        // Step 3: listeners (an earlier explicit disconnect dropped them).
        self.wire_listeners();

        // Step 4: background persistence.
        self.start_flush_task();

        // Step 5: dial and register.
        self.socket.connect(id).await?;
        Ok(())
    }

    /// Re-dial with the signed-in identity after an explicit disconnect or
    /// transport loss.
    ///
    /// # Errors
    ///
    /// [`ClientError::NotSignedIn`] without a session identity, otherwise
    /// any dial failure.
    pub async fn reconnect(self: &Arc<Self>) -> Result<(), ClientError> {
        let Some(id) = self.session.user_id() else {
            return Err(ClientError::NotSignedIn);
        };
        self.wire_listeners();
        self.socket.connect(id).await?;
        Ok(())
    }

    /// Drop the connection, keeping session and chat state. Presence is
    /// unobservable while offline, so it is cleared.
    pub fn disconnect(&self) {
        self.socket.disconnect();
        self.wired.store(false, Ordering::Relaxed);
        self.typing.clear();
        self.presence.clear();
    }

    /// Tear the whole client session down: socket, persistence, state,
    /// credentials.
    pub async fn logout(&self) {
        tracing::info!("logging out");
        // Step 1: silence the socket first so no event mutates state during
        // teardown.
        self.socket.disconnect();
        self.wired.store(false, Ordering::Relaxed);

        // Step 2: stop persistence and wipe the snapshot before clearing,
        // so a late flush cannot resurrect the data.
        if let Some(task) = self.flush_task.lock().take() {
            task.abort();
        }
        if let Some(path) = &self.snapshot_path {
            if let Err(e) = persist::remove_snapshot(path) {
                tracing::warn!(err = %e, "failed to remove snapshot at logout");
            }
        }

        // Step 3: clear in-memory state.
        self.typing.clear();
        self.presence.clear();
        self.store.clear();
        self.session.clear();
    }

    // ---- facade operations ----

    /// Open a conversation: make it active and fetch its history.
    ///
    /// # Errors
    ///
    /// Propagates the history fetch failure; the conversation stays active.
    pub async fn open_conversation(self: &Arc<Self>, peer: UserId) -> Result<(), ClientError> {
        self.store.set_active(Some(peer));
        let result = self.store.load_messages(peer).await;
        self.intercept(result).await
    }

    /// Leave the active conversation.
    pub fn close_conversation(self: &Arc<Self>) {
        self.store.set_active(None);
    }

    /// Send a text message to a peer, stopping the typing signal first.
    /// Returns the optimistic temporary id.
    pub async fn send_text(&self, peer: UserId, content: impl Into<String>) -> String {
        self.typing.stop(&peer.to_string()).await;
        self.store.send_message(peer, content, MessageKind::Text).await
    }

    /// Register a keystroke in a peer's draft.
    pub async fn notify_typing(&self, peer: UserId) {
        self.typing.notify_input(&peer.to_string()).await;
    }

    /// Search users, excluding the signed-in user from results.
    ///
    /// # Errors
    ///
    /// [`ClientError::NotSignedIn`] without a session, otherwise the
    /// underlying search failure.
    pub async fn search(&self, query: &str) -> Result<(), ClientError> {
        let Some(self_id) = self.session.user_id() else {
            return Err(ClientError::NotSignedIn);
        };
        let result = self.store.search_users(query, self_id).await;
        self.intercept(result).await
    }

    /// Start (or reopen) a chat with a peer.
    ///
    /// # Errors
    ///
    /// Propagates the profile fetch failure for unknown peers.
    pub async fn start_chat(self: &Arc<Self>, peer: UserId) -> Result<Conversation, ClientError> {
        let result = self.store.start_new_chat(peer).await;
        self.intercept(result).await
    }

    /// Re-fetch the conversation list.
    ///
    /// # Errors
    ///
    /// Propagates the list fetch failure.
    pub async fn refresh_conversations(&self) -> Result<(), ClientError> {
        let result = self.store.load_conversations().await;
        self.intercept(result).await
    }

    /// Acknowledge a conversation as read.
    ///
    /// # Errors
    ///
    /// Propagates the acknowledgment failure.
    pub async fn mark_read(&self, peer: UserId) -> Result<(), ClientError> {
        let result = self.store.mark_as_read(&peer.to_string()).await;
        self.intercept(result).await
    }

    /// Broadcast the local user's presence status. The choice is recorded
    /// locally either way; `false` means the socket was down and peers did
    /// not hear about it.
    pub async fn set_status(&self, status: PresenceStatus) -> bool {
        *self.local_status.lock() = status;
        self.socket.send_envelope(outbound::status_change(status)).await
    }

    /// The status last chosen through [`Self::set_status`].
    #[must_use]
    pub fn status(&self) -> PresenceStatus {
        *self.local_status.lock()
    }

    // ---- component access ----

    #[must_use]
    pub fn store(&self) -> &Arc<ChatStore<A, C>> {
        &self.store
    }

    #[must_use]
    pub fn presence(&self) -> &Arc<PresenceTracker> {
        &self.presence
    }

    #[must_use]
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    #[must_use]
    pub fn socket(&self) -> &Arc<SocketClient<C>> {
        &self.socket
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.socket.is_connected()
    }

    #[must_use]
    pub fn identity(&self) -> Option<Identity> {
        self.session.identity()
    }

    // ---- internals ----

    fn restore_from_disk(&self) {
        let Some(path) = &self.snapshot_path else {
            return;
        };
        match persist::load_snapshot(path) {
            Ok(Some(state)) => {
                tracing::info!(path = %path.display(), "restored persisted chat state");
                state.restore_into(&self.store, &self.session);
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(err = %e, "could not restore snapshot; starting fresh");
            }
        }
    }

    fn start_flush_task(self: &Arc<Self>) {
        let Some(path) = self.snapshot_path.clone() else {
            return;
        };
        let mut flush_task = self.flush_task.lock();
        if flush_task.is_none() {
            *flush_task = Some(persist::spawn_flush_task(
                Arc::clone(&self.store),
                Arc::clone(&self.session),
                path,
                self.flush_interval,
            ));
        }
    }

    /// Register the socket event handlers. Idempotent until an explicit
    /// disconnect drops the socket's listener table.
    fn wire_listeners(self: &Arc<Self>) {
        if self.wired.swap(true, Ordering::Relaxed) {
            return;
        }

        // connected: announce, then load the list after the settle window
        // so server-side registration has completed.
        let client = Arc::clone(self);
        self.socket.on("connected", move |_| {
            client.emit(ClientEvent::Connected);
            let client = Arc::clone(&client);
            tokio::spawn(async move {
                tokio::time::sleep(client.settle_delay).await;
                let result = client.store.load_conversations().await;
                let _ = client.intercept(result).await;
            });
        });

        let client = Arc::clone(self);
        self.socket.on("message", move |data| {
            if let Some(wire) = parsed::<WireMessage>("message", data) {
                client.store.receive_wire_message(&wire);
            }
        });

        let client = Arc::clone(self);
        self.socket.on("message-sent", move |data| {
            if let Some(receipt) = parsed::<SendReceipt>("message-sent", data) {
                client.store.confirm_sent(&receipt);
            }
        });

        let client = Arc::clone(self);
        self.socket.on("message-seen", move |data| {
            if let Some(receipt) = parsed::<SeenReceipt>("message-seen", data) {
                client.store.mark_seen(&receipt);
            }
        });

        let client = Arc::clone(self);
        self.socket.on("userStatusChanged", move |data| {
            if let Some(update) = parsed::<StatusUpdate>("userStatusChanged", data) {
                client.presence.apply_status(&update);
                client.store.update_user_status(&update);
            }
        });

        let client = Arc::clone(self);
        self.socket.on("userTyping", move |data| {
            if let Some(update) = parsed::<TypingUpdate>("userTyping", data) {
                client.presence.apply_typing(&update);
            }
        });

        let client = Arc::clone(self);
        self.socket.on("group-message", move |data| {
            tracing::debug!("group payload forwarded");
            client.emit(ClientEvent::GroupMessage {
                payload: data.clone(),
            });
        });

        let client = Arc::clone(self);
        self.socket.on("socket-error", move |data| {
            let message = data
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown server error")
                .to_owned();
            tracing::warn!(message = %message, "server reported an error");
            client.emit(ClientEvent::SocketError { message });
        });

        let client = Arc::clone(self);
        self.socket.on("disconnected", move |_| {
            // Presence is unobservable while offline; chat state stays.
            client.presence.clear();
            client.typing.clear();
            client.emit(ClientEvent::Disconnected);
        });

        // Here "error" is the transport ending abnormally, as opposed to a
        // server-pushed error envelope arriving as "socket-error".
        let client = Arc::clone(self);
        self.socket.on("error", move |data| {
            let message = data
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("connection error")
                .to_owned();
            client.presence.clear();
            client.typing.clear();
            client.emit(ClientEvent::SocketError { message });
        });
    }

    /// Escalate an expired session to a full teardown, then hand the error
    /// back to the caller.
    async fn intercept<T>(&self, result: Result<T, StoreError>) -> Result<T, ClientError> {
        if let Err(StoreError::Api(ApiError::SessionExpired)) = &result {
            tracing::warn!("session expired; tearing the client down");
            self.emit(ClientEvent::SessionExpired);
            self.logout().await;
        }
        result.map_err(ClientError::from)
    }

    fn emit(&self, event: ClientEvent) {
        if let Err(e) = self.events.try_send(event) {
            tracing::debug!(err = %e, "client event dropped");
        }
    }
}

/// Decode a listener payload, logging and skipping anything malformed.
fn parsed<T: serde::de::DeserializeOwned>(event: &str, data: &Value) -> Option<T> {
    match serde_json::from_value(data.clone()) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(event = event, err = %e, "payload did not match the expected shape");
            None
        }
    }
}
