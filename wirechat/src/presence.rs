//! Presence and typing state for peers, plus the outbound typing signal.
//!
//! Inbound typing indicators are cleared by per-user expiry timers that are
//! cancelled and re-armed whenever a fresh indicator arrives, so a burst of
//! keystrokes on the far side never flickers the indicator. The outbound
//! side mirrors that shape: one `typing: true` envelope per burst, an
//! automatic `typing: false` after a quiet window, and an immediate stop
//! when the message is sent or the draft is cleared.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use wirechat_proto::outbound::{self, TypingSignal};
use wirechat_proto::presence::{PresenceStatus, StatusUpdate};
use wirechat_proto::typing::TypingUpdate;
use wirechat_proto::user::UserId;

use crate::socket::SocketClient;
use crate::transport::Connector;

/// Capacity of the presence notification channel.
const EVENT_BUFFER: usize = 64;

/// Fallback lifetime of an inbound typing indicator when the backend sends
/// no explicit expiry.
const DEFAULT_TYPING_EXPIRY: Duration = Duration::from_secs(2);

/// Quiet window after the last keystroke before the outbound typing signal
/// stops itself.
const QUIET_AFTER: Duration = Duration::from_secs(2);

/// Notifications for presence changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceEvent {
    StatusChanged { user: UserId, status: PresenceStatus },
    TypingChanged { user: UserId, is_typing: bool },
}

struct TypingEntry {
    epoch: u64,
    timer: JoinHandle<()>,
}

/// Tracks per-peer status and typing indicators fed by socket events.
pub struct PresenceTracker {
    statuses: Mutex<HashMap<UserId, PresenceStatus>>,
    typing: Mutex<HashMap<UserId, TypingEntry>>,
    typing_epoch: AtomicU64,
    events: mpsc::Sender<PresenceEvent>,
    default_expiry: Duration,
}

impl PresenceTracker {
    /// Creates a tracker and the receiver for its notifications.
    pub fn new() -> (Arc<Self>, mpsc::Receiver<PresenceEvent>) {
        Self::with_default_expiry(DEFAULT_TYPING_EXPIRY)
    }

    /// Creates a tracker with an explicit fallback typing expiry.
    pub fn with_default_expiry(default_expiry: Duration) -> (Arc<Self>, mpsc::Receiver<PresenceEvent>) {
        let (events, receiver) = mpsc::channel(EVENT_BUFFER);
        let tracker = Arc::new(Self {
            statuses: Mutex::new(HashMap::new()),
            typing: Mutex::new(HashMap::new()),
            typing_epoch: AtomicU64::new(0),
            events,
            default_expiry,
        });
        (tracker, receiver)
    }

    /// Record a status change, notifying only when the status actually
    /// moved.
    pub fn apply_status(&self, update: &StatusUpdate) {
        let status = update.effective_status();
        let changed = self.statuses.lock().insert(update.user_id, status) != Some(status);
        if changed {
            self.emit(PresenceEvent::StatusChanged {
                user: update.user_id,
                status,
            });
        }
    }

    /// Record a typing indicator.
    ///
    /// A `true` indicator arms (or re-arms) the expiry timer: the server's
    /// `expiresIn` hint when present, the default window otherwise. A
    /// `false` indicator clears immediately and cancels the timer.
    pub fn apply_typing(self: &Arc<Self>, update: &TypingUpdate) {
        let user = update.user_id;
        if !update.is_typing {
            self.clear_typing(user);
            return;
        }

        let expiry = update.expires_in.map_or(self.default_expiry, Duration::from_millis);
        let epoch = self.typing_epoch.fetch_add(1, Ordering::Relaxed) + 1;
        let timer = tokio::spawn(Self::expire_typing(Arc::clone(self), user, epoch, expiry));

        let was_typing = {
            let mut typing = self.typing.lock();
            typing
                .insert(user, TypingEntry { epoch, timer })
                .map(|old| old.timer.abort())
                .is_some()
        };
        if !was_typing {
            self.emit(PresenceEvent::TypingChanged {
                user,
                is_typing: true,
            });
        }
    }

    /// Drop a peer's typing indicator and cancel its timer.
    pub fn clear_typing(&self, user: UserId) {
        let was_typing = self
            .typing
            .lock()
            .remove(&user)
            .map(|entry| entry.timer.abort())
            .is_some();
        if was_typing {
            self.emit(PresenceEvent::TypingChanged {
                user,
                is_typing: false,
            });
        }
    }

    /// Expiry task body. Removes the indicator only when its epoch still
    /// owns the entry; a re-armed indicator has a newer epoch and survives.
    async fn expire_typing(self: Arc<Self>, user: UserId, epoch: u64, after: Duration) {
        tokio::time::sleep(after).await;
        let expired = {
            let mut typing = self.typing.lock();
            if typing.get(&user).is_some_and(|entry| entry.epoch == epoch) {
                typing.remove(&user);
                true
            } else {
                false
            }
        };
        if expired {
            self.emit(PresenceEvent::TypingChanged {
                user,
                is_typing: false,
            });
        }
    }

    /// A peer's last known status. Unknown peers are offline.
    #[must_use]
    pub fn status_of(&self, user: UserId) -> PresenceStatus {
        self.statuses
            .lock()
            .get(&user)
            .copied()
            .unwrap_or_default()
    }

    /// Whether a peer should render as reachable.
    #[must_use]
    pub fn appears_online(&self, user: UserId) -> bool {
        self.status_of(user).appears_online()
    }

    #[must_use]
    pub fn is_typing(&self, user: UserId) -> bool {
        self.typing.lock().contains_key(&user)
    }

    #[must_use]
    pub fn typing_users(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self.typing.lock().keys().copied().collect();
        users.sort_by_key(|u| u.as_i64());
        users
    }

    /// Wipe all presence state and cancel every expiry timer.
    pub fn clear(&self) {
        self.statuses.lock().clear();
        let mut typing = self.typing.lock();
        for (_, entry) in typing.drain() {
            entry.timer.abort();
        }
    }

    fn emit(&self, event: PresenceEvent) {
        if let Err(e) = self.events.try_send(event) {
            tracing::debug!(err = %e, "presence event dropped");
        }
    }
}

#[derive(Default)]
struct SignalState {
    /// Conversation currently signaled as typing, if any.
    conversation: Option<String>,
    /// Bumped on every state change so stale quiet-timers no-op.
    epoch: u64,
    stop_timer: Option<JoinHandle<()>>,
}

/// Emits outbound typing signals for the local user's keystrokes.
pub struct TypingSignaler<C: Connector> {
    socket: Arc<SocketClient<C>>,
    quiet_after: Duration,
    state: Mutex<SignalState>,
}

impl<C: Connector> TypingSignaler<C> {
    #[must_use]
    pub fn new(socket: Arc<SocketClient<C>>) -> Arc<Self> {
        Self::with_quiet_window(socket, QUIET_AFTER)
    }

    #[must_use]
    pub fn with_quiet_window(socket: Arc<SocketClient<C>>, quiet_after: Duration) -> Arc<Self> {
        Arc::new(Self {
            socket,
            quiet_after,
            state: Mutex::new(SignalState::default()),
        })
    }

    /// Register a keystroke in a conversation's draft.
    ///
    /// The first keystroke of a burst sends `typing: true`; further ones
    /// only push the quiet deadline out. Switching conversations stops the
    /// previous signal first.
    pub async fn notify_input(self: &Arc<Self>, conversation_id: &str) {
        // Step 1: decide under the lock what this keystroke changes.
        let (starts_burst, stop_old, epoch) = {
            let mut state = self.state.lock();
            state.epoch += 1;
            if let Some(timer) = state.stop_timer.take() {
                timer.abort();
            }
            let same = state.conversation.as_deref() == Some(conversation_id);
            let stop_old = if same {
                None
            } else {
                state.conversation.replace(conversation_id.to_owned())
            };
            (!same, stop_old, state.epoch)
        };

        // Step 2: wire traffic happens outside the lock.
        if let Some(old) = stop_old {
            self.send_signal(&old, false).await;
        }
        if starts_burst {
            self.send_signal(conversation_id, true).await;
        }

        // Step 3: arm the quiet timer, unless a newer keystroke already did.
        let timer = tokio::spawn(Self::quiet_expire(
            Arc::clone(self),
            conversation_id.to_owned(),
            epoch,
        ));
        let mut state = self.state.lock();
        if state.epoch == epoch {
            state.stop_timer = Some(timer);
        } else {
            timer.abort();
        }
    }

    /// Stop signaling for a conversation immediately, if it is the one
    /// being signaled. Sending a message and clearing the draft both route
    /// here.
    pub async fn stop(&self, conversation_id: &str) {
        let should_send = {
            let mut state = self.state.lock();
            if state.conversation.as_deref() == Some(conversation_id) {
                state.epoch += 1;
                if let Some(timer) = state.stop_timer.take() {
                    timer.abort();
                }
                state.conversation = None;
                true
            } else {
                false
            }
        };
        if should_send {
            self.send_signal(conversation_id, false).await;
        }
    }

    /// Drop signaling state without any wire traffic. Used on teardown,
    /// when the socket is already gone.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.epoch += 1;
        if let Some(timer) = state.stop_timer.take() {
            timer.abort();
        }
        state.conversation = None;
    }

    /// Quiet-timer body. Must not abort its own handle, so it only clears
    /// state when its epoch is still current and lets the handle drop.
    async fn quiet_expire(self: Arc<Self>, conversation_id: String, epoch: u64) {
        tokio::time::sleep(self.quiet_after).await;
        let should_send = {
            let mut state = self.state.lock();
            if state.epoch == epoch && state.conversation.as_deref() == Some(conversation_id.as_str())
            {
                state.epoch += 1;
                state.conversation = None;
                state.stop_timer = None;
                true
            } else {
                false
            }
        };
        if should_send {
            self.send_signal(&conversation_id, false).await;
        }
    }

    async fn send_signal(&self, conversation_id: &str, is_typing: bool) {
        let payload = TypingSignal {
            conversation_id: conversation_id.to_owned(),
            is_typing,
        };
        if !self.socket.send_envelope(outbound::typing(&payload)).await {
            tracing::debug!(conversation = conversation_id, "typing signal not sent");
        }
    }
}
