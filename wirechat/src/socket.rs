//! Connection manager: one transport connection and typed event dispatch.
//!
//! [`SocketClient`] owns at most one live connection at a time. Inbound
//! frames are decoded, demultiplexed through
//! [`wirechat_proto::event::InboundEvent`], and fanned out to subscribers
//! registered by event name. Outbound sends are fire-and-forget: a send
//! while disconnected is dropped with a warning, never queued, and the
//! return value tells the caller whether the frame reached the transport.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Value, json};

use wirechat_proto::codec;
use wirechat_proto::envelope::Envelope;
use wirechat_proto::event::InboundEvent;
use wirechat_proto::outbound;
use wirechat_proto::user::UserId;

use crate::transport::{Connector, Transport, TransportError};

/// Connection lifecycle states as observed by subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        };
        write!(f, "{name}")
    }
}

/// Opaque token identifying one registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Tuning knobs for the connection manager.
///
/// Tests shrink both delays; production uses the defaults.
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// Interval between keepalive envelopes while connected.
    pub heartbeat_interval: Duration,
    /// Settle delay between transport connect and the `registerUser` send,
    /// giving the backend time to finish its own socket bookkeeping.
    pub register_delay: Duration,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            register_delay: Duration::from_millis(500),
        }
    }
}

type Callback = Arc<dyn Fn(&Value) + Send + Sync>;

/// Everything owned by one live connection.
struct ActiveConnection<T> {
    generation: u64,
    transport: Arc<T>,
    reader: tokio::task::JoinHandle<()>,
    heartbeat: tokio::task::JoinHandle<()>,
    register: tokio::task::JoinHandle<()>,
}

struct SocketState<T> {
    phase: ConnectionState,
    identity: Option<UserId>,
    active: Option<ActiveConnection<T>>,
}

/// Connection manager generic over the dialing seam.
///
/// Exactly one instance exists per running client; components share it via
/// `Arc`. Tests substitute
/// [`crate::transport::loopback::LoopbackConnector`] for the WebSocket
/// dialer.
pub struct SocketClient<C: Connector> {
    connector: C,
    config: SocketConfig,
    /// Event name → listeners in registration order.
    listeners: Mutex<HashMap<String, Vec<(ListenerId, Callback)>>>,
    next_listener: AtomicU64,
    next_generation: AtomicU64,
    state: Mutex<SocketState<C::Conn>>,
}

impl<C: Connector> SocketClient<C> {
    /// Creates a manager with production timings.
    pub fn new(connector: C) -> Self {
        Self::with_config(connector, SocketConfig::default())
    }

    /// Creates a manager with explicit timings.
    pub fn with_config(connector: C, config: SocketConfig) -> Self {
        Self {
            connector,
            config,
            listeners: Mutex::new(HashMap::new()),
            next_listener: AtomicU64::new(0),
            next_generation: AtomicU64::new(0),
            state: Mutex::new(SocketState {
                phase: ConnectionState::Disconnected,
                identity: None,
                active: None,
            }),
        }
    }

    /// Connect and bind the given identity.
    ///
    /// Idempotent: connecting while already connected for the same identity
    /// is a no-op, as is connecting while a dial is in flight. Connecting
    /// for a different identity tears the old connection down first.
    ///
    /// On success the heartbeat starts, `registerUser` is scheduled after
    /// the configured settle delay, and a local `connected` event fires.
    ///
    /// # Errors
    ///
    /// Returns the dial error after emitting a local `error` event.
    pub async fn connect(self: &Arc<Self>, identity: UserId) -> Result<(), TransportError> {
        // Step 1: take the connection latch.
        {
            let mut state = self.state.lock();
            match state.phase {
                ConnectionState::Connecting => {
                    tracing::debug!("connect already in flight, ignoring");
                    return Ok(());
                }
                ConnectionState::Connected => {
                    if state.identity == Some(identity) {
                        tracing::debug!(user = %identity, "already connected, ignoring");
                        return Ok(());
                    }
                    tracing::info!(user = %identity, "reconnecting under a new identity");
                    if let Some(active) = state.active.take() {
                        teardown(active);
                    }
                }
                ConnectionState::Disconnected | ConnectionState::Error => {}
            }
            state.phase = ConnectionState::Connecting;
            state.identity = Some(identity);
        }

        // Step 2: dial outside the lock.
        let transport = match self.connector.dial().await {
            Ok(transport) => Arc::new(transport),
            Err(e) => {
                {
                    let mut state = self.state.lock();
                    if state.phase == ConnectionState::Connecting {
                        state.phase = ConnectionState::Error;
                        // A recorded identity means a standing session; a
                        // failed dial leaves none.
                        state.identity = None;
                    }
                }
                tracing::warn!(err = %e, "socket connect failed");
                self.emit_local("error", &json!({ "message": e.to_string() }));
                return Err(e);
            }
        };

        // Step 3: spawn the per-connection tasks.
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let reader = tokio::spawn(reader_task(
            Arc::clone(self),
            Arc::clone(&transport),
            generation,
        ));
        let heartbeat = tokio::spawn(heartbeat_task(
            Arc::clone(&transport),
            self.config.heartbeat_interval,
        ));
        let register = tokio::spawn(register_task(
            Arc::clone(&transport),
            identity,
            self.config.register_delay,
        ));

        // Step 4: install, unless a disconnect superseded the dial.
        {
            let mut state = self.state.lock();
            if state.phase != ConnectionState::Connecting || state.identity != Some(identity) {
                tracing::debug!("connect superseded during dial, discarding connection");
                reader.abort();
                heartbeat.abort();
                register.abort();
                spawn_close(transport);
                return Ok(());
            }
            state.phase = ConnectionState::Connected;
            state.active = Some(ActiveConnection {
                generation,
                transport,
                reader,
                heartbeat,
                register,
            });
        }

        tracing::info!(user = %identity, "socket connected");
        self.emit_local("connected", &json!({}));
        Ok(())
    }

    /// Tear down the connection, stop the heartbeat, and clear every
    /// registered listener. Safe to call repeatedly.
    pub fn disconnect(&self) {
        let active = {
            let mut state = self.state.lock();
            state.phase = ConnectionState::Disconnected;
            state.identity = None;
            state.active.take()
        };
        if let Some(active) = active {
            active.reader.abort();
            teardown(active);
            tracing::info!("socket disconnected");
        }
        self.listeners.lock().clear();
    }

    /// Send an event with an untyped payload.
    ///
    /// Returns `true` when the envelope was handed to the transport. A send
    /// while not connected is dropped with a warning and returns `false`;
    /// nothing is queued or retried here — optimistic state and
    /// reconciliation are the caller's concern.
    pub async fn send(&self, event: &str, data: Value) -> bool {
        self.send_envelope(Envelope::new(event, data)).await
    }

    /// Send a pre-built envelope. Same contract as [`SocketClient::send`].
    pub async fn send_envelope(&self, envelope: Envelope) -> bool {
        let transport = {
            let state = self.state.lock();
            match (&state.phase, &state.active) {
                (ConnectionState::Connected, Some(active)) => Arc::clone(&active.transport),
                _ => {
                    tracing::warn!(event = %envelope.event, "send while not connected, dropping");
                    return false;
                }
            }
        };
        let frame = match codec::encode(&envelope) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(err = %e, event = %envelope.event, "failed to encode envelope");
                return false;
            }
        };
        match transport.send(&frame).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(err = %e, event = %envelope.event, "socket send failed, dropping");
                false
            }
        }
    }

    /// Register a listener for a local event name.
    ///
    /// Multiple listeners per name are supported; they fire in registration
    /// order. The returned token is the handle for [`SocketClient::off`].
    pub fn on(
        &self,
        event: impl Into<String>,
        callback: impl Fn(&Value) + Send + Sync + 'static,
    ) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .entry(event.into())
            .or_default()
            .push((id, Arc::new(callback)));
        id
    }

    /// Remove one listener. Removing a token that is not registered is a
    /// no-op.
    pub fn off(&self, event: &str, id: ListenerId) {
        let mut listeners = self.listeners.lock();
        if let Some(entries) = listeners.get_mut(event) {
            entries.retain(|(listener_id, _)| *listener_id != id);
            if entries.is_empty() {
                listeners.remove(event);
            }
        }
    }

    /// The current lifecycle phase.
    pub fn connection_state(&self) -> ConnectionState {
        self.state.lock().phase
    }

    /// Whether a live connection is currently up.
    pub fn is_connected(&self) -> bool {
        let state = self.state.lock();
        state.phase == ConnectionState::Connected
            && state.active.as_ref().is_some_and(|a| a.transport.is_open())
    }

    /// The identity bound by the last successful connect, if any.
    pub fn identity(&self) -> Option<UserId> {
        self.state.lock().identity
    }

    /// Decode one inbound frame and fan it out to subscribers.
    ///
    /// Malformed frames and known tags with malformed payloads are logged
    /// and skipped; they never take the reader down.
    fn dispatch_frame(&self, frame: &str) {
        let envelope = match codec::decode(frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(err = %e, "malformed frame, skipping");
                return;
            }
        };
        match InboundEvent::from_envelope(envelope) {
            Ok(event) => {
                let payload = event.to_payload();
                tracing::trace!(event = event.local_name(), "inbound event");
                self.emit_local(event.local_name(), &payload);
            }
            Err(e) => {
                tracing::warn!(err = %e, "malformed event payload, skipping");
            }
        }
    }

    /// Reader-task notification that the transport ended.
    ///
    /// Only the generation that owns the current connection may flip the
    /// state — a stale reader from a superseded connection is ignored.
    fn handle_transport_down(
        &self,
        generation: u64,
        phase: ConnectionState,
        event: &str,
        payload: &Value,
    ) {
        let should_emit = {
            let mut state = self.state.lock();
            let owns = state
                .active
                .as_ref()
                .is_some_and(|a| a.generation == generation);
            if owns {
                if let Some(active) = state.active.take() {
                    active.heartbeat.abort();
                    active.register.abort();
                    spawn_close(active.transport);
                }
                state.phase = phase;
                true
            } else if state.active.is_none() && state.phase == ConnectionState::Connecting {
                // The transport died before connect finished installing it.
                state.phase = phase;
                true
            } else {
                false
            }
        };
        if should_emit {
            tracing::info!(event = event, "socket transport down");
            self.emit_local(event, payload);
        }
    }

    fn emit_local(&self, event: &str, payload: &Value) {
        let callbacks: Vec<Callback> = {
            let listeners = self.listeners.lock();
            listeners
                .get(event)
                .map(|entries| entries.iter().map(|(_, cb)| Arc::clone(cb)).collect())
                .unwrap_or_default()
        };
        for callback in callbacks {
            callback(payload);
        }
    }
}

/// Abort a connection's background tasks and close its transport.
fn teardown<T: Transport>(active: ActiveConnection<T>) {
    active.heartbeat.abort();
    active.register.abort();
    spawn_close(active.transport);
}

fn spawn_close<T: Transport>(transport: Arc<T>) {
    tokio::spawn(async move {
        transport.close().await;
    });
}

/// Background task pulling frames off the transport until it ends.
async fn reader_task<C: Connector>(
    socket: Arc<SocketClient<C>>,
    transport: Arc<C::Conn>,
    generation: u64,
) {
    loop {
        match transport.recv().await {
            Ok(frame) => socket.dispatch_frame(&frame),
            Err(TransportError::ConnectionClosed) => {
                socket.handle_transport_down(
                    generation,
                    ConnectionState::Disconnected,
                    "disconnected",
                    &json!({}),
                );
                break;
            }
            Err(e) => {
                tracing::warn!(err = %e, "socket read failed");
                socket.handle_transport_down(
                    generation,
                    ConnectionState::Error,
                    "error",
                    &json!({ "message": e.to_string() }),
                );
                break;
            }
        }
    }
}

/// Background task sending keepalives while the connection is up.
async fn heartbeat_task<T: Transport>(transport: Arc<T>, interval: Duration) {
    loop {
        tokio::time::sleep(interval).await;
        if !transport.is_open() {
            break;
        }
        let frame = match codec::encode(&outbound::heartbeat()) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(err = %e, "failed to encode heartbeat");
                continue;
            }
        };
        if transport.send(&frame).await.is_err() {
            tracing::debug!("heartbeat send failed, stopping");
            break;
        }
        tracing::trace!("heartbeat sent");
    }
}

/// One-shot task announcing the identity after the settle delay.
async fn register_task<T: Transport>(transport: Arc<T>, identity: UserId, delay: Duration) {
    tokio::time::sleep(delay).await;
    let frame = match codec::encode(&outbound::register_user(identity)) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(err = %e, "failed to encode registerUser");
            return;
        }
    };
    match transport.send(&frame).await {
        Ok(()) => tracing::info!(user = %identity, "registered identity with backend"),
        Err(e) => tracing::warn!(err = %e, "failed to register identity"),
    }
}
