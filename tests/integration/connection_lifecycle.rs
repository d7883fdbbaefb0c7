//! Integration tests for the connection lifecycle against a live backend.
//!
//! Verifies:
//! 1. Login dials the socket, registers the user, and loads the
//!    conversation list after the settle window.
//! 2. Heartbeats reach the backend while the connection is up.
//! 3. An explicit disconnect deregisters without touching chat state or
//!    the session.
//! 4. Reconnect re-registers under the signed-in identity.
//! 5. A server-side close surfaces as `Disconnected` and resets presence.
//! 6. Logout deregisters and clears the session and the store.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

use wirechat::client::{ChatClient, ClientEvent, ClientHandles, ClientOptions};
use wirechat::rest::RestClient;
use wirechat::session::{Credentials, Session};
use wirechat::socket::SocketConfig;
use wirechat::transport::ws::WsConnector;
use wirechat_proto::envelope::Envelope;
use wirechat_proto::user::UserId;
use wirechat_testkit::BackendState;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

type Client = Arc<ChatClient<RestClient, WsConnector>>;

const ALICE: i64 = 1;
const BOB: i64 = 2;

/// Starts a backend seeded with alice and bob.
async fn start_backend() -> (SocketAddr, Arc<BackendState>) {
    let state = Arc::new(BackendState::new());
    state
        .add_user(ALICE, "Alice Archer", "alice@example.com")
        .await;
    state.add_user(BOB, "Bob Stone", "bob@example.com").await;
    let (addr, _server) = wirechat_testkit::start_server("127.0.0.1:0", Arc::clone(&state))
        .await
        .unwrap();
    (addr, state)
}

/// Client options tuned for test speed.
fn fast_options() -> ClientOptions {
    ClientOptions {
        socket: SocketConfig {
            heartbeat_interval: Duration::from_secs(30),
            register_delay: Duration::from_millis(10),
        },
        settle_delay: Duration::from_millis(30),
        read_cooldown: Duration::ZERO,
        typing_quiet: Duration::from_millis(80),
        typing_expiry: Duration::from_secs(600),
        snapshot_path: None,
        flush_interval: Duration::from_secs(600),
    }
}

/// Builds a client wired to the backend at `addr`.
fn build_client(addr: SocketAddr) -> (Client, ClientHandles) {
    let session = Arc::new(Session::new());
    let api = Arc::new(RestClient::new(
        format!("http://{addr}/api"),
        Arc::clone(&session),
    ));
    let connector = WsConnector::new(format!("ws://{addr}/ws"));
    ChatClient::assemble(api, connector, session, fast_options())
}

/// Issues tokens for `id` and signs the client in.
async fn sign_in(state: &BackendState, client: &Client, id: i64, email: &str) {
    let (access, refresh) = state.issue_tokens(id).await;
    client
        .login(
            UserId::new(id),
            email,
            Credentials {
                access_token: access,
                refresh_token: refresh,
            },
        )
        .await
        .unwrap();
}

/// Polls `condition` until it holds or two seconds pass.
async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not met within 2s");
        sleep(Duration::from_millis(10)).await;
    }
}

/// Polls the backend until it reports `user` with the wanted registration.
async fn wait_for_registration(state: &BackendState, user: i64, connected: bool) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while state.connected(user).await != connected {
        assert!(
            Instant::now() < deadline,
            "backend registration for user {user} never became {connected}"
        );
        sleep(Duration::from_millis(10)).await;
    }
}

/// Receives the next client event, failing after two seconds.
async fn next_event(events: &mut mpsc::Receiver<ClientEvent>) -> ClientEvent {
    timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("timed out waiting for a client event")
        .expect("client event channel closed")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn login_registers_and_loads_conversations() {
    let (addr, state) = start_backend().await;
    state.seed_message(BOB, ALICE, "hello there", false).await;

    let (client, mut handles) = build_client(addr);
    sign_in(&state, &client, ALICE, "alice@example.com").await;

    assert_eq!(
        next_event(&mut handles.client_events).await,
        ClientEvent::Connected
    );
    assert!(client.is_connected());
    assert!(client.session().is_authenticated());
    wait_for_registration(&state, ALICE, true).await;

    // The conversation list arrives once the settle window has passed.
    let store = Arc::clone(client.store());
    wait_until(|| store.conversations().len() == 1).await;
    let conversation = store.conversation(UserId::new(BOB)).unwrap();
    assert_eq!(conversation.peer.name, "Bob Stone");
    assert_eq!(conversation.unread_count, 1);
    assert_eq!(conversation.last_message.as_deref(), Some("hello there"));
}

#[tokio::test]
async fn heartbeats_flow_while_connected() {
    let (addr, state) = start_backend().await;

    let session = Arc::new(Session::new());
    let api = Arc::new(RestClient::new(
        format!("http://{addr}/api"),
        Arc::clone(&session),
    ));
    let options = ClientOptions {
        socket: SocketConfig {
            heartbeat_interval: Duration::from_millis(40),
            register_delay: Duration::from_millis(5),
        },
        ..fast_options()
    };
    let (client, _handles) = ChatClient::assemble(
        api,
        WsConnector::new(format!("ws://{addr}/ws")),
        session,
        options,
    );
    sign_in(&state, &client, ALICE, "alice@example.com").await;
    wait_for_registration(&state, ALICE, true).await;

    let deadline = Instant::now() + Duration::from_secs(2);
    while state.heartbeat_count() < 2 {
        assert!(Instant::now() < deadline, "heartbeats never arrived");
        sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn explicit_disconnect_deregisters_but_keeps_chat_state() {
    let (addr, state) = start_backend().await;
    state.seed_message(BOB, ALICE, "keep me", false).await;

    let (client, _handles) = build_client(addr);
    sign_in(&state, &client, ALICE, "alice@example.com").await;
    wait_for_registration(&state, ALICE, true).await;
    let store = Arc::clone(client.store());
    wait_until(|| !store.conversations().is_empty()).await;

    client.disconnect();

    wait_for_registration(&state, ALICE, false).await;
    assert!(!client.is_connected());
    assert!(
        client.session().is_authenticated(),
        "disconnect must not sign the user out"
    );
    assert_eq!(
        store.conversations().len(),
        1,
        "chat state survives a disconnect"
    );
}

#[tokio::test]
async fn reconnect_restores_the_registration() {
    let (addr, state) = start_backend().await;
    let (client, mut handles) = build_client(addr);
    sign_in(&state, &client, ALICE, "alice@example.com").await;
    assert_eq!(
        next_event(&mut handles.client_events).await,
        ClientEvent::Connected
    );
    wait_for_registration(&state, ALICE, true).await;

    client.disconnect();
    wait_for_registration(&state, ALICE, false).await;

    client.reconnect().await.unwrap();
    assert_eq!(
        next_event(&mut handles.client_events).await,
        ClientEvent::Connected
    );
    wait_for_registration(&state, ALICE, true).await;
    assert!(client.is_connected());
}

#[tokio::test]
async fn server_close_surfaces_disconnected_and_clears_presence() {
    let (addr, state) = start_backend().await;
    let (client, mut handles) = build_client(addr);
    sign_in(&state, &client, ALICE, "alice@example.com").await;
    assert_eq!(
        next_event(&mut handles.client_events).await,
        ClientEvent::Connected
    );
    wait_for_registration(&state, ALICE, true).await;

    // Seed presence so the teardown has something to clear.
    let online = Envelope::new(
        "userStatusChanged",
        json!({ "userId": BOB, "isOnline": true, "status": "online" }),
    );
    assert!(state.send_to_user(ALICE, &online).await);
    let presence = Arc::clone(client.presence());
    wait_until(|| presence.appears_online(UserId::new(BOB))).await;

    state.close_all_connections().await;

    assert_eq!(
        next_event(&mut handles.client_events).await,
        ClientEvent::Disconnected
    );
    wait_until(|| !client.is_connected()).await;
    assert!(
        !presence.appears_online(UserId::new(BOB)),
        "presence resets while offline"
    );
}

#[tokio::test]
async fn logout_clears_the_session_and_deregisters() {
    let (addr, state) = start_backend().await;
    state.seed_message(BOB, ALICE, "gone after logout", false).await;

    let (client, _handles) = build_client(addr);
    sign_in(&state, &client, ALICE, "alice@example.com").await;
    wait_for_registration(&state, ALICE, true).await;
    let store = Arc::clone(client.store());
    wait_until(|| !store.conversations().is_empty()).await;

    client.logout().await;

    wait_for_registration(&state, ALICE, false).await;
    assert!(!client.session().is_authenticated());
    assert!(client.session().identity().is_none());
    assert!(store.conversations().is_empty());
    assert_eq!(store.current_user(), None);
}
