//! Integration tests for the optimistic send lifecycle between two live
//! clients.
//!
//! Verifies:
//! 1. A sent message appears immediately under a temporary id and is
//!    reconciled to the server id by the acknowledgment.
//! 2. The recipient receives the message in real time and the unread
//!    count tracks whether their conversation is open.
//! 3. Messages to offline peers are stored server-side and show up in
//!    history on the next login.
//! 4. A send without a connection fails fast and can be retried or
//!    discarded.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::sleep;

use wirechat::client::{ChatClient, ClientHandles, ClientOptions};
use wirechat::rest::RestClient;
use wirechat::session::{Credentials, Session};
use wirechat::socket::SocketConfig;
use wirechat::store::{DeliveryState, Direction};
use wirechat::transport::ws::WsConnector;
use wirechat_proto::user::UserId;
use wirechat_testkit::BackendState;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

type Client = Arc<ChatClient<RestClient, WsConnector>>;

const ALICE: i64 = 1;
const BOB: i64 = 2;

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

/// Builds a client, signs it in as `id`, and waits for the backend to see
/// the registration.
async fn connect_user(
    addr: SocketAddr,
    state: &BackendState,
    id: i64,
    email: &str,
) -> (Client, ClientHandles) {
    let session = Arc::new(Session::new());
    let api = Arc::new(RestClient::new(
        format!("http://{addr}/api"),
        Arc::clone(&session),
    ));
    let connector = WsConnector::new(format!("ws://{addr}/ws"));
    let (client, handles) = ChatClient::assemble(api, connector, session, fast_options());

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

    let deadline = Instant::now() + Duration::from_secs(2);
    while !state.connected(id).await {
        assert!(Instant::now() < deadline, "user {id} never registered");
        sleep(Duration::from_millis(10)).await;
    }
    (client, handles)
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not met within 2s");
        sleep(Duration::from_millis(10)).await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn a_sent_message_reconciles_with_the_server_ack() {
    let (addr, state) = start_backend().await;
    let (alice, _handles) = connect_user(addr, &state, ALICE, "alice@example.com").await;
    let bob = UserId::new(BOB);

    let temp_id = alice.send_text(bob, "hi bob").await;
    assert!(temp_id.starts_with("temp-"));

    let store = Arc::clone(alice.store());
    wait_until(|| {
        store
            .messages_for(bob)
            .first()
            .is_some_and(|m| !m.id.starts_with("temp-"))
    })
    .await;

    let message = store.messages_for(bob).remove(0);
    assert_eq!(message.text, "hi bob");
    assert_eq!(message.direction, Direction::Mine);
    assert_eq!(message.state, DeliveryState::Delivered);
    assert!(message.delivered);

    // The backend stored the same message under the acknowledged id.
    let stored = state.message(message.id.parse().unwrap()).await.unwrap();
    assert_eq!(stored.content, "hi bob");
    assert_eq!(stored.from, ALICE);
    assert_eq!(stored.to, BOB);
}

#[tokio::test]
async fn the_recipient_sees_the_message_and_unread_grows() {
    let (addr, state) = start_backend().await;
    // A seeded (read) thread gives both sides a conversation row up front.
    state.seed_message(ALICE, BOB, "earlier", true).await;

    let (alice, _alice_handles) = connect_user(addr, &state, ALICE, "alice@example.com").await;
    let (bob, _bob_handles) = connect_user(addr, &state, BOB, "bob@example.com").await;
    let alice_id = UserId::new(ALICE);

    let bob_store = Arc::clone(bob.store());
    wait_until(|| bob_store.conversation(alice_id).is_some()).await;

    alice.send_text(UserId::new(BOB), "are you there?").await;

    wait_until(|| !bob_store.messages_for(alice_id).is_empty()).await;
    let received = bob_store.messages_for(alice_id).remove(0);
    assert_eq!(received.text, "are you there?");
    assert_eq!(received.direction, Direction::Theirs);
    assert!(received.delivered);

    // Bob is not viewing the conversation, so the message counts as unread
    // and becomes the preview.
    let conversation = bob_store.conversation(alice_id).unwrap();
    assert_eq!(conversation.unread_count, 1);
    assert_eq!(conversation.last_message.as_deref(), Some("are you there?"));
}

#[tokio::test]
async fn an_open_conversation_appends_without_unread() {
    let (addr, state) = start_backend().await;
    state.seed_message(ALICE, BOB, "earlier", true).await;

    let (alice, _alice_handles) = connect_user(addr, &state, ALICE, "alice@example.com").await;
    let (bob, _bob_handles) = connect_user(addr, &state, BOB, "bob@example.com").await;
    let alice_id = UserId::new(ALICE);

    let bob_store = Arc::clone(bob.store());
    wait_until(|| bob_store.conversation(alice_id).is_some()).await;
    bob.open_conversation(alice_id).await.unwrap();

    alice.send_text(UserId::new(BOB), "reading along?").await;

    wait_until(|| bob_store.messages_for(alice_id).len() == 2).await;
    let conversation = bob_store.conversation(alice_id).unwrap();
    assert_eq!(
        conversation.unread_count, 0,
        "an open conversation accrues no unread"
    );
    assert_eq!(bob_store.active_messages().len(), 2);
}

#[tokio::test]
async fn messages_to_offline_peers_surface_in_history() {
    let (addr, state) = start_backend().await;
    let (alice, _handles) = connect_user(addr, &state, ALICE, "alice@example.com").await;
    let bob_id = UserId::new(BOB);

    alice.send_text(bob_id, "see you later").await;
    let alice_store = Arc::clone(alice.store());
    wait_until(|| {
        alice_store
            .messages_for(bob_id)
            .first()
            .is_some_and(|m| m.state == DeliveryState::Delivered)
    })
    .await;

    // Stored, not forwarded: bob has no socket.
    let thread = state.thread(ALICE, BOB).await;
    assert_eq!(thread.len(), 1);
    assert!(!thread[0].delivered);

    // Bob logs in later and finds the message in history.
    let (bob, _bob_handles) = connect_user(addr, &state, BOB, "bob@example.com").await;
    bob.open_conversation(UserId::new(ALICE)).await.unwrap();
    let history = bob.store().messages_for(UserId::new(ALICE));
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].text, "see you later");
    assert_eq!(history[0].direction, Direction::Theirs);
}

#[tokio::test]
async fn a_send_without_a_connection_fails_and_can_be_retried() {
    let (addr, state) = start_backend().await;
    let (alice, _handles) = connect_user(addr, &state, ALICE, "alice@example.com").await;
    let bob_id = UserId::new(BOB);

    alice.disconnect();
    let temp_id = alice.send_text(bob_id, "into the void").await;

    let store = Arc::clone(alice.store());
    assert!(
        store.messages_for(bob_id)[0].is_failed(),
        "a send with no connection fails immediately"
    );

    alice.reconnect().await.unwrap();
    let deadline = Instant::now() + Duration::from_secs(2);
    while !state.connected(ALICE).await {
        assert!(Instant::now() < deadline, "reconnect never registered");
        sleep(Duration::from_millis(10)).await;
    }

    store.retry_message(bob_id, &temp_id).await.unwrap();
    wait_until(|| {
        store
            .messages_for(bob_id)
            .first()
            .is_some_and(|m| m.state == DeliveryState::Delivered)
    })
    .await;

    assert_eq!(store.messages_for(bob_id).len(), 1);
    assert_eq!(state.thread(ALICE, BOB).await.len(), 1);
}

#[tokio::test]
async fn a_failed_message_can_be_discarded() {
    let (addr, state) = start_backend().await;
    let (alice, _handles) = connect_user(addr, &state, ALICE, "alice@example.com").await;
    let bob_id = UserId::new(BOB);

    alice.disconnect();
    let temp_id = alice.send_text(bob_id, "never mind").await;

    let store = Arc::clone(alice.store());
    assert!(store.messages_for(bob_id)[0].is_failed());

    store.discard_message(bob_id, &temp_id);
    assert!(store.messages_for(bob_id).is_empty());
    assert!(state.thread(ALICE, BOB).await.is_empty());
}
