//! Integration tests for read receipts against a live backend.
//!
//! Verifies:
//! 1. Marking a conversation read zeroes the unread count, records the
//!    acknowledgment server-side, and flips the stored rows to seen.
//! 2. Opening a conversation with unread messages marks it read without
//!    an explicit call.
//! 3. The author sees the `messageSeen` receipt on their own copy in
//!    real time.
//! 4. Repeated acknowledgments inside the cooldown collapse into one
//!    network call.
//! 5. History rows arrive with their stored seen flags.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::sleep;

use wirechat::client::{ChatClient, ClientHandles, ClientOptions};
use wirechat::rest::RestClient;
use wirechat::session::{Credentials, Session};
use wirechat::socket::SocketConfig;
use wirechat::store::Direction;
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

/// Builds a client with `options`, signs it in, and waits for the
/// registration to land.
async fn connect_with(
    addr: SocketAddr,
    state: &BackendState,
    id: i64,
    email: &str,
    options: ClientOptions,
) -> (Client, ClientHandles) {
    let session = Arc::new(Session::new());
    let api = Arc::new(RestClient::new(
        format!("http://{addr}/api"),
        Arc::clone(&session),
    ));
    let connector = WsConnector::new(format!("ws://{addr}/ws"));
    let (client, handles) = ChatClient::assemble(api, connector, session, options);

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

async fn connect_user(
    addr: SocketAddr,
    state: &BackendState,
    id: i64,
    email: &str,
) -> (Client, ClientHandles) {
    connect_with(addr, state, id, email, fast_options()).await
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not met within 2s");
        sleep(Duration::from_millis(10)).await;
    }
}

/// Polls the backend read-mark counter until it reaches `expected`.
async fn wait_for_read_marks(state: &BackendState, reader: i64, peer: i64, expected: usize) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while state.read_mark_count(reader, peer).await != expected {
        assert!(
            Instant::now() < deadline,
            "read marks for {reader} -> {peer} never reached {expected}"
        );
        sleep(Duration::from_millis(10)).await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn mark_read_clears_unread_and_persists_server_side() {
    let (addr, state) = start_backend().await;
    state.seed_message(BOB, ALICE, "first", false).await;
    state.seed_message(BOB, ALICE, "second", false).await;

    let (alice, _handles) = connect_user(addr, &state, ALICE, "alice@example.com").await;
    let bob_id = UserId::new(BOB);
    let store = Arc::clone(alice.store());
    wait_until(|| {
        store
            .conversation(bob_id)
            .is_some_and(|c| c.unread_count == 2)
    })
    .await;

    alice.mark_read(bob_id).await.unwrap();

    assert_eq!(store.conversation(bob_id).unwrap().unread_count, 0);
    assert_eq!(state.read_mark_count(ALICE, BOB).await, 1);
    assert!(
        state.thread(BOB, ALICE).await.iter().all(|m| m.seen),
        "the acknowledgment flips every stored row to seen"
    );
}

#[tokio::test]
async fn opening_an_unread_conversation_marks_it_read() {
    let (addr, state) = start_backend().await;
    state.seed_message(BOB, ALICE, "waiting for you", false).await;

    let (alice, _handles) = connect_user(addr, &state, ALICE, "alice@example.com").await;
    let bob_id = UserId::new(BOB);
    let store = Arc::clone(alice.store());
    wait_until(|| {
        store
            .conversation(bob_id)
            .is_some_and(|c| c.unread_count == 1)
    })
    .await;

    alice.open_conversation(bob_id).await.unwrap();

    wait_until(|| {
        store
            .conversation(bob_id)
            .is_some_and(|c| c.unread_count == 0)
    })
    .await;
    wait_for_read_marks(&state, ALICE, BOB, 1).await;
}

#[tokio::test]
async fn the_author_sees_the_seen_receipt() {
    let (addr, state) = start_backend().await;
    let (alice, _alice_handles) = connect_user(addr, &state, ALICE, "alice@example.com").await;
    let (bob, _bob_handles) = connect_user(addr, &state, BOB, "bob@example.com").await;
    let alice_id = UserId::new(ALICE);
    let bob_id = UserId::new(BOB);

    alice.send_text(bob_id, "seen soon").await;

    let alice_store = Arc::clone(alice.store());
    let bob_store = Arc::clone(bob.store());
    wait_until(|| {
        alice_store
            .messages_for(bob_id)
            .first()
            .is_some_and(|m| !m.id.starts_with("temp-"))
    })
    .await;
    wait_until(|| !bob_store.messages_for(alice_id).is_empty()).await;

    bob.mark_read(alice_id).await.unwrap();

    // The receipt travels back over the socket to the author's copy.
    wait_until(|| {
        alice_store
            .messages_for(bob_id)
            .first()
            .is_some_and(|m| m.seen)
    })
    .await;
    let id: i64 = alice_store.messages_for(bob_id)[0].id.parse().unwrap();
    assert!(state.message(id).await.unwrap().seen);
}

#[tokio::test]
async fn repeat_acknowledgments_collapse_within_the_cooldown() {
    let (addr, state) = start_backend().await;
    state.seed_message(BOB, ALICE, "to be read once", false).await;

    let options = ClientOptions {
        read_cooldown: Duration::from_secs(5),
        ..fast_options()
    };
    let (alice, _handles) =
        connect_with(addr, &state, ALICE, "alice@example.com", options).await;
    let bob_id = UserId::new(BOB);
    let store = Arc::clone(alice.store());
    wait_until(|| store.conversation(bob_id).is_some()).await;

    alice.mark_read(bob_id).await.unwrap();
    alice.mark_read(bob_id).await.unwrap();
    alice.mark_read(bob_id).await.unwrap();

    assert_eq!(
        state.read_mark_count(ALICE, BOB).await,
        1,
        "repeats inside the cooldown stay local"
    );
}

#[tokio::test]
async fn history_rows_carry_their_seen_flags() {
    let (addr, state) = start_backend().await;
    state.seed_message(ALICE, BOB, "you read this", true).await;
    state.seed_message(BOB, ALICE, "you have not read this", false).await;

    let (alice, _handles) = connect_user(addr, &state, ALICE, "alice@example.com").await;
    let bob_id = UserId::new(BOB);
    let store = Arc::clone(alice.store());
    wait_until(|| store.conversation(bob_id).is_some()).await;

    // Fetch history without opening the conversation, so nothing marks
    // the unread row as read behind the assertion.
    store.load_messages(bob_id).await.unwrap();

    let history = store.messages_for(bob_id);
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].direction, Direction::Mine);
    assert!(history[0].seen);
    assert_eq!(history[1].direction, Direction::Theirs);
    assert!(!history[1].seen);
}
