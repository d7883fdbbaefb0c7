//! Integration tests for the user directory and starting new chats.
//!
//! Verifies:
//! 1. Search matches on name or email and never returns the searcher.
//! 2. Starting a chat inserts a provisional conversation exactly once.
//! 3. Messaging a brand-new contact creates the thread end to end.
//! 4. Refreshing the list picks up threads started by the other side.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::sleep;

use wirechat::client::{ChatClient, ClientHandles, ClientOptions};
use wirechat::rest::RestClient;
use wirechat::session::{Credentials, Session};
use wirechat::socket::SocketConfig;
use wirechat::transport::ws::WsConnector;
use wirechat_proto::user::UserId;
use wirechat_testkit::BackendState;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

type Client = Arc<ChatClient<RestClient, WsConnector>>;

const ALICE: i64 = 1;
const BOB: i64 = 2;
const CAROL: i64 = 3;

async fn start_backend() -> (SocketAddr, Arc<BackendState>) {
    let state = Arc::new(BackendState::new());
    state
        .add_user(ALICE, "Alice Archer", "alice@example.com")
        .await;
    state.add_user(BOB, "Bob Stone", "bob@example.com").await;
    state
        .add_user(CAROL, "Carol Finch", "carol@example.com")
        .await;
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
async fn search_matches_name_or_email_and_excludes_self() {
    let (addr, state) = start_backend().await;
    let (alice, _handles) = connect_user(addr, &state, ALICE, "alice@example.com").await;
    let store = Arc::clone(alice.store());

    alice.search("carol").await.unwrap();
    let results = store.search_results();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, UserId::new(CAROL));
    assert_eq!(results[0].name, "Carol Finch");

    // The searcher never appears in their own results.
    alice.search("alice").await.unwrap();
    assert!(store.search_results().is_empty());

    // An email-domain query matches everyone else.
    alice.search("example.com").await.unwrap();
    let ids: Vec<UserId> = store.search_results().iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![UserId::new(BOB), UserId::new(CAROL)]);
}

#[tokio::test]
async fn start_chat_inserts_a_provisional_conversation_once() {
    let (addr, state) = start_backend().await;
    // A seeded bob thread pins down when the initial list load is done.
    state.seed_message(BOB, ALICE, "old thread", true).await;

    let (alice, _handles) = connect_user(addr, &state, ALICE, "alice@example.com").await;
    let store = Arc::clone(alice.store());
    wait_until(|| store.conversations().len() == 1).await;

    let conversation = alice.start_chat(UserId::new(CAROL)).await.unwrap();
    assert!(conversation.is_new);
    assert_eq!(conversation.peer.id, UserId::new(CAROL));
    assert_eq!(conversation.peer.name, "Carol Finch");
    assert_eq!(conversation.unread_count, 0);
    assert_eq!(store.conversations().len(), 2);

    // Starting the same chat again reuses the entry.
    let again = alice.start_chat(UserId::new(CAROL)).await.unwrap();
    assert_eq!(again.peer.id, UserId::new(CAROL));
    assert_eq!(store.conversations().len(), 2);

    // Starting a chat with an existing conversation returns it untouched.
    let existing = alice.start_chat(UserId::new(BOB)).await.unwrap();
    assert!(!existing.is_new);
    assert_eq!(store.conversations().len(), 2);
}

#[tokio::test]
async fn messaging_a_new_contact_creates_the_thread_end_to_end() {
    let (addr, state) = start_backend().await;
    let (alice, _handles) = connect_user(addr, &state, ALICE, "alice@example.com").await;
    let carol_id = UserId::new(CAROL);

    alice.search("carol").await.unwrap();
    alice.start_chat(carol_id).await.unwrap();
    alice.open_conversation(carol_id).await.unwrap();

    let store = Arc::clone(alice.store());
    assert_eq!(store.active_peer(), Some(carol_id));
    assert!(store.messages_for(carol_id).is_empty());
    assert!(
        store.search_results().is_empty(),
        "opening a chat leaves search mode"
    );

    alice.send_text(carol_id, "hello carol").await;
    wait_until(|| {
        store
            .messages_for(carol_id)
            .first()
            .is_some_and(|m| !m.id.starts_with("temp-"))
    })
    .await;

    // The provisional conversation picked up the preview.
    let conversation = store.conversation(carol_id).unwrap();
    assert_eq!(conversation.last_message.as_deref(), Some("hello carol"));

    let thread = state.thread(ALICE, CAROL).await;
    assert_eq!(thread.len(), 1);
    assert_eq!(thread[0].content, "hello carol");

    // Carol signs in afterwards and finds the conversation waiting.
    let (carol, _carol_handles) = connect_user(addr, &state, CAROL, "carol@example.com").await;
    let carol_store = Arc::clone(carol.store());
    wait_until(|| {
        carol_store
            .conversation(UserId::new(ALICE))
            .is_some_and(|c| c.unread_count == 1)
    })
    .await;
    assert_eq!(
        carol_store
            .conversation(UserId::new(ALICE))
            .unwrap()
            .last_message
            .as_deref(),
        Some("hello carol")
    );
}

#[tokio::test]
async fn refreshing_picks_up_threads_started_by_the_other_side() {
    let (addr, state) = start_backend().await;
    let (alice, _alice_handles) = connect_user(addr, &state, ALICE, "alice@example.com").await;
    let (carol, _carol_handles) = connect_user(addr, &state, CAROL, "carol@example.com").await;
    let alice_id = UserId::new(ALICE);
    let carol_id = UserId::new(CAROL);

    carol.start_chat(alice_id).await.unwrap();
    carol.send_text(alice_id, "hi from carol").await;

    let alice_store = Arc::clone(alice.store());
    wait_until(|| !alice_store.messages_for(carol_id).is_empty()).await;

    alice.refresh_conversations().await.unwrap();

    let conversation = alice_store.conversation(carol_id).unwrap();
    assert_eq!(conversation.last_message.as_deref(), Some("hi from carol"));
    assert_eq!(conversation.unread_count, 1);
    assert!(!conversation.is_new);
}
