//! Raw REST contract tests against the test backend.
//!
//! The client's typed DTOs already decode these endpoints; this file pins
//! the other half of the contract, the exact JSON the backend emits, so a
//! field rename on either side fails a test instead of silently dropping
//! data.
//!
//! Verifies:
//! 1. Conversation summaries use camelCase keys and nest the peer profile.
//! 2. History pages carry string message ids, ascending order, and paging
//!    flags.
//! 3. Requests without a valid bearer token are rejected with 401.
//! 4. Refresh tokens are single-use.
//! 5. Read acknowledgments answer 204 with no body.
//! 6. Unknown user lookups answer 404.

use std::net::SocketAddr;
use std::sync::Arc;

use serde_json::{Value, json};

use wirechat_testkit::BackendState;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

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

/// GET `path` with a bearer token; returns status and parsed body.
async fn get_json(addr: SocketAddr, path: &str, token: &str) -> (u16, Value) {
    let response = reqwest::Client::new()
        .get(format!("http://{addr}/api{path}"))
        .bearer_auth(token)
        .send()
        .await
        .unwrap();
    let status = response.status().as_u16();
    let body = response.text().await.unwrap();
    let value = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&body).unwrap()
    };
    (status, value)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn conversation_summaries_use_camel_case_and_nest_the_peer() {
    let (addr, state) = start_backend().await;
    state.seed_message(BOB, ALICE, "latest words", false).await;
    let (access, _refresh) = state.issue_tokens(ALICE).await;

    let (status, body) = get_json(addr, "/chat/conversations", &access).await;
    assert_eq!(status, 200);

    let list = body.as_array().unwrap();
    assert_eq!(list.len(), 1);
    let summary = &list[0];
    assert_eq!(summary["peer"]["id"], json!(BOB));
    assert_eq!(summary["peer"]["name"], json!("Bob Stone"));
    assert!(summary["peer"]["isOnline"].is_boolean());
    assert_eq!(summary["lastMessage"], json!("latest words"));
    assert!(summary["lastMessageAt"].is_string());
    assert_eq!(summary["unreadCount"], json!(1));
}

#[tokio::test]
async fn history_pages_carry_string_ids_and_paging_flags() {
    let (addr, state) = start_backend().await;
    let first = state.seed_message(ALICE, BOB, "one", true).await;
    state.seed_message(BOB, ALICE, "two", false).await;
    state.seed_message(ALICE, BOB, "three", false).await;
    let (access, _refresh) = state.issue_tokens(ALICE).await;

    let (status, body) = get_json(addr, &format!("/chat/{BOB}/messages?page=1"), &access).await;
    assert_eq!(status, 200);

    assert_eq!(body["page"], json!(1));
    assert_eq!(body["hasMore"], json!(false));
    let messages = body["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 3);

    // Ids travel as strings even though the backend stores integers.
    assert_eq!(messages[0]["id"], json!(first.to_string()));
    assert_eq!(messages[0]["fromUserId"], json!(ALICE));
    assert_eq!(messages[0]["toUserId"], json!(BOB));
    assert_eq!(messages[0]["messageType"], json!("text"));
    assert!(messages[0]["createdAt"].is_string());
    assert_eq!(messages[0]["seen"], json!(true));

    // Oldest first within the page.
    let contents: Vec<&str> = messages
        .iter()
        .map(|m| m["content"].as_str().unwrap())
        .collect();
    assert_eq!(contents, vec!["one", "two", "three"]);
}

#[tokio::test]
async fn requests_without_a_valid_bearer_are_rejected() {
    let (addr, _state) = start_backend().await;

    let response = reqwest::Client::new()
        .get(format!("http://{addr}/api/chat/conversations"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 401);

    let (status, _body) = get_json(addr, "/chat/conversations", "access-bogus").await;
    assert_eq!(status, 401);
}

#[tokio::test]
async fn refresh_tokens_are_single_use() {
    let (addr, state) = start_backend().await;
    let (_access, refresh) = state.issue_tokens(ALICE).await;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://{addr}/api/auth/refresh"))
        .json(&json!({ "refreshToken": refresh }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let pair: Value = response.json().await.unwrap();
    assert!(pair["accessToken"].is_string());
    assert!(pair["refreshToken"].is_string());
    assert_ne!(pair["refreshToken"], json!(refresh));

    // The old refresh token was consumed by the rotation.
    let replay = client
        .post(format!("http://{addr}/api/auth/refresh"))
        .json(&json!({ "refreshToken": refresh }))
        .send()
        .await
        .unwrap();
    assert_eq!(replay.status().as_u16(), 401);

    // The freshly issued access token works.
    let new_access = pair["accessToken"].as_str().unwrap();
    let (status, _body) = get_json(addr, "/chat/conversations", new_access).await;
    assert_eq!(status, 200);
}

#[tokio::test]
async fn read_acknowledgments_answer_no_content() {
    let (addr, state) = start_backend().await;
    state.seed_message(BOB, ALICE, "unread", false).await;
    let (access, _refresh) = state.issue_tokens(ALICE).await;

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/api/chat/{BOB}/read"))
        .bearer_auth(&access)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 204);
    assert!(response.text().await.unwrap().is_empty());

    assert_eq!(state.read_mark_count(ALICE, BOB).await, 1);
    assert!(state.thread(BOB, ALICE).await.iter().all(|m| m.seen));
}

#[tokio::test]
async fn unknown_user_lookups_answer_not_found() {
    let (addr, state) = start_backend().await;
    let (access, _refresh) = state.issue_tokens(ALICE).await;

    let (status, _body) = get_json(addr, "/users/99", &access).await;
    assert_eq!(status, 404);

    let (status, body) = get_json(addr, &format!("/users/{BOB}"), &access).await;
    assert_eq!(status, 200);
    assert_eq!(body["id"], json!(BOB));
    assert_eq!(body["email"], json!("bob@example.com"));
}
