//! REST side of the test backend, mounted under `/api`.
//!
//! Serves the endpoints the client's REST collaborator calls, in the same
//! JSON shapes: conversation summaries, paged history, read
//! acknowledgments, user search and lookup, and the token refresh
//! exchange. Every route except `/auth/refresh` requires a bearer token.

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};

use wirechat_proto::message::MessageKind;
use wirechat_proto::presence::PresenceStatus;

use crate::state::{BackendState, StoredMessage, SummaryRow, TestUser};

/// Routes for the `/api` tree; state is attached by the caller.
pub fn router() -> Router<Arc<BackendState>> {
    Router::new()
        .route("/chat/conversations", get(list_conversations))
        .route("/chat/{peer}/messages", get(conversation_messages))
        .route("/chat/{peer}/read", post(mark_read))
        .route("/users/search", get(search_users))
        .route("/users/{id}", get(fetch_user))
        .route("/auth/refresh", post(refresh))
}

// ---- wire shapes ----

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProfileBody {
    id: i64,
    name: String,
    email: String,
    is_online: bool,
    status: PresenceStatus,
}

impl From<TestUser> for ProfileBody {
    fn from(user: TestUser) -> Self {
        Self {
            id: user.id,
            name: user.name,
            email: user.email,
            is_online: user.is_online,
            status: user.status,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SummaryBody {
    peer: ProfileBody,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_message_at: Option<String>,
    unread_count: u32,
}

impl From<SummaryRow> for SummaryBody {
    fn from(row: SummaryRow) -> Self {
        Self {
            peer: row.peer.into(),
            last_message: row.last.as_ref().map(|m| m.content.clone()),
            last_message_at: row.last.as_ref().map(|m| m.created_at.clone()),
            unread_count: row.unread,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MessageBody {
    id: String,
    from_user_id: i64,
    to_user_id: i64,
    content: String,
    created_at: String,
    message_type: MessageKind,
    delivered: bool,
    seen: bool,
}

impl From<StoredMessage> for MessageBody {
    fn from(row: StoredMessage) -> Self {
        Self {
            id: row.id.to_string(),
            from_user_id: row.from,
            to_user_id: row.to,
            content: row.content,
            created_at: row.created_at,
            message_type: row.kind,
            delivered: row.delivered,
            seen: row.seen,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PageBody {
    messages: Vec<MessageBody>,
    page: u32,
    has_more: bool,
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    #[serde(default)]
    page: u32,
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    #[serde(default)]
    q: String,
    /// User id to exclude from results (the searcher).
    i: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshBody {
    refresh_token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenPair {
    access_token: String,
    refresh_token: String,
}

// ---- handlers ----

/// Resolves the bearer token, or rejects with 401.
async fn bearer_user(state: &BackendState, headers: &HeaderMap) -> Result<i64, StatusCode> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));
    match token {
        Some(token) => state
            .authenticate(token)
            .await
            .ok_or(StatusCode::UNAUTHORIZED),
        None => Err(StatusCode::UNAUTHORIZED),
    }
}

async fn list_conversations(
    State(state): State<Arc<BackendState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<SummaryBody>>, StatusCode> {
    let user_id = bearer_user(&state, &headers).await?;
    let rows = state.summaries_for(user_id).await;
    Ok(Json(rows.into_iter().map(SummaryBody::from).collect()))
}

async fn conversation_messages(
    State(state): State<Arc<BackendState>>,
    Path(peer): Path<i64>,
    Query(query): Query<HistoryQuery>,
    headers: HeaderMap,
) -> Result<Json<PageBody>, StatusCode> {
    let user_id = bearer_user(&state, &headers).await?;
    let page = query.page.max(1);
    let (rows, has_more) = state.history(user_id, peer, page).await;
    Ok(Json(PageBody {
        messages: rows.into_iter().map(MessageBody::from).collect(),
        page,
        has_more,
    }))
}

async fn mark_read(
    State(state): State<Arc<BackendState>>,
    Path(peer): Path<i64>,
    headers: HeaderMap,
) -> Result<StatusCode, StatusCode> {
    let user_id = bearer_user(&state, &headers).await?;
    let changed = state.mark_read(user_id, peer).await;
    tracing::debug!(reader = %user_id, peer = %peer, changed = %changed, "conversation read");
    Ok(StatusCode::NO_CONTENT)
}

async fn search_users(
    State(state): State<Arc<BackendState>>,
    Query(query): Query<SearchQuery>,
    headers: HeaderMap,
) -> Result<Json<Vec<ProfileBody>>, StatusCode> {
    bearer_user(&state, &headers).await?;
    if query.q.trim().is_empty() {
        return Ok(Json(Vec::new()));
    }
    let hits = state.search(query.q.trim(), query.i).await;
    Ok(Json(hits.into_iter().map(ProfileBody::from).collect()))
}

async fn fetch_user(
    State(state): State<Arc<BackendState>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Result<Json<ProfileBody>, StatusCode> {
    bearer_user(&state, &headers).await?;
    state
        .user(id)
        .await
        .map(|user| Json(ProfileBody::from(user)))
        .ok_or(StatusCode::NOT_FOUND)
}

async fn refresh(
    State(state): State<Arc<BackendState>>,
    Json(body): Json<RefreshBody>,
) -> Result<Json<TokenPair>, StatusCode> {
    match state.rotate(&body.refresh_token).await {
        Some((access_token, refresh_token)) => {
            tracing::debug!("refresh token exchanged");
            Ok(Json(TokenPair {
                access_token,
                refresh_token,
            }))
        }
        None => {
            tracing::debug!("refresh token rejected");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}
