//! REST collaborator: history, search, and read-receipt endpoints.
//!
//! The store talks to the backend through the [`ChatApi`] trait so tests
//! can script responses. [`RestClient`] is the production implementation:
//! every request carries the session's bearer token, and a 401 triggers one
//! transparent credential refresh followed by one retry of the original
//! request. A second rejection surfaces [`ApiError::SessionExpired`] — the
//! caller owns the teardown that follows.

use std::sync::Arc;

use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;

use wirechat_proto::message::MessageKind;
use wirechat_proto::presence::PresenceStatus;
use wirechat_proto::user::UserId;

use crate::session::{Credentials, Session};

/// Errors from the REST collaborator.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The request could not be sent or the response never arrived.
    #[error("request failed: {0}")]
    Transport(String),

    /// The backend answered with a non-success status.
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    /// The response body did not match the documented shape.
    #[error("malformed response: {0}")]
    Decode(String),

    /// Credentials expired and the refresh flow could not recover.
    #[error("session expired")]
    SessionExpired,
}

/// A peer's profile as the backend returns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerProfile {
    pub id: UserId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default)]
    pub is_online: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<PresenceStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<String>,
}

/// One row of `GET /chat/conversations`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub peer: PeerProfile,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_at: Option<String>,
    #[serde(default)]
    pub unread_count: u32,
}

/// One stored message from `GET /chat/{peer}/messages`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryMessage {
    pub id: String,
    pub from_user_id: UserId,
    pub to_user_id: UserId,
    pub content: String,
    pub created_at: String,
    #[serde(default)]
    pub message_type: MessageKind,
    #[serde(default)]
    pub delivered: bool,
    #[serde(default)]
    pub seen: bool,
}

/// One page of conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPage {
    pub messages: Vec<HistoryMessage>,
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub has_more: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    access_token: String,
    refresh_token: String,
}

/// The store's seam to the backend REST contract.
pub trait ChatApi: Send + Sync + 'static {
    /// `GET /chat/conversations`.
    fn list_conversations(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<ConversationSummary>, ApiError>> + Send;

    /// `GET /chat/{peer}/messages?page=N`.
    fn conversation_messages(
        &self,
        peer: UserId,
        page: u32,
    ) -> impl std::future::Future<Output = Result<HistoryPage, ApiError>> + Send;

    /// `POST /chat/{peer}/read`.
    fn mark_conversation_read(
        &self,
        peer: UserId,
    ) -> impl std::future::Future<Output = Result<(), ApiError>> + Send;

    /// `GET /users/search?q={query}&i={exclude}`.
    fn search_users(
        &self,
        query: &str,
        exclude: UserId,
    ) -> impl std::future::Future<Output = Result<Vec<PeerProfile>, ApiError>> + Send;

    /// `GET /users/{id}`.
    fn fetch_user(
        &self,
        id: UserId,
    ) -> impl std::future::Future<Output = Result<PeerProfile, ApiError>> + Send;
}

/// Bearer-authenticated HTTP client for the chat backend.
pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
    session: Arc<Session>,
}

impl RestClient {
    /// Creates a client for the given base URL (scheme + host + port).
    pub fn new(base_url: impl Into<String>, session: Arc<Session>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            http: reqwest::Client::new(),
            base_url,
            session,
        }
    }

    /// The base URL requests are issued against.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn send_authorized(
        &self,
        method: &Method,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<reqwest::Response, ApiError> {
        let token = self.session.access_token().ok_or(ApiError::SessionExpired)?;
        let mut request = self
            .http
            .request(method.clone(), self.endpoint(path))
            .bearer_auth(token);
        if !query.is_empty() {
            request = request.query(query);
        }
        request.send().await.map_err(transport_error)
    }

    /// Issue a request, refreshing credentials once on a 401.
    async fn execute(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<reqwest::Response, ApiError> {
        let mut response = self.send_authorized(&method, path, query).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            self.refresh_credentials().await?;
            response = self.send_authorized(&method, path, query).await?;
            if response.status() == StatusCode::UNAUTHORIZED {
                tracing::warn!(path = path, "request rejected again after refresh");
                return Err(ApiError::SessionExpired);
            }
        }
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(path = path, status = status.as_u16(), "request failed");
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ApiError> {
        let response = self.execute(Method::GET, path, query).await?;
        response.json().await.map_err(decode_error)
    }

    async fn post_ok(&self, path: &str) -> Result<(), ApiError> {
        self.execute(Method::POST, path, &[]).await?;
        Ok(())
    }

    /// Exchange the refresh token for fresh credentials.
    async fn refresh_credentials(&self) -> Result<(), ApiError> {
        let refresh_token = self
            .session
            .refresh_token()
            .ok_or(ApiError::SessionExpired)?;
        tracing::info!("access token rejected, refreshing credentials");

        let response = self
            .http
            .post(self.endpoint("/auth/refresh"))
            .json(&json!({ "refreshToken": refresh_token }))
            .send()
            .await
            .map_err(transport_error)?;
        if !response.status().is_success() {
            tracing::warn!(status = response.status().as_u16(), "credential refresh rejected");
            return Err(ApiError::SessionExpired);
        }

        let tokens: RefreshResponse = response.json().await.map_err(decode_error)?;
        self.session.rotate_credentials(Credentials {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
        });
        Ok(())
    }
}

impl ChatApi for RestClient {
    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, ApiError> {
        self.get_json("/chat/conversations", &[]).await
    }

    async fn conversation_messages(
        &self,
        peer: UserId,
        page: u32,
    ) -> Result<HistoryPage, ApiError> {
        self.get_json(
            &format!("/chat/{peer}/messages"),
            &[("page", page.to_string())],
        )
        .await
    }

    async fn mark_conversation_read(&self, peer: UserId) -> Result<(), ApiError> {
        self.post_ok(&format!("/chat/{peer}/read")).await
    }

    async fn search_users(
        &self,
        query: &str,
        exclude: UserId,
    ) -> Result<Vec<PeerProfile>, ApiError> {
        self.get_json(
            "/users/search",
            &[("q", query.to_owned()), ("i", exclude.to_string())],
        )
        .await
    }

    async fn fetch_user(&self, id: UserId) -> Result<PeerProfile, ApiError> {
        self.get_json(&format!("/users/{id}"), &[]).await
    }
}

fn transport_error(err: reqwest::Error) -> ApiError {
    ApiError::Transport(err.to_string())
}

fn decode_error(err: reqwest::Error) -> ApiError {
    ApiError::Decode(err.to_string())
}
