//! HTTP client for the digest-chat REST API.
//!
//! Authenticated calls carry the access token as a Bearer header. A 401
//! triggers exactly one `POST /auth/refresh` and one retry of the original
//! request; if either fails the stored tokens are dropped and the call
//! returns [`ClientError::SessionExpired`].

use crate::api::auth_handlers::{AuthResponse, UserResponse};
use crate::api::digest_handlers::DigestDetail;
use crate::api::PaginatedResponse;
use crate::chat::types::{
    ChatMessage, ChatSession, CreateSessionRequest, CreateSessionResponse, GenerateRequest,
    GenerateResponse, MessagesPage,
};
use crate::store::{ArticleFilter, ArticleNode, DigestNode};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const TRANSCRIPT_PAGE: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Session expired, please log in again")]
    SessionExpired,

    #[error("{message} (HTTP {status})")]
    Api { status: u16, message: String },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid payload: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),

    #[error("Invalid server URL: {0}")]
    InvalidUrl(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        ClientError::WebSocket(Box::new(e))
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// Access + refresh token pair, persisted by the CLI between runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub access_token: String,
    pub refresh_token: String,
}

impl From<&AuthResponse> for Credentials {
    fn from(resp: &AuthResponse) -> Self {
        Self {
            access_token: resp.access_token.clone(),
            refresh_token: resp.refresh_token.clone(),
        }
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    credentials: RwLock<Option<Credentials>>,
    /// Serializes refreshes so concurrent 401s rotate the token only once
    refresh_lock: Mutex<()>,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let parsed = reqwest::Url::parse(base_url)
            .map_err(|e| ClientError::InvalidUrl(format!("{}: {}", base_url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ClientError::InvalidUrl(format!(
                "{}: expected http or https",
                base_url
            )));
        }
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        })
    }

    pub fn with_credentials(self, credentials: Credentials) -> Self {
        Self {
            credentials: RwLock::new(Some(credentials)),
            ..self
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Current token pair (changes after every refresh)
    pub async fn credentials(&self) -> Option<Credentials> {
        self.credentials.read().await.clone()
    }

    pub async fn clear_credentials(&self) {
        *self.credentials.write().await = None;
    }

    async fn access_token(&self) -> Option<String> {
        self.credentials
            .read()
            .await
            .as_ref()
            .map(|c| c.access_token.clone())
    }

    // ========================================================================
    // Auth
    // ========================================================================

    pub async fn signup(&self, email: &str, password: &str, name: &str) -> Result<AuthResponse> {
        let body = serde_json::json!({"email": email, "password": password, "name": name});
        self.authenticate("/auth/signup", body).await
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<AuthResponse> {
        let body = serde_json::json!({"email": email, "password": password});
        self.authenticate("/auth/login", body).await
    }

    async fn authenticate(&self, path: &str, body: serde_json::Value) -> Result<AuthResponse> {
        let resp = self
            .request(Method::POST, path, &[], Some(&body), None)
            .await?;
        let auth: AuthResponse = Self::decode(resp).await?;
        *self.credentials.write().await = Some(Credentials::from(&auth));
        tracing::debug!(user_id = %auth.user.id, "Authenticated");
        Ok(auth)
    }

    /// Revoke the refresh token server-side and forget the local pair.
    ///
    /// Local tokens are dropped even if the server call fails.
    pub async fn logout(&self, all_sessions: bool) -> Result<()> {
        let Some(credentials) = self.credentials.write().await.take() else {
            return Ok(());
        };
        let body = serde_json::json!({
            "refresh_token": credentials.refresh_token,
            "all": all_sessions,
        });
        let resp = self
            .request(Method::POST, "/auth/logout", &[], Some(&body), None)
            .await?;
        Self::expect_success(resp).await
    }

    pub async fn me(&self) -> Result<UserResponse> {
        self.send_authed(Method::GET, "/auth/me", &[], None).await
    }

    /// Rotate the token pair. `stale` is the access token that was rejected;
    /// if the pair already changed since, another caller refreshed it.
    async fn refresh(&self, stale: Option<&str>) -> Result<()> {
        let _guard = self.refresh_lock.lock().await;

        let current = self.credentials().await;
        let Some(current) = current else {
            return Err(ClientError::SessionExpired);
        };
        if stale.is_some_and(|s| s != current.access_token) {
            return Ok(());
        }

        let body = serde_json::json!({"refresh_token": current.refresh_token});
        let resp = self
            .request(Method::POST, "/auth/refresh", &[], Some(&body), None)
            .await?;
        if !resp.status().is_success() {
            tracing::debug!(status = %resp.status(), "Token refresh rejected");
            return Err(ClientError::SessionExpired);
        }
        let auth: AuthResponse = Self::decode(resp).await?;
        *self.credentials.write().await = Some(Credentials::from(&auth));
        tracing::debug!("Access token refreshed");
        Ok(())
    }

    /// Refresh after the server rejected `stale`; drops the tokens if that fails
    pub(crate) async fn refresh_after_rejection(&self, stale: Option<&str>) -> Result<()> {
        match self.refresh(stale).await {
            Ok(()) => Ok(()),
            // Transport failures keep the tokens for a later attempt
            Err(e @ ClientError::Http(_)) => Err(e),
            Err(_) => {
                self.clear_credentials().await;
                Err(ClientError::SessionExpired)
            }
        }
    }

    // ========================================================================
    // Digests & articles
    // ========================================================================

    pub async fn list_digests(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<PaginatedResponse<DigestNode>> {
        let query = [("limit", limit.to_string()), ("offset", offset.to_string())];
        self.send_authed(Method::GET, "/digests", &query, None).await
    }

    pub async fn get_digest(&self, digest_id: Uuid) -> Result<DigestDetail> {
        self.send_authed(Method::GET, &format!("/digests/{}", digest_id), &[], None)
            .await
    }

    pub async fn list_articles(
        &self,
        filter: &ArticleFilter,
        limit: usize,
        offset: usize,
    ) -> Result<PaginatedResponse<ArticleNode>> {
        let mut query = vec![("limit", limit.to_string()), ("offset", offset.to_string())];
        if let Some(ref topic) = filter.topic {
            query.push(("topic", topic.clone()));
        }
        if let Some(feed_id) = filter.feed_id {
            query.push(("feed_id", feed_id.to_string()));
        }
        if let Some(ref search) = filter.search {
            query.push(("search", search.clone()));
        }
        self.send_authed(Method::GET, "/articles", &query, None).await
    }

    pub async fn get_article(&self, article_id: Uuid) -> Result<ArticleNode> {
        self.send_authed(Method::GET, &format!("/articles/{}", article_id), &[], None)
            .await
    }

    // ========================================================================
    // Chat
    // ========================================================================

    pub async fn create_session(
        &self,
        req: &CreateSessionRequest,
    ) -> Result<CreateSessionResponse> {
        let body = serde_json::to_value(req)?;
        self.send_authed(Method::POST, "/chat/sessions", &[], Some(body))
            .await
    }

    pub async fn list_sessions(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<PaginatedResponse<ChatSession>> {
        let query = [("limit", limit.to_string()), ("offset", offset.to_string())];
        self.send_authed(Method::GET, "/chat/sessions", &query, None)
            .await
    }

    pub async fn delete_session(&self, session_id: Uuid) -> Result<()> {
        let path = format!("/chat/sessions/{}", session_id);
        let resp = self
            .send_authed_raw(Method::DELETE, &path, &[], None)
            .await?;
        Self::expect_success(resp).await
    }

    pub async fn list_messages(
        &self,
        session_id: Uuid,
        limit: usize,
        offset: usize,
    ) -> Result<MessagesPage> {
        let query = [("limit", limit.to_string()), ("offset", offset.to_string())];
        let path = format!("/chat/sessions/{}/messages", session_id);
        self.send_authed(Method::GET, &path, &query, None).await
    }

    /// The whole transcript of a session, oldest first
    pub async fn load_transcript(&self, session_id: Uuid) -> Result<Vec<ChatMessage>> {
        let mut messages = Vec::new();
        loop {
            let page = self
                .list_messages(session_id, TRANSCRIPT_PAGE, messages.len())
                .await?;
            let fetched = page.messages.len();
            messages.extend(page.messages);
            if !page.has_more || fetched == 0 {
                break;
            }
        }
        Ok(messages)
    }

    pub async fn generate(&self, req: &GenerateRequest) -> Result<GenerateResponse> {
        let body = serde_json::to_value(req)?;
        self.send_authed(Method::POST, "/chat/generate", &[], Some(body))
            .await
    }

    /// WebSocket URL of a session stream, carrying the current access token
    pub async fn ws_url(&self, session_id: Uuid) -> Result<String> {
        let ws_base = if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            return Err(ClientError::InvalidUrl(self.base_url.clone()));
        };
        let mut url = format!("{}/chat/ws/{}", ws_base, session_id);
        if let Some(token) = self.access_token().await {
            url.push_str("?token=");
            url.push_str(&urlencoding::encode(&token));
        }
        Ok(url)
    }

    // ========================================================================
    // Plumbing
    // ========================================================================

    async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&serde_json::Value>,
        token: Option<&str>,
    ) -> Result<reqwest::Response> {
        let mut req = self
            .http
            .request(method, format!("{}{}", self.base_url, path));
        if !query.is_empty() {
            req = req.query(query);
        }
        if let Some(body) = body {
            req = req.json(body);
        }
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }
        Ok(req.send().await?)
    }

    async fn send_authed<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<serde_json::Value>,
    ) -> Result<T> {
        let resp = self.send_authed_raw(method, path, query, body).await?;
        Self::decode(resp).await
    }

    /// Send with the access token, refreshing once on 401
    async fn send_authed_raw(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<serde_json::Value>,
    ) -> Result<reqwest::Response> {
        let token = self.access_token().await;
        let resp = self
            .request(method.clone(), path, query, body.as_ref(), token.as_deref())
            .await?;
        if resp.status() != StatusCode::UNAUTHORIZED {
            return Ok(resp);
        }

        tracing::debug!(path, "Access token rejected, refreshing");
        self.refresh_after_rejection(token.as_deref()).await?;

        let token = self.access_token().await;
        let resp = self
            .request(method, path, query, body.as_ref(), token.as_deref())
            .await?;
        if resp.status() == StatusCode::UNAUTHORIZED {
            self.clear_credentials().await;
            return Err(ClientError::SessionExpired);
        }
        Ok(resp)
    }

    async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
        if !resp.status().is_success() {
            return Err(Self::api_error(resp).await);
        }
        Ok(resp.json().await?)
    }

    async fn expect_success(resp: reqwest::Response) -> Result<()> {
        if !resp.status().is_success() {
            return Err(Self::api_error(resp).await);
        }
        Ok(())
    }

    async fn api_error(resp: reqwest::Response) -> ClientError {
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&text)
            .map(|b| b.error)
            .unwrap_or_else(|_| {
                status
                    .canonical_reason()
                    .unwrap_or("Request failed")
                    .to_string()
            });
        ClientError::Api {
            status: status.as_u16(),
            message,
        }
    }
}
