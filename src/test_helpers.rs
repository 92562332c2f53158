//! Test helper factories and mock state builders
//!
//! Factories for store models with sensible defaults, a scripted
//! [`GenerativeModel`], and builders for server state / routers backed by
//! [`MockDocumentStore`].
#![allow(dead_code)]

use crate::api::handlers::{ServerState, SharedState};
use crate::chat::types::GroundingSource;
use crate::chat::{ChatConfig, ChatProxy};
use crate::genai::{
    GenAiError, Generation, GenerationRequest, GenerationStream, GenerativeModel, StreamChunk,
};
use crate::store::mock::MockDocumentStore;
use crate::store::*;
use crate::AuthConfig;
use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

pub const TEST_JWT_SECRET: &str = "digest-chat-test-secret-32-chars!!";

// ============================================================================
// Mock state builders
// ============================================================================

/// Server state over an empty mock store and a model that always answers "ok"
pub async fn mock_server_state(
    auth_config: Option<AuthConfig>,
) -> (SharedState, Arc<MockDocumentStore>) {
    mock_server_state_with(
        MockDocumentStore::new(),
        Arc::new(ScriptedModel::replying(&["ok"])),
        auth_config,
    )
}

/// Server state over a pre-seeded mock store and the given model
pub fn mock_server_state_with(
    store: MockDocumentStore,
    model: Arc<ScriptedModel>,
    auth_config: Option<AuthConfig>,
) -> (SharedState, Arc<MockDocumentStore>) {
    let store = Arc::new(store);
    let proxy = ChatProxy::new(store.clone(), model, ChatConfig::default());
    let state = Arc::new(ServerState {
        store: store.clone(),
        proxy: Arc::new(proxy),
        auth_config,
        server_port: 0,
        public_url: None,
    });
    (state, store)
}

/// Full router (all routes and middleware) over the given state
pub fn test_router(state: SharedState) -> axum::Router {
    crate::api::routes::create_router(state)
}

/// Auth config with a fixed secret and default lifetimes
pub fn test_auth_config() -> AuthConfig {
    AuthConfig::with_secret(TEST_JWT_SECRET)
}

/// A valid access token for `user`, signed with the `test_auth_config()` secret
pub fn test_bearer_token(user: &UserNode) -> String {
    crate::auth::jwt::issue_access_token(user, &test_auth_config())
        .expect("test token encoding should succeed")
}

// ============================================================================
// Test data factories
// ============================================================================

/// A user with a unique `@example.com` address and no password
pub fn test_user() -> UserNode {
    let id = Uuid::new_v4();
    let now = Utc::now();
    UserNode {
        id,
        email: format!("reader-{}@example.com", &id.simple().to_string()[..8]),
        name: "Test Reader".to_string(),
        password_hash: None,
        created_at: now,
        last_login_at: now,
    }
}

/// A user whose password hash matches `password` (bcrypt, minimum cost)
pub fn test_user_with_password(password: &str) -> UserNode {
    let mut user = test_user();
    user.password_hash = Some(bcrypt::hash(password, 4).expect("bcrypt hash"));
    user
}

pub fn test_article(title: &str) -> ArticleNode {
    let slug = title.to_lowercase().replace(' ', "-");
    ArticleNode {
        id: Uuid::new_v4(),
        feed_id: None,
        title: title.to_string(),
        url: format!("https://news.example/{}", slug),
        source: "Example Wire".to_string(),
        summary: Some(format!("Summary of {}", title)),
        content: None,
        topics: vec!["markets".to_string()],
        published_at: Utc::now(),
    }
}

/// A digest for `user_id` listing `articles` in order
pub fn test_digest(user_id: Uuid, articles: &[&ArticleNode]) -> DigestNode {
    DigestNode {
        id: Uuid::new_v4(),
        user_id,
        date: Utc::now().date_naive(),
        title: "Morning Briefing".to_string(),
        summary: Some("Today's top stories".to_string()),
        article_ids: articles.iter().map(|a| a.id).collect(),
        created_at: Utc::now(),
    }
}

pub fn test_feed(user_id: Uuid) -> FeedNode {
    FeedNode {
        id: Uuid::new_v4(),
        user_id,
        url: "https://news.example/rss.xml".to_string(),
        title: Some("Example Wire".to_string()),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

pub fn test_chat_session(user_id: Uuid, digest_id: Option<Uuid>) -> ChatSessionNode {
    ChatSessionNode {
        id: Uuid::new_v4(),
        user_id,
        digest_id,
        title: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
        message_count: 0,
    }
}

// ============================================================================
// Scripted model
// ============================================================================

/// A [`GenerativeModel`] that replays fixed chunks and records every request
pub struct ScriptedModel {
    chunks: Vec<String>,
    sources: Vec<GroundingSource>,
    failure_status: Option<u16>,
    fail_mid_stream: bool,
    chunk_delay: Option<Duration>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedModel {
    pub fn replying(chunks: &[&str]) -> Self {
        Self {
            chunks: chunks.iter().map(|c| c.to_string()).collect(),
            sources: Vec::new(),
            failure_status: None,
            fail_mid_stream: false,
            chunk_delay: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Every call fails with an HTTP error before any chunk
    pub fn failing(status: u16) -> Self {
        let mut model = Self::replying(&[]);
        model.failure_status = Some(status);
        model
    }

    /// The stream yields its chunks and then an error
    pub fn failing_mid_stream(mut self) -> Self {
        self.fail_mid_stream = true;
        self
    }

    /// Sources attached to the last chunk (and to one-shot generations)
    pub fn with_sources(mut self, sources: Vec<GroundingSource>) -> Self {
        self.sources = sources;
        self
    }

    /// Sleep before each chunk
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn last_request(&self) -> Option<GenerationRequest> {
        self.requests.lock().unwrap().last().cloned()
    }

    fn record(&self, request: &GenerationRequest) -> Result<(), GenAiError> {
        self.requests.lock().unwrap().push(request.clone());
        match self.failure_status {
            Some(status) => Err(GenAiError::Http {
                status,
                message: "scripted failure".to_string(),
                retry_after_secs: None,
            }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl GenerativeModel for ScriptedModel {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, GenAiError> {
        self.record(request)?;
        Ok(Generation {
            text: self.chunks.concat(),
            sources: self.sources.clone(),
        })
    }

    async fn generate_stream(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationStream, GenAiError> {
        self.record(request)?;

        let last = self.chunks.len().saturating_sub(1);
        let mut items: Vec<Result<StreamChunk, GenAiError>> = self
            .chunks
            .iter()
            .enumerate()
            .map(|(i, text)| {
                Ok(StreamChunk {
                    text: text.clone(),
                    sources: if i == last {
                        self.sources.clone()
                    } else {
                        Vec::new()
                    },
                })
            })
            .collect();
        if self.fail_mid_stream {
            items.push(Err(GenAiError::Decode("scripted stream interruption".into())));
        }

        let delay = self.chunk_delay;
        let stream = futures::stream::iter(items).then(move |item| async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            item
        });
        Ok(Box::pin(stream))
    }
}
