//! DocumentStore trait definition
//!
//! Abstract interface over the document store backing the REST surface and
//! the chat proxy. Implemented by `Neo4jStore` and, in tests, by
//! `MockDocumentStore`.

use crate::store::models::*;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Check connectivity
    async fn health_check(&self) -> Result<bool>;

    // ========================================================================
    // Users
    // ========================================================================

    /// Create a user. Fails if the email is already registered.
    async fn create_user(&self, user: &UserNode) -> Result<()>;

    async fn get_user_by_id(&self, id: Uuid) -> Result<Option<UserNode>>;

    /// Lookup is case-insensitive on the email
    async fn get_user_by_email(&self, email: &str) -> Result<Option<UserNode>>;

    async fn touch_user_login(&self, id: Uuid) -> Result<()>;

    // ========================================================================
    // Refresh tokens
    // ========================================================================

    async fn create_refresh_token(
        &self,
        user_id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Returns the token only if it exists, is not revoked and not expired
    async fn validate_refresh_token(&self, token_hash: &str) -> Result<Option<RefreshTokenNode>>;

    /// Returns true if an active token was found and revoked
    async fn revoke_refresh_token(&self, token_hash: &str) -> Result<bool>;

    /// Returns the number of tokens revoked
    async fn revoke_all_user_tokens(&self, user_id: Uuid) -> Result<u64>;

    // ========================================================================
    // Preferences
    // ========================================================================

    async fn get_preferences(&self, user_id: Uuid) -> Result<Option<UserPreferences>>;

    async fn upsert_preferences(&self, prefs: &UserPreferences) -> Result<()>;

    // ========================================================================
    // Feeds
    // ========================================================================

    async fn create_feed(&self, feed: &FeedNode) -> Result<()>;

    async fn get_feed(&self, id: Uuid) -> Result<Option<FeedNode>>;

    /// Feeds of a user, oldest first
    async fn list_feeds(&self, user_id: Uuid) -> Result<Vec<FeedNode>>;

    async fn update_feed(&self, feed: &FeedNode) -> Result<()>;

    async fn delete_feed(&self, id: Uuid) -> Result<bool>;

    // ========================================================================
    // Articles
    // ========================================================================

    /// Filtered page of articles, newest first, with the total match count
    async fn list_articles(
        &self,
        filter: &ArticleFilter,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<ArticleNode>, usize)>;

    async fn get_article(&self, id: Uuid) -> Result<Option<ArticleNode>>;

    /// Fetch several articles, preserving the order of `ids`. Unknown ids are skipped.
    async fn get_articles(&self, ids: &[Uuid]) -> Result<Vec<ArticleNode>>;

    async fn upsert_article(&self, article: &ArticleNode) -> Result<()>;

    /// Topics ordered by article count (descending, then name)
    async fn topic_counts(&self, limit: usize) -> Result<Vec<TopicSuggestion>>;

    // ========================================================================
    // Digests
    // ========================================================================

    /// Digests of a user, newest date first, with the total count
    async fn list_digests(
        &self,
        user_id: Uuid,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<DigestNode>, usize)>;

    async fn get_digest(&self, id: Uuid) -> Result<Option<DigestNode>>;

    async fn create_digest(&self, digest: &DigestNode) -> Result<()>;

    // ========================================================================
    // Chat sessions & messages
    // ========================================================================

    async fn create_chat_session(&self, session: &ChatSessionNode) -> Result<()>;

    async fn get_chat_session(&self, id: Uuid) -> Result<Option<ChatSessionNode>>;

    /// Sessions of a user, most recently updated first, with the total count
    async fn list_chat_sessions(
        &self,
        user_id: Uuid,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<ChatSessionNode>, usize)>;

    /// Delete a session and its messages. Returns false if it did not exist.
    async fn delete_chat_session(&self, id: Uuid) -> Result<bool>;

    /// Append a message to its session. Bumps `message_count` and
    /// `updated_at`, and sets the session title from the first user message
    /// when the session has none.
    async fn append_chat_message(&self, message: &ChatMessageNode) -> Result<()>;

    /// Transcript page in chronological order, with the total count
    async fn list_chat_messages(
        &self,
        session_id: Uuid,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<ChatMessageNode>, usize)>;
}

/// Session title derived from the first user message
pub fn title_from_message(content: &str) -> String {
    const MAX_TITLE_CHARS: usize = 60;
    let line = content.lines().next().unwrap_or("").trim();
    if line.chars().count() <= MAX_TITLE_CHARS {
        line.to_string()
    } else {
        let cut: String = line.chars().take(MAX_TITLE_CHARS).collect();
        format!("{}...", cut.trim_end())
    }
}
