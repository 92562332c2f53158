//! In-memory mock implementation of DocumentStore for testing.
//!
//! Collections are `tokio::sync::RwLock<HashMap<K, V>>`. Conditionally
//! compiled with `#[cfg(test)]`.

use crate::store::models::*;
use crate::store::traits::{title_from_message, DocumentStore};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// In-memory mock implementation of DocumentStore for testing.
#[derive(Default)]
pub struct MockDocumentStore {
    pub users: RwLock<HashMap<Uuid, UserNode>>,
    pub refresh_tokens: RwLock<HashMap<String, RefreshTokenNode>>,
    pub preferences: RwLock<HashMap<Uuid, UserPreferences>>,
    pub feeds: RwLock<HashMap<Uuid, FeedNode>>,
    pub articles: RwLock<HashMap<Uuid, ArticleNode>>,
    pub digests: RwLock<HashMap<Uuid, DigestNode>>,
    pub chat_sessions: RwLock<HashMap<Uuid, ChatSessionNode>>,
    /// Messages per session, in insertion order
    pub chat_messages: RwLock<HashMap<Uuid, Vec<ChatMessageNode>>>,
}

impl MockDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Seeding helpers
    // ========================================================================

    pub async fn with_user(self, user: UserNode) -> Self {
        self.users.write().await.insert(user.id, user);
        self
    }

    pub async fn with_article(self, article: ArticleNode) -> Self {
        self.articles.write().await.insert(article.id, article);
        self
    }

    pub async fn with_digest(self, digest: DigestNode) -> Self {
        self.digests.write().await.insert(digest.id, digest);
        self
    }

    pub async fn with_chat_session(self, session: ChatSessionNode) -> Self {
        self.chat_sessions.write().await.insert(session.id, session);
        self
    }

    /// All persisted messages of a session
    pub async fn messages_of(&self, session_id: Uuid) -> Vec<ChatMessageNode> {
        self.chat_messages
            .read()
            .await
            .get(&session_id)
            .cloned()
            .unwrap_or_default()
    }
}

fn page<T: Clone>(items: &[T], limit: usize, offset: usize) -> Vec<T> {
    items.iter().skip(offset).take(limit).cloned().collect()
}

#[async_trait]
impl DocumentStore for MockDocumentStore {
    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    async fn create_user(&self, user: &UserNode) -> Result<()> {
        let mut users = self.users.write().await;
        let email = user.email.to_lowercase();
        if users.values().any(|u| u.email.to_lowercase() == email) {
            anyhow::bail!("User with email {} already exists", user.email);
        }
        let mut user = user.clone();
        user.email = email;
        users.insert(user.id, user);
        Ok(())
    }

    async fn get_user_by_id(&self, id: Uuid) -> Result<Option<UserNode>> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<UserNode>> {
        let email = email.trim().to_lowercase();
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|u| u.email.to_lowercase() == email)
            .cloned())
    }

    async fn touch_user_login(&self, id: Uuid) -> Result<()> {
        if let Some(user) = self.users.write().await.get_mut(&id) {
            user.last_login_at = Utc::now();
        }
        Ok(())
    }

    async fn create_refresh_token(
        &self,
        user_id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        self.refresh_tokens.write().await.insert(
            token_hash.to_string(),
            RefreshTokenNode {
                token_hash: token_hash.to_string(),
                user_id,
                expires_at,
                created_at: Utc::now(),
                revoked: false,
            },
        );
        Ok(())
    }

    async fn validate_refresh_token(&self, token_hash: &str) -> Result<Option<RefreshTokenNode>> {
        let now = Utc::now();
        Ok(self
            .refresh_tokens
            .read()
            .await
            .get(token_hash)
            .filter(|t| t.is_valid_at(now))
            .cloned())
    }

    async fn revoke_refresh_token(&self, token_hash: &str) -> Result<bool> {
        match self.refresh_tokens.write().await.get_mut(token_hash) {
            Some(token) if !token.revoked => {
                token.revoked = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_all_user_tokens(&self, user_id: Uuid) -> Result<u64> {
        let mut count = 0;
        for token in self.refresh_tokens.write().await.values_mut() {
            if token.user_id == user_id && !token.revoked {
                token.revoked = true;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn get_preferences(&self, user_id: Uuid) -> Result<Option<UserPreferences>> {
        Ok(self.preferences.read().await.get(&user_id).cloned())
    }

    async fn upsert_preferences(&self, prefs: &UserPreferences) -> Result<()> {
        self.preferences
            .write()
            .await
            .insert(prefs.user_id, prefs.clone());
        Ok(())
    }

    async fn create_feed(&self, feed: &FeedNode) -> Result<()> {
        self.feeds.write().await.insert(feed.id, feed.clone());
        Ok(())
    }

    async fn get_feed(&self, id: Uuid) -> Result<Option<FeedNode>> {
        Ok(self.feeds.read().await.get(&id).cloned())
    }

    async fn list_feeds(&self, user_id: Uuid) -> Result<Vec<FeedNode>> {
        let mut feeds: Vec<_> = self
            .feeds
            .read()
            .await
            .values()
            .filter(|f| f.user_id == user_id)
            .cloned()
            .collect();
        feeds.sort_by_key(|f| f.created_at);
        Ok(feeds)
    }

    async fn update_feed(&self, feed: &FeedNode) -> Result<()> {
        self.feeds.write().await.insert(feed.id, feed.clone());
        Ok(())
    }

    async fn delete_feed(&self, id: Uuid) -> Result<bool> {
        Ok(self.feeds.write().await.remove(&id).is_some())
    }

    async fn list_articles(
        &self,
        filter: &ArticleFilter,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<ArticleNode>, usize)> {
        let mut matching: Vec<_> = self
            .articles
            .read()
            .await
            .values()
            .filter(|a| filter.matches(a))
            .cloned()
            .map(|mut a| {
                a.content = None;
                a
            })
            .collect();
        matching.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        let total = matching.len();
        Ok((page(&matching, limit, offset), total))
    }

    async fn get_article(&self, id: Uuid) -> Result<Option<ArticleNode>> {
        Ok(self.articles.read().await.get(&id).cloned())
    }

    async fn get_articles(&self, ids: &[Uuid]) -> Result<Vec<ArticleNode>> {
        let articles = self.articles.read().await;
        Ok(ids.iter().filter_map(|id| articles.get(id).cloned()).collect())
    }

    async fn upsert_article(&self, article: &ArticleNode) -> Result<()> {
        self.articles
            .write()
            .await
            .insert(article.id, article.clone());
        Ok(())
    }

    async fn topic_counts(&self, limit: usize) -> Result<Vec<TopicSuggestion>> {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for article in self.articles.read().await.values() {
            for topic in &article.topics {
                *counts.entry(topic.to_lowercase()).or_default() += 1;
            }
        }
        let mut topics: Vec<_> = counts
            .into_iter()
            .map(|(topic, article_count)| TopicSuggestion {
                topic,
                article_count,
            })
            .collect();
        topics.sort_by(|a, b| {
            b.article_count
                .cmp(&a.article_count)
                .then_with(|| a.topic.cmp(&b.topic))
        });
        topics.truncate(limit);
        Ok(topics)
    }

    async fn list_digests(
        &self,
        user_id: Uuid,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<DigestNode>, usize)> {
        let mut digests: Vec<_> = self
            .digests
            .read()
            .await
            .values()
            .filter(|d| d.user_id == user_id)
            .cloned()
            .collect();
        digests.sort_by(|a, b| {
            b.date
                .cmp(&a.date)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        let total = digests.len();
        Ok((page(&digests, limit, offset), total))
    }

    async fn get_digest(&self, id: Uuid) -> Result<Option<DigestNode>> {
        Ok(self.digests.read().await.get(&id).cloned())
    }

    async fn create_digest(&self, digest: &DigestNode) -> Result<()> {
        self.digests.write().await.insert(digest.id, digest.clone());
        Ok(())
    }

    async fn create_chat_session(&self, session: &ChatSessionNode) -> Result<()> {
        self.chat_sessions
            .write()
            .await
            .insert(session.id, session.clone());
        Ok(())
    }

    async fn get_chat_session(&self, id: Uuid) -> Result<Option<ChatSessionNode>> {
        Ok(self.chat_sessions.read().await.get(&id).cloned())
    }

    async fn list_chat_sessions(
        &self,
        user_id: Uuid,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<ChatSessionNode>, usize)> {
        let mut sessions: Vec<_> = self
            .chat_sessions
            .read()
            .await
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        let total = sessions.len();
        Ok((page(&sessions, limit, offset), total))
    }

    async fn delete_chat_session(&self, id: Uuid) -> Result<bool> {
        self.chat_messages.write().await.remove(&id);
        Ok(self.chat_sessions.write().await.remove(&id).is_some())
    }

    async fn append_chat_message(&self, message: &ChatMessageNode) -> Result<()> {
        let mut sessions = self.chat_sessions.write().await;
        let session = sessions
            .get_mut(&message.session_id)
            .ok_or_else(|| anyhow::anyhow!("Chat session {} not found", message.session_id))?;

        session.message_count += 1;
        session.updated_at = message.created_at;
        if session.title.as_deref().unwrap_or("").is_empty()
            && message.role == crate::chat::types::MessageRole::User
        {
            session.title = Some(title_from_message(&message.content));
        }

        self.chat_messages
            .write()
            .await
            .entry(message.session_id)
            .or_default()
            .push(message.clone());
        Ok(())
    }

    async fn list_chat_messages(
        &self,
        session_id: Uuid,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<ChatMessageNode>, usize)> {
        let messages = self.messages_of(session_id).await;
        let total = messages.len();
        Ok((page(&messages, limit, offset), total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{test_chat_session, test_user};

    #[tokio::test]
    async fn test_append_message_bumps_session_and_sets_title() {
        let user = test_user();
        let session = test_chat_session(user.id, None);
        let store = MockDocumentStore::new()
            .with_chat_session(session.clone())
            .await;

        store
            .append_chat_message(&ChatMessageNode::user(session.id, "Why did oil spike?"))
            .await
            .unwrap();
        store
            .append_chat_message(&ChatMessageNode::assistant(
                Uuid::new_v4(),
                session.id,
                "Supply cuts.".into(),
                vec![],
                vec![],
            ))
            .await
            .unwrap();

        let stored = store.get_chat_session(session.id).await.unwrap().unwrap();
        assert_eq!(stored.message_count, 2);
        assert_eq!(stored.title.as_deref(), Some("Why did oil spike?"));

        let (messages, total) = store.list_chat_messages(session.id, 10, 0).await.unwrap();
        assert_eq!(total, 2);
        assert_eq!(messages[0].content, "Why did oil spike?");
        assert_eq!(messages[1].content, "Supply cuts.");
    }

    #[tokio::test]
    async fn test_append_to_unknown_session_fails() {
        let store = MockDocumentStore::new();
        let result = store
            .append_chat_message(&ChatMessageNode::user(Uuid::new_v4(), "hi"))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected() {
        let user = test_user();
        let store = MockDocumentStore::new();
        store.create_user(&user).await.unwrap();

        let mut dup = test_user();
        dup.email = user.email.to_uppercase();
        assert!(store.create_user(&dup).await.is_err());
    }

    #[tokio::test]
    async fn test_revoked_refresh_token_is_invalid() {
        let store = MockDocumentStore::new();
        let user_id = Uuid::new_v4();
        let expires = Utc::now() + chrono::Duration::days(1);
        store.create_refresh_token(user_id, "h1", expires).await.unwrap();
        store.create_refresh_token(user_id, "h2", expires).await.unwrap();

        assert!(store.validate_refresh_token("h1").await.unwrap().is_some());
        assert!(store.revoke_refresh_token("h1").await.unwrap());
        assert!(store.validate_refresh_token("h1").await.unwrap().is_none());
        assert!(!store.revoke_refresh_token("h1").await.unwrap());
        assert_eq!(store.revoke_all_user_tokens(user_id).await.unwrap(), 1);
        assert!(store.validate_refresh_token("h2").await.unwrap().is_none());
    }
}
