//! Document models persisted in the store

use crate::chat::types::{ChatMessage, Citation, MessageRole};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Users & auth
// ============================================================================

/// A registered user (email/password account)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserNode {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    /// Bcrypt hash, never serialized to clients
    #[serde(skip_serializing, default)]
    pub password_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_login_at: DateTime<Utc>,
}

/// A persisted refresh token. Only the SHA-256 hash of the raw token is stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshTokenNode {
    pub token_hash: String,
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub revoked: bool,
}

impl RefreshTokenNode {
    /// A token is usable if it is neither revoked nor expired
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && self.expires_at > now
    }
}

// ============================================================================
// Preferences
// ============================================================================

/// How often a user receives a digest
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DigestFrequency {
    #[default]
    Daily,
    Weekly,
}

impl std::fmt::Display for DigestFrequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DigestFrequency::Daily => write!(f, "daily"),
            DigestFrequency::Weekly => write!(f, "weekly"),
        }
    }
}

impl std::str::FromStr for DigestFrequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "daily" => Ok(DigestFrequency::Daily),
            "weekly" => Ok(DigestFrequency::Weekly),
            _ => Err(format!("Unknown digest frequency: {}", s)),
        }
    }
}

/// Per-user digest preferences
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserPreferences {
    pub user_id: Uuid,
    /// Followed topics, lowercase, deduplicated
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub digest_frequency: DigestFrequency,
    #[serde(default)]
    pub email_digest: bool,
    pub updated_at: DateTime<Utc>,
}

impl UserPreferences {
    /// Default preferences for a user who never saved any
    pub fn empty(user_id: Uuid) -> Self {
        Self {
            user_id,
            topics: Vec::new(),
            digest_frequency: DigestFrequency::Daily,
            email_digest: false,
            updated_at: Utc::now(),
        }
    }
}

// ============================================================================
// Feeds, articles, digests
// ============================================================================

/// An RSS feed subscribed to by a user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedNode {
    pub id: Uuid,
    pub user_id: Uuid,
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A scraped article
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArticleNode {
    pub id: Uuid,
    #[serde(default)]
    pub feed_id: Option<Uuid>,
    pub title: String,
    pub url: String,
    pub source: String,
    #[serde(default)]
    pub summary: Option<String>,
    /// Full text, omitted from list responses
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default)]
    pub topics: Vec<String>,
    pub published_at: DateTime<Utc>,
}

impl ArticleNode {
    pub fn citation(&self) -> Citation {
        Citation {
            title: self.title.clone(),
            url: self.url.clone(),
        }
    }
}

/// Article list filter
#[derive(Debug, Clone, Default)]
pub struct ArticleFilter {
    pub topic: Option<String>,
    pub feed_id: Option<Uuid>,
    /// Case-insensitive match on title and summary
    pub search: Option<String>,
}

impl ArticleFilter {
    /// In-memory evaluation, mirrors the Cypher WHERE clause
    pub fn matches(&self, article: &ArticleNode) -> bool {
        if let Some(ref topic) = self.topic {
            let topic = topic.to_lowercase();
            if !article.topics.iter().any(|t| t.to_lowercase() == topic) {
                return false;
            }
        }
        if let Some(feed_id) = self.feed_id {
            if article.feed_id != Some(feed_id) {
                return false;
            }
        }
        if let Some(ref search) = self.search {
            let needle = search.trim().to_lowercase();
            if !needle.is_empty() {
                let in_title = article.title.to_lowercase().contains(&needle);
                let in_summary = article
                    .summary
                    .as_deref()
                    .is_some_and(|s| s.to_lowercase().contains(&needle));
                if !in_title && !in_summary {
                    return false;
                }
            }
        }
        true
    }
}

/// A dated collection of curated articles for a user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigestNode {
    pub id: Uuid,
    pub user_id: Uuid,
    pub date: NaiveDate,
    pub title: String,
    #[serde(default)]
    pub summary: Option<String>,
    /// Ordered; the order defines the `[n]` numbering used in chat prompts
    #[serde(default)]
    pub article_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// A topic suggestion with its article count
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TopicSuggestion {
    pub topic: String,
    pub article_count: usize,
}

// ============================================================================
// Chat
// ============================================================================

/// A persisted chat session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSessionNode {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(default)]
    pub digest_id: Option<Uuid>,
    #[serde(default)]
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub message_count: i64,
}

/// A persisted chat message (transcript entry)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessageNode {
    pub id: Uuid,
    pub session_id: Uuid,
    pub role: MessageRole,
    pub content: String,
    #[serde(default)]
    pub citations: Vec<Citation>,
    #[serde(default)]
    pub follow_up_questions: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl ChatMessageNode {
    pub fn user(session_id: Uuid, content: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            role: MessageRole::User,
            content: content.to_string(),
            citations: Vec::new(),
            follow_up_questions: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn assistant(
        id: Uuid,
        session_id: Uuid,
        content: String,
        citations: Vec<Citation>,
        follow_up_questions: Vec<String>,
    ) -> Self {
        Self {
            id,
            session_id,
            role: MessageRole::Assistant,
            content,
            citations,
            follow_up_questions,
            created_at: Utc::now(),
        }
    }
}

impl From<ChatMessageNode> for ChatMessage {
    fn from(node: ChatMessageNode) -> Self {
        let (citations, follow_up_questions) = match node.role {
            MessageRole::User => (None, None),
            MessageRole::Assistant => (Some(node.citations), Some(node.follow_up_questions)),
        };
        Self {
            id: node.id.to_string(),
            role: node.role,
            content: node.content,
            citations,
            follow_up_questions,
            created_at: node.created_at,
        }
    }
}
