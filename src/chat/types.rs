//! Chat types: wire frames, transcript messages and REST payloads

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Author of a chat message
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

/// A source reference attached to an assistant message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Citation {
    pub title: String,
    pub url: String,
}

/// A web source returned by the model's grounding tool
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroundingSource {
    pub uri: String,
    pub title: String,
}

impl From<GroundingSource> for Citation {
    fn from(source: GroundingSource) -> Self {
        Self {
            title: source.title,
            url: source.uri,
        }
    }
}

/// One message of a conversation as seen by the session client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citations: Option<Vec<Citation>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follow_up_questions: Option<Vec<String>>,
    pub created_at: DateTime<Utc>,
}

/// Frames sent by the server over the chat stream
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// A new assistant message begins
    MessageStart { message_id: String },
    /// Partial content for the in-progress assistant message
    ContentChunk { content: String },
    /// Terminal metadata for the in-progress assistant message
    MessageComplete {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
        #[serde(default)]
        citations: Vec<Citation>,
        #[serde(default)]
        follow_up_questions: Vec<String>,
    },
    Error { message: String },
}

impl ServerFrame {
    pub fn frame_type(&self) -> &'static str {
        match self {
            ServerFrame::MessageStart { .. } => "message_start",
            ServerFrame::ContentChunk { .. } => "content_chunk",
            ServerFrame::MessageComplete { .. } => "message_complete",
            ServerFrame::Error { .. } => "error",
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerFrame::Error {
            message: message.into(),
        }
    }
}

/// Frames sent by the client over the chat stream
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Message { content: String },
}

/// Chat session as returned by the REST API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSession {
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

impl From<crate::store::ChatSessionNode> for ChatSession {
    fn from(node: crate::store::ChatSessionNode) -> Self {
        Self {
            id: node.id,
            user_id: node.user_id,
            digest_id: node.digest_id,
            title: node.title,
            created_at: node.created_at,
            updated_at: node.updated_at,
            message_count: node.message_count,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub digest_id: Option<Uuid>,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSessionResponse {
    pub session_id: Uuid,
    /// Relative URL of the WebSocket chat stream
    pub stream_url: String,
    pub created_at: DateTime<Utc>,
}

/// A page of transcript messages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesPage {
    pub messages: Vec<ChatMessage>,
    pub total_count: usize,
    pub has_more: bool,
    pub offset: usize,
    pub limit: usize,
}

/// One-shot generation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerateResponse {
    pub text: String,
    #[serde(default)]
    pub sources: Vec<GroundingSource>,
    #[serde(default)]
    pub follow_up_questions: Vec<String>,
}
