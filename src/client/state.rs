//! Session reducer: the client-side view of one chat conversation.
//!
//! Pure and synchronous. The session client feeds it the loaded transcript,
//! every decoded [`ServerFrame`], local sends and connection changes.

use crate::chat::types::{ChatMessage, MessageRole, ServerFrame};
use chrono::Utc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

/// Why a local send was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendRejection {
    Empty,
    NotConnected,
}

#[derive(Debug, Clone)]
pub struct SessionState {
    messages: Vec<ChatMessage>,
    connection: ConnectionState,
    loading: bool,
    last_error: Option<String>,
    /// Index of the assistant message opened by the last `message_start`
    current: Option<usize>,
    /// Whether `current` still accepts content chunks
    streaming: bool,
    /// Local sends not yet answered by a `message_start` or an `error`
    unanswered: usize,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            connection: ConnectionState::Connecting,
            loading: false,
            last_error: None,
            current: None,
            streaming: false,
            unanswered: 0,
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    pub fn is_connected(&self) -> bool {
        self.connection == ConnectionState::Open
    }

    /// True between a send and the first frame of the reply (or an error)
    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// The assistant message currently receiving chunks
    pub fn streaming_message(&self) -> Option<&ChatMessage> {
        self.current
            .filter(|_| self.streaming)
            .and_then(|i| self.messages.get(i))
    }

    /// Replace the message list with the server transcript
    pub fn load_history(&mut self, transcript: Vec<ChatMessage>) {
        self.messages = transcript;
        self.current = None;
        self.streaming = false;
        self.unanswered = 0;
    }

    pub fn mark_open(&mut self) {
        self.connection = ConnectionState::Open;
    }

    /// The connection is gone for good; no reconnect is attempted
    pub fn connection_lost(&mut self, reason: Option<String>) {
        self.connection = ConnectionState::Closed;
        self.loading = false;
        self.streaming = false;
        self.unanswered = 0;
        if reason.is_some() {
            self.last_error = reason;
        }
    }

    /// Apply one server frame. Never panics, whatever the frame order.
    pub fn apply_frame(&mut self, frame: &ServerFrame) {
        match frame {
            ServerFrame::MessageStart { message_id } => {
                self.messages.push(ChatMessage {
                    id: message_id.clone(),
                    role: MessageRole::Assistant,
                    content: String::new(),
                    citations: None,
                    follow_up_questions: None,
                    created_at: Utc::now(),
                });
                self.current = Some(self.messages.len() - 1);
                self.streaming = true;
                self.loading = false;
                self.unanswered = self.unanswered.saturating_sub(1);
            }
            ServerFrame::ContentChunk { content } => {
                if !self.streaming {
                    tracing::debug!("content_chunk without message_start, ignored");
                    return;
                }
                if let Some(message) = self.current.and_then(|i| self.messages.get_mut(i)) {
                    message.content.push_str(content);
                }
            }
            ServerFrame::MessageComplete {
                citations,
                follow_up_questions,
                ..
            } => {
                self.loading = false;
                let Some(message) = self.current.and_then(|i| self.messages.get_mut(i)) else {
                    tracing::debug!("message_complete without message_start, ignored");
                    return;
                };
                message.citations = Some(citations.clone());
                message.follow_up_questions = Some(follow_up_questions.clone());
                self.streaming = false;
            }
            ServerFrame::Error { message } => {
                self.loading = false;
                self.last_error = Some(message.clone());
                if self.unanswered > 0 {
                    // A send was refused; a reply in flight keeps streaming
                    self.unanswered -= 1;
                } else if self.streaming {
                    self.abandon_current();
                }
            }
        }
    }

    /// Drop the partial reply of a failed generation. It is never stored.
    fn abandon_current(&mut self) {
        self.streaming = false;
        if let Some(i) = self.current.take() {
            if i < self.messages.len() {
                let dropped = self.messages.remove(i);
                tracing::debug!(
                    message_id = %dropped.id,
                    "Reply failed mid-stream, partial text dropped"
                );
            }
        }
    }

    /// Validate a local send and append the optimistic user message.
    ///
    /// Rejections leave the state untouched.
    pub fn begin_send(&mut self, text: &str) -> Result<&ChatMessage, SendRejection> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SendRejection::Empty);
        }
        if !self.is_connected() {
            tracing::warn!("Send while disconnected, message dropped");
            return Err(SendRejection::NotConnected);
        }

        self.messages.push(ChatMessage {
            id: format!("local-{}", Uuid::new_v4()),
            role: MessageRole::User,
            content: text.to_string(),
            citations: None,
            follow_up_questions: None,
            created_at: Utc::now(),
        });
        self.loading = true;
        self.unanswered += 1;
        self.last_error = None;
        Ok(&self.messages[self.messages.len() - 1])
    }
}
