//! Stateless chat proxy between the session stream and the generative model
//!
//! The proxy keeps no per-session state: every call loads what it needs from
//! the store, forwards the prompt upstream and persists the exchange.

use super::config::ChatConfig;
use super::prompt::{
    build_request, build_system_instruction, collect_citations, dedup_sources, history_turns,
    split_follow_ups, DigestContext, FollowUpSplitter,
};
use super::types::{GenerateRequest, GenerateResponse, ServerFrame};
use crate::genai::{GenAiError, GenerationRequest, GenerativeModel};
use crate::store::{ChatMessageNode, ChatSessionNode, DocumentStore};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use uuid::Uuid;

/// Shown to the client for any upstream failure; details stay in the logs
pub const GENERIC_ERROR_MESSAGE: &str =
    "The assistant is unavailable right now. Please try again in a moment.";

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("{0}")]
    NotFound(String),

    #[error("Access to this chat session is not allowed")]
    Forbidden,

    #[error("{0}")]
    InvalidInput(String),

    #[error("Generation timed out")]
    Timeout,

    #[error("Upstream model error: {0}")]
    Upstream(#[from] GenAiError),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

pub struct ChatProxy {
    store: Arc<dyn DocumentStore>,
    model: Arc<dyn GenerativeModel>,
    config: ChatConfig,
}

impl ChatProxy {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        model: Arc<dyn GenerativeModel>,
        config: ChatConfig,
    ) -> Self {
        Self {
            store,
            model,
            config,
        }
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    /// Load a digest and its articles. The digest must belong to `user_id`.
    pub async fn load_digest_context(
        &self,
        user_id: Uuid,
        digest_id: Uuid,
    ) -> Result<DigestContext, ProxyError> {
        let digest = self
            .store
            .get_digest(digest_id)
            .await?
            .filter(|d| d.user_id == user_id)
            .ok_or_else(|| ProxyError::NotFound(format!("Digest {} not found", digest_id)))?;
        let articles = self.store.get_articles(&digest.article_ids).await?;
        Ok(DigestContext { digest, articles })
    }

    /// Load a session and check its owner
    pub async fn owned_session(
        &self,
        user_id: Uuid,
        session_id: Uuid,
    ) -> Result<ChatSessionNode, ProxyError> {
        let session = self.store.get_chat_session(session_id).await?.ok_or_else(|| {
            ProxyError::NotFound(format!("Chat session {} not found", session_id))
        })?;
        if session.user_id != user_id {
            return Err(ProxyError::Forbidden);
        }
        Ok(session)
    }

    async fn recent_history(
        &self,
        session: &ChatSessionNode,
    ) -> Result<Vec<ChatMessageNode>, ProxyError> {
        let limit = self.config.history_limit;
        if limit == 0 {
            return Ok(Vec::new());
        }
        let offset = (session.message_count.max(0) as usize).saturating_sub(limit);
        let (messages, _) = self
            .store
            .list_chat_messages(session.id, limit, offset)
            .await?;
        Ok(messages)
    }

    async fn prepare(
        &self,
        session: Option<&ChatSessionNode>,
        digest: Option<&DigestContext>,
        user_text: &str,
    ) -> Result<GenerationRequest, ProxyError> {
        let history = match session {
            Some(s) => history_turns(&self.recent_history(s).await?, self.config.history_limit),
            None => Vec::new(),
        };
        let system = build_system_instruction(digest, self.config.max_follow_ups);
        Ok(build_request(
            system,
            history,
            user_text,
            self.config.grounding,
            self.config.temperature,
        ))
    }

    // ========================================================================
    // One-shot
    // ========================================================================

    /// Forward a single prompt and return the full answer. When the request
    /// names a session, the exchange is appended to its transcript.
    pub async fn generate(
        &self,
        user_id: Uuid,
        request: GenerateRequest,
    ) -> Result<GenerateResponse, ProxyError> {
        let prompt = request.prompt.trim();
        if prompt.is_empty() {
            return Err(ProxyError::InvalidInput("Prompt cannot be empty".into()));
        }

        let session = match request.session_id {
            Some(id) => Some(self.owned_session(user_id, id).await?),
            None => None,
        };
        let digest_id = request
            .digest_id
            .or_else(|| session.as_ref().and_then(|s| s.digest_id));
        let digest = match digest_id {
            Some(id) => Some(self.load_digest_context(user_id, id).await?),
            None => None,
        };

        let generation_request = self.prepare(session.as_ref(), digest.as_ref(), prompt).await?;
        let generation = tokio::time::timeout(
            self.config.generation_timeout(),
            self.model.generate(&generation_request),
        )
        .await
        .map_err(|_| ProxyError::Timeout)??;

        let (text, follow_up_questions) =
            split_follow_ups(&generation.text, self.config.max_follow_ups);
        let sources = dedup_sources(&generation.sources);

        if let Some(ref session) = session {
            let citations = collect_citations(&sources, &text, digest.as_ref());
            self.store
                .append_chat_message(&ChatMessageNode::user(session.id, prompt))
                .await?;
            self.store
                .append_chat_message(&ChatMessageNode::assistant(
                    Uuid::new_v4(),
                    session.id,
                    text.clone(),
                    citations,
                    follow_up_questions.clone(),
                ))
                .await?;
        }

        tracing::debug!(
            user_id = %user_id,
            model = self.model.model_name(),
            chars = text.len(),
            "One-shot generation complete"
        );

        Ok(GenerateResponse {
            text,
            sources,
            follow_up_questions,
        })
    }

    // ========================================================================
    // Streaming
    // ========================================================================

    /// Stream a reply for `user_text` into `sink`.
    ///
    /// Frame order is `message_start`, `content_chunk*`, `message_complete`.
    /// Any failure is reported as one `error` frame with a generic message and
    /// leaves no assistant message in the transcript. A closed sink does not
    /// stop the generation; the exchange is still persisted.
    pub async fn stream_reply(
        &self,
        session: &ChatSessionNode,
        user_text: &str,
        sink: mpsc::Sender<ServerFrame>,
    ) -> Result<(), ProxyError> {
        let result = self.stream_reply_inner(session, user_text, &sink).await;
        if let Err(ref e) = result {
            tracing::warn!(session_id = %session.id, error = %e, "Chat reply failed");
            emit(&sink, ServerFrame::error(GENERIC_ERROR_MESSAGE)).await;
        }
        result
    }

    async fn stream_reply_inner(
        &self,
        session: &ChatSessionNode,
        user_text: &str,
        sink: &mpsc::Sender<ServerFrame>,
    ) -> Result<(), ProxyError> {
        let user_text = user_text.trim();
        if user_text.is_empty() {
            return Err(ProxyError::InvalidInput("Message cannot be empty".into()));
        }

        let digest = match session.digest_id {
            Some(id) => match self.load_digest_context(session.user_id, id).await {
                Ok(ctx) => Some(ctx),
                Err(ProxyError::NotFound(_)) => {
                    tracing::warn!(
                        session_id = %session.id,
                        digest_id = %id,
                        "Session digest missing, answering without it"
                    );
                    None
                }
                Err(e) => return Err(e),
            },
            None => None,
        };
        let request = self.prepare(Some(session), digest.as_ref(), user_text).await?;

        self.store
            .append_chat_message(&ChatMessageNode::user(session.id, user_text))
            .await?;

        let deadline = Instant::now() + self.config.generation_timeout();
        let mut stream = tokio::time::timeout_at(deadline, self.model.generate_stream(&request))
            .await
            .map_err(|_| ProxyError::Timeout)??;

        let message_id = Uuid::new_v4();
        emit(
            sink,
            ServerFrame::MessageStart {
                message_id: message_id.to_string(),
            },
        )
        .await;

        let mut splitter = FollowUpSplitter::new(self.config.max_follow_ups);
        let mut content = String::new();
        let mut sources = Vec::new();

        loop {
            let next = tokio::time::timeout_at(deadline, stream.next())
                .await
                .map_err(|_| ProxyError::Timeout)?;
            let Some(chunk) = next else { break };
            let chunk = chunk?;
            sources.extend(chunk.sources);
            let visible = splitter.push(&chunk.text);
            if !visible.is_empty() {
                content.push_str(&visible);
                emit(sink, ServerFrame::ContentChunk { content: visible }).await;
            }
        }

        let (rest, follow_up_questions) = splitter.finish();
        if !rest.is_empty() {
            content.push_str(&rest);
            emit(sink, ServerFrame::ContentChunk { content: rest }).await;
        }
        if content.trim().is_empty() {
            return Err(GenAiError::Decode("Model returned an empty answer".into()).into());
        }

        let citations = collect_citations(&sources, &content, digest.as_ref());
        self.store
            .append_chat_message(&ChatMessageNode::assistant(
                message_id,
                session.id,
                content,
                citations.clone(),
                follow_up_questions.clone(),
            ))
            .await?;

        emit(
            sink,
            ServerFrame::MessageComplete {
                message_id: Some(message_id.to_string()),
                citations,
                follow_up_questions,
            },
        )
        .await;

        tracing::debug!(session_id = %session.id, message_id = %message_id, "Chat reply complete");
        Ok(())
    }
}

/// Send a frame, tolerating a closed sink
async fn emit(sink: &mpsc::Sender<ServerFrame>, frame: ServerFrame) {
    let frame_type = frame.frame_type();
    if sink.send(frame).await.is_err() {
        tracing::debug!(frame_type, "Client gone, frame dropped");
    }
}
