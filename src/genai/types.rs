//! Provider-neutral generation types

use crate::chat::types::GroundingSource;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// Speaker of a conversation turn, in model terms
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Model,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub role: TurnRole,
    pub text: String,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            text: text.into(),
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Model,
            text: text.into(),
        }
    }
}

/// A request to the generative model
#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    pub system_instruction: Option<String>,
    /// Conversation turns, oldest first; the last one is the new user prompt
    pub turns: Vec<Turn>,
    /// Ask the model to ground its answer with web search
    pub grounding: bool,
    pub temperature: Option<f32>,
}

/// A complete (non-streamed) generation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Generation {
    pub text: String,
    pub sources: Vec<GroundingSource>,
}

/// One streamed piece of a generation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamChunk {
    pub text: String,
    /// Grounding sources carried by this chunk, usually only the last one
    pub sources: Vec<GroundingSource>,
}

pub type GenerationStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, GenAiError>> + Send>>;

/// Errors from the generative-AI upstream
#[derive(Debug, thiserror::Error)]
pub enum GenAiError {
    #[error("Generative model is not configured (missing API key)")]
    NotConfigured,

    #[error("Upstream returned HTTP {status}: {message}")]
    Http {
        status: u16,
        message: String,
        retry_after_secs: Option<u64>,
    },

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Failed to decode upstream response: {0}")]
    Decode(String),

    #[error("Response blocked by the model: {0}")]
    Blocked(String),
}

impl GenAiError {
    /// Rate limits, server errors, timeouts and connect failures are worth retrying
    pub fn is_retryable(&self) -> bool {
        match self {
            GenAiError::Http { status, .. } => *status == 429 || *status >= 500,
            GenAiError::Transport(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    pub fn retry_after(&self) -> Option<u64> {
        match self {
            GenAiError::Http {
                retry_after_secs, ..
            } => *retry_after_secs,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http(status: u16) -> GenAiError {
        GenAiError::Http {
            status,
            message: String::new(),
            retry_after_secs: None,
        }
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(http(429).is_retryable());
        assert!(http(500).is_retryable());
        assert!(http(503).is_retryable());
        assert!(!http(400).is_retryable());
        assert!(!http(401).is_retryable());
        assert!(!http(404).is_retryable());
    }

    #[test]
    fn test_non_http_errors_not_retryable() {
        assert!(!GenAiError::NotConfigured.is_retryable());
        assert!(!GenAiError::Blocked("SAFETY".into()).is_retryable());
        assert!(!GenAiError::Decode("bad".into()).is_retryable());
    }

    #[test]
    fn test_retry_after_only_on_http() {
        let err = GenAiError::Http {
            status: 429,
            message: "slow down".into(),
            retry_after_secs: Some(3),
        };
        assert_eq!(err.retry_after(), Some(3));
        assert_eq!(GenAiError::NotConfigured.retry_after(), None);
    }
}
