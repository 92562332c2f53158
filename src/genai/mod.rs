//! Generative-AI upstream
//!
//! The chat proxy talks to the model through [`GenerativeModel`]. The only
//! production implementation is [`GeminiClient`]; tests use a scripted model.

pub mod gemini;
pub mod retry;
pub mod types;

pub use gemini::{GeminiClient, GeminiConfig};
pub use retry::RetryPolicy;
pub use types::*;

use async_trait::async_trait;

#[async_trait]
pub trait GenerativeModel: Send + Sync {
    fn model_name(&self) -> &str;

    /// One-shot generation
    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, GenAiError>;

    /// Streamed generation. Errors establishing the request are returned
    /// directly; errors after that arrive as stream items.
    async fn generate_stream(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationStream, GenAiError>;
}
