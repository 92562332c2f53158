//! Gemini `generateContent` client

use super::retry::{response_to_error, RetryPolicy};
use super::types::*;
use super::GenerativeModel;
use crate::chat::types::GroundingSource;
use async_trait::async_trait;
use eventsource_stream::{EventStreamError, Eventsource};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Upstream configuration (YAML `genai:` section)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeminiConfig {
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub connect_timeout_secs: u64,
    pub retry: RetryPolicy,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            connect_timeout_secs: 10,
            retry: RetryPolicy::default(),
        }
    }
}

pub struct GeminiClient {
    http: reqwest::Client,
    config: GeminiConfig,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Result<Self, GenAiError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()?;
        Ok(Self { http, config })
    }

    fn api_key(&self) -> Result<&str, GenAiError> {
        self.config
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or(GenAiError::NotConfigured)
    }

    fn endpoint(&self, method: &str) -> String {
        format!(
            "{}/v1beta/models/{}:{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.model,
            method
        )
    }

    /// POST with retries on retryable failures. Returns the first successful response.
    async fn send_with_retry(
        &self,
        url: &str,
        body: &GenerateContentBody,
    ) -> Result<reqwest::Response, GenAiError> {
        let api_key = self.api_key()?;
        let policy = &self.config.retry;
        let mut attempt = 0;

        loop {
            let error = match self
                .http
                .post(url)
                .header("x-goog-api-key", api_key)
                .json(body)
                .send()
                .await
            {
                Ok(resp) if resp.status().is_success() => return Ok(resp),
                Ok(resp) => response_to_error(resp).await,
                Err(e) => GenAiError::Transport(e),
            };

            if !error.is_retryable() || attempt >= policy.max_retries {
                return Err(error);
            }
            attempt += 1;
            let delay = policy.delay_for(attempt, error.retry_after());
            tracing::warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retrying Gemini request"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl GenerativeModel for GeminiClient {
    fn model_name(&self) -> &str {
        &self.config.model
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, GenAiError> {
        let body = GenerateContentBody::from_request(request);
        let response = self
            .send_with_retry(&self.endpoint("generateContent"), &body)
            .await?;
        let parsed: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| GenAiError::Decode(e.to_string()))?;

        let chunk = parsed.into_chunk()?;
        if chunk.text.is_empty() {
            return Err(GenAiError::Decode("Response contained no text".into()));
        }
        Ok(Generation {
            text: chunk.text,
            sources: chunk.sources,
        })
    }

    async fn generate_stream(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationStream, GenAiError> {
        let body = GenerateContentBody::from_request(request);
        let url = format!("{}?alt=sse", self.endpoint("streamGenerateContent"));
        let response = self.send_with_retry(&url, &body).await?;

        let (tx, rx) = mpsc::channel::<Result<StreamChunk, GenAiError>>(32);
        tokio::spawn(async move {
            let mut events = response.bytes_stream().eventsource();

            while let Some(next) = events.next().await {
                let event = match next {
                    Ok(event) => event,
                    Err(EventStreamError::Transport(e)) => {
                        let _ = tx.send(Err(GenAiError::Transport(e))).await;
                        return;
                    }
                    Err(e) => {
                        let _ = tx
                            .send(Err(GenAiError::Decode(format!("SSE stream error: {}", e))))
                            .await;
                        return;
                    }
                };
                if event.data.is_empty() {
                    continue;
                }
                if !forward_event(&tx, &event.data).await {
                    return;
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

/// Decode one SSE payload and send it. Returns false when the stream should stop.
async fn forward_event(tx: &mpsc::Sender<Result<StreamChunk, GenAiError>>, data: &str) -> bool {
    let parsed = serde_json::from_str::<GenerateContentResponse>(data)
        .map_err(|e| GenAiError::Decode(e.to_string()))
        .and_then(GenerateContentResponse::into_chunk);
    let failed = parsed.is_err();
    if tx.send(parsed).await.is_err() {
        return false;
    }
    !failed
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentBody {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

impl GenerateContentBody {
    fn from_request(request: &GenerationRequest) -> Self {
        let contents = request
            .turns
            .iter()
            .map(|turn| Content {
                role: Some(
                    match turn.role {
                        TurnRole::User => "user",
                        TurnRole::Model => "model",
                    }
                    .to_string(),
                ),
                parts: vec![Part {
                    text: Some(turn.text.clone()),
                }],
            })
            .collect();

        Self {
            contents,
            system_instruction: request.system_instruction.as_ref().map(|text| Content {
                role: None,
                parts: vec![Part {
                    text: Some(text.clone()),
                }],
            }),
            tools: if request.grounding {
                vec![serde_json::json!({ "google_search": {} })]
            } else {
                Vec::new()
            },
            generation_config: request
                .temperature
                .map(|temperature| GenerationConfig { temperature }),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
    #[serde(default)]
    grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroundingMetadata {
    #[serde(default)]
    grounding_chunks: Vec<GroundingChunk>,
}

#[derive(Debug, Deserialize)]
struct GroundingChunk {
    #[serde(default)]
    web: Option<WebSource>,
}

#[derive(Debug, Deserialize)]
struct WebSource {
    #[serde(default)]
    uri: Option<String>,
    #[serde(default)]
    title: Option<String>,
}

impl GenerateContentResponse {
    /// Text of the first candidate plus its grounding sources
    fn into_chunk(self) -> Result<StreamChunk, GenAiError> {
        if let Some(reason) = self.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(GenAiError::Blocked(reason));
        }
        let Some(candidate) = self.candidates.into_iter().next() else {
            return Ok(StreamChunk::default());
        };

        let text: String = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if text.is_empty() {
            if let Some(reason) = candidate.finish_reason.as_deref() {
                if matches!(reason, "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT") {
                    return Err(GenAiError::Blocked(reason.to_string()));
                }
            }
        }

        let sources = candidate
            .grounding_metadata
            .map(|m| {
                m.grounding_chunks
                    .into_iter()
                    .filter_map(|c| c.web)
                    .filter_map(|w| {
                        let uri = w.uri?;
                        let title = w.title.unwrap_or_else(|| uri.clone());
                        Some(GroundingSource { uri, title })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(StreamChunk { text, sources })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer, retry: RetryPolicy) -> GeminiClient {
        GeminiClient::new(GeminiConfig {
            api_key: Some("test-key".into()),
            model: "gemini-test".into(),
            base_url: server.uri(),
            connect_timeout_secs: 2,
            retry: RetryPolicy {
                base_delay_ms: 1,
                max_delay_ms: 5,
                ..retry
            },
        })
        .unwrap()
    }

    fn request() -> GenerationRequest {
        GenerationRequest {
            system_instruction: Some("Be brief.".into()),
            turns: vec![Turn::user("What happened today?")],
            grounding: true,
            temperature: Some(0.25),
        }
    }

    #[test]
    fn test_request_body_shape() {
        let body = serde_json::to_value(GenerateContentBody::from_request(&request())).unwrap();
        assert_eq!(
            body,
            json!({
                "contents": [{"role": "user", "parts": [{"text": "What happened today?"}]}],
                "systemInstruction": {"parts": [{"text": "Be brief."}]},
                "tools": [{"google_search": {}}],
                "generationConfig": {"temperature": 0.25}
            })
        );
    }

    #[test]
    fn test_parse_text_and_grounding() {
        let resp: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "Hello "}, {"text": "world"}]},
                "groundingMetadata": {"groundingChunks": [
                    {"web": {"uri": "https://a.example", "title": "A"}},
                    {"web": {"uri": "https://b.example"}},
                    {"retrievedContext": {}}
                ]}
            }]
        }))
        .unwrap();
        let chunk = resp.into_chunk().unwrap();
        assert_eq!(chunk.text, "Hello world");
        assert_eq!(chunk.sources.len(), 2);
        assert_eq!(chunk.sources[1].title, "https://b.example");
    }

    #[test]
    fn test_blocked_prompt() {
        let resp: GenerateContentResponse =
            serde_json::from_value(json!({"promptFeedback": {"blockReason": "SAFETY"}})).unwrap();
        assert!(matches!(resp.into_chunk(), Err(GenAiError::Blocked(r)) if r == "SAFETY"));
    }

    #[tokio::test]
    async fn test_generate_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-test:generateContent"))
            .and(header("x-goog-api-key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{"content": {"parts": [{"text": "Answer"}]}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, RetryPolicy::default());
        let generation = client.generate(&request()).await.unwrap();
        assert_eq!(generation.text, "Answer");
        assert!(generation.sources.is_empty());
    }

    #[tokio::test]
    async fn test_generate_retries_on_503_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-test:generateContent"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-test:generateContent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{"content": {"parts": [{"text": "Recovered"}]}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, RetryPolicy::default());
        assert_eq!(client.generate(&request()).await.unwrap().text, "Recovered");
    }

    #[tokio::test]
    async fn test_generate_does_not_retry_client_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, RetryPolicy::default());
        let err = client.generate(&request()).await.unwrap_err();
        assert!(matches!(err, GenAiError::Http { status: 400, .. }));
    }

    #[tokio::test]
    async fn test_generate_gives_up_after_max_retries() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .expect(3)
            .mount(&server)
            .await;

        let client = client_for(&server, RetryPolicy::default());
        let err = client.generate(&request()).await.unwrap_err();
        assert!(matches!(err, GenAiError::Http { status: 429, .. }));
    }

    #[tokio::test]
    async fn test_missing_api_key() {
        let client = GeminiClient::new(GeminiConfig::default()).unwrap();
        let err = client.generate(&request()).await.unwrap_err();
        assert!(matches!(err, GenAiError::NotConfigured));
    }

    #[tokio::test]
    async fn test_generate_stream_decodes_sse() {
        let server = MockServer::start().await;
        let body = concat!(
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Hel\"}]}}]}\r\n\r\n",
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"lo\"}]},",
            "\"groundingMetadata\":{\"groundingChunks\":[{\"web\":{\"uri\":\"https://s.example\",\"title\":\"S\"}}]}}]}\r\n\r\n"
        );
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-test:streamGenerateContent"))
            .and(query_param("alt", "sse"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body),
            )
            .mount(&server)
            .await;

        let client = client_for(&server, RetryPolicy::none());
        let mut stream = client.generate_stream(&request()).await.unwrap();
        let mut text = String::new();
        let mut sources = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.unwrap();
            text.push_str(&chunk.text);
            sources.extend(chunk.sources);
        }
        assert_eq!(text, "Hello");
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].uri, "https://s.example");
    }

    #[tokio::test]
    async fn test_generate_stream_skips_comments_and_joins_data_lines() {
        let server = MockServer::start().await;
        let body = concat!(
            ": keep-alive\n\n",
            "data: {\"candidates\":[{\"content\":\n",
            "data: {\"parts\":[{\"text\":\"one\"}]}}]}\n\n",
            "data: not json\n\n",
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"never\"}]}}]}\n\n"
        );
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-test:streamGenerateContent"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body),
            )
            .mount(&server)
            .await;

        let client = client_for(&server, RetryPolicy::none());
        let mut stream = client.generate_stream(&request()).await.unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap().text, "one");
        assert!(matches!(
            stream.next().await.unwrap(),
            Err(GenAiError::Decode(_))
        ));
        assert!(stream.next().await.is_none());
    }
}
