//! Retry policy for upstream requests

use super::types::GenAiError;
use reqwest::Response;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exponential backoff. Applied only while establishing a request; a stream
/// that has started relaying content is never retried.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
        }
    }
}

impl RetryPolicy {
    /// No retries at all
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (1-based). A server-provided
    /// `Retry-After` wins but is still capped by `max_delay_ms`.
    pub fn delay_for(&self, attempt: u32, retry_after_secs: Option<u64>) -> Duration {
        let max = Duration::from_millis(self.max_delay_ms);
        if let Some(secs) = retry_after_secs {
            return Duration::from_secs(secs).min(max);
        }
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor)).min(max)
    }
}

pub fn parse_retry_after(response: &Response) -> Option<u64> {
    response
        .headers()
        .get("retry-after")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
}

/// Turn a non-success upstream response into a `GenAiError::Http`
pub async fn response_to_error(response: Response) -> GenAiError {
    let status = response.status().as_u16();
    let retry_after = parse_retry_after(&response);
    let body = response.text().await.unwrap_or_default();

    // Upstream error bodies can be large; keep the head only
    const MAX_ERROR_BODY: usize = 512;
    let message = if body.chars().count() > MAX_ERROR_BODY {
        let head: String = body.chars().take(MAX_ERROR_BODY).collect();
        format!("{}... [truncated]", head)
    } else {
        body
    };

    GenAiError::Http {
        status,
        message,
        retry_after_secs: retry_after,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_progression() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1, None), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2, None), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(3, None), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(5, None), Duration::from_millis(8000));
        assert_eq!(policy.delay_for(30, None), Duration::from_millis(8000));
    }

    #[test]
    fn test_retry_after_overrides_backoff_but_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1, Some(2)), Duration::from_secs(2));
        assert_eq!(policy.delay_for(1, Some(60)), Duration::from_secs(8));
    }

    #[test]
    fn test_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 2);
        assert_eq!(RetryPolicy::none().max_retries, 0);
    }
}
