//! Chat configuration

use serde::{Deserialize, Serialize};

/// Configuration for the chat proxy (YAML `chat:` section)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Number of most recent transcript messages sent to the model
    pub history_limit: usize,
    /// Maximum follow-up questions kept from a reply
    pub max_follow_ups: usize,
    /// Enable the model's web grounding tool
    pub grounding: bool,
    /// Sampling temperature forwarded to the model
    pub temperature: f32,
    /// Upper bound on a single reply, in seconds
    pub generation_timeout_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            history_limit: 20,
            max_follow_ups: 3,
            grounding: true,
            temperature: 0.7,
            generation_timeout_secs: 120,
        }
    }
}

impl ChatConfig {
    /// Apply `CHAT_*` environment overrides
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(v) = env_parse("CHAT_HISTORY_LIMIT") {
            self.history_limit = v;
        }
        if let Some(v) = env_parse("CHAT_MAX_FOLLOW_UPS") {
            self.max_follow_ups = v;
        }
        if let Some(v) = env_parse("CHAT_GROUNDING") {
            self.grounding = v;
        }
        if let Some(v) = env_parse("CHAT_GENERATION_TIMEOUT_SECS") {
            self.generation_timeout_secs = v;
        }
        self
    }

    pub fn generation_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.generation_timeout_secs)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ChatConfig::default();
        assert_eq!(config.history_limit, 20);
        assert_eq!(config.max_follow_ups, 3);
        assert!(config.grounding);
        assert_eq!(config.generation_timeout().as_secs(), 120);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config: ChatConfig = serde_yaml::from_str("history_limit: 4").unwrap();
        assert_eq!(config.history_limit, 4);
        assert_eq!(config.max_follow_ups, 3);
    }
}
