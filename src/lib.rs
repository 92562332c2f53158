//! Digest Chat
//!
//! Personalized news digests with an article-grounded chat assistant:
//! - Document store (Neo4j) for users, feeds, articles, digests and chat transcripts
//! - Stateless chat proxy to a generative-AI upstream (Gemini), streamed over WebSocket
//! - REST API with JWT access tokens and rotating refresh tokens
//! - Client SDK with a streaming chat session and refresh-on-401

pub mod api;
pub mod auth;
pub mod chat;
pub mod client;
pub mod genai;
pub mod store;

#[cfg(test)]
pub(crate) mod test_helpers;

use anyhow::{Context, Result};
use chat::ChatConfig;
use genai::{GeminiClient, GeminiConfig, GenerativeModel};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use store::DocumentStore;

// ============================================================================
// YAML config structs (deserialization targets)
// ============================================================================

/// Top-level YAML configuration file structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub server: ServerYamlConfig,
    pub neo4j: Neo4jYamlConfig,
    pub genai: GeminiConfig,
    pub chat: ChatConfig,
    /// Auth section; if absent the server runs in open mode
    pub auth: Option<AuthConfig>,
}

/// Server configuration section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerYamlConfig {
    pub port: u16,
    /// Public base URL behind a reverse proxy (e.g. https://news.example.com)
    pub public_url: Option<String>,
}

impl Default for ServerYamlConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            public_url: None,
        }
    }
}

/// Neo4j configuration section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Neo4jYamlConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
}

impl Default for Neo4jYamlConfig {
    fn default() -> Self {
        Self {
            uri: "bolt://localhost:7687".into(),
            user: "neo4j".into(),
            password: "digest-chat".into(),
        }
    }
}

/// Authentication configuration (email/password accounts).
///
/// - **Open mode**: no `auth` section and no `JWT_SECRET` → every request
///   runs as the anonymous user
/// - **Password**: `jwt_secret` set → signup/login issue access + refresh tokens
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// JWT signing secret (HS256, minimum 32 characters)
    pub jwt_secret: String,
    /// Access token lifetime in seconds (default: 900 = 15 min)
    #[serde(default = "default_access_token_expiry")]
    pub access_token_expiry_secs: u64,
    /// Refresh token lifetime in seconds (default: 604800 = 7 days)
    #[serde(default = "default_refresh_token_expiry")]
    pub refresh_token_expiry_secs: u64,
    /// Optional domain restriction for signup (e.g. "example.com")
    pub allowed_email_domain: Option<String>,
    /// Frontend URL added to the CORS allow-list
    pub frontend_url: Option<String>,
    /// Allow new accounts via POST /auth/signup (default: true)
    #[serde(default = "default_allow_registration")]
    pub allow_registration: bool,
}

fn default_access_token_expiry() -> u64 {
    900
}

fn default_refresh_token_expiry() -> u64 {
    604_800
}

fn default_allow_registration() -> bool {
    true
}

impl AuthConfig {
    /// Auth config with default lifetimes for the given secret
    pub fn with_secret(jwt_secret: impl Into<String>) -> Self {
        Self {
            jwt_secret: jwt_secret.into(),
            access_token_expiry_secs: default_access_token_expiry(),
            refresh_token_expiry_secs: default_refresh_token_expiry(),
            allowed_email_domain: None,
            frontend_url: None,
            allow_registration: default_allow_registration(),
        }
    }
}

// ============================================================================
// Runtime config (what the application actually uses)
// ============================================================================

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub neo4j_uri: String,
    pub neo4j_user: String,
    pub neo4j_password: String,
    pub server_port: u16,
    pub public_url: Option<String>,
    pub genai: GeminiConfig,
    pub chat: ChatConfig,
    /// None means open mode (anonymous identity)
    pub auth_config: Option<AuthConfig>,
}

impl Config {
    /// Equivalent to `from_yaml_and_env(None)`
    pub fn from_env() -> Result<Self> {
        Self::from_yaml_and_env(None)
    }

    /// Load configuration from an optional YAML file, then override with env vars.
    ///
    /// Priority: env var > YAML > default
    ///
    /// If `yaml_path` is None, tries "config.yaml" in CWD.
    pub fn from_yaml_and_env(yaml_path: Option<&Path>) -> Result<Self> {
        let yaml = Self::load_yaml(yaml_path);

        let mut genai = yaml.genai;
        if let Ok(key) = std::env::var("GEMINI_API_KEY") {
            genai.api_key = Some(key);
        }
        if let Ok(model) = std::env::var("GENAI_MODEL") {
            genai.model = model;
        }
        if let Ok(base_url) = std::env::var("GENAI_BASE_URL") {
            genai.base_url = base_url;
        }

        let auth_config = match (yaml.auth, std::env::var("JWT_SECRET").ok()) {
            (Some(mut auth), Some(secret)) => {
                auth.jwt_secret = secret;
                Some(auth)
            }
            (Some(auth), None) => Some(auth),
            (None, Some(secret)) => Some(AuthConfig::with_secret(secret)),
            (None, None) => None,
        };
        if let Some(ref auth) = auth_config {
            if auth.jwt_secret.len() < 32 {
                tracing::warn!("JWT secret is shorter than 32 characters");
            }
        }

        Ok(Self {
            neo4j_uri: std::env::var("NEO4J_URI").unwrap_or(yaml.neo4j.uri),
            neo4j_user: std::env::var("NEO4J_USER").unwrap_or(yaml.neo4j.user),
            neo4j_password: std::env::var("NEO4J_PASSWORD").unwrap_or(yaml.neo4j.password),
            server_port: std::env::var("SERVER_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(yaml.server.port),
            public_url: std::env::var("PUBLIC_URL").ok().or(yaml.server.public_url),
            genai,
            chat: yaml.chat.with_env_overrides(),
            auth_config,
        })
    }

    /// Try to load and parse a YAML config file. Returns defaults on any failure.
    fn load_yaml(yaml_path: Option<&Path>) -> YamlConfig {
        let default_path = Path::new("config.yaml");
        let path = yaml_path.unwrap_or(default_path);

        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_yaml::from_str(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                    YamlConfig::default()
                }
            },
            Err(_) => {
                tracing::debug!(
                    "No config file at {}, using env vars / defaults",
                    path.display()
                );
                YamlConfig::default()
            }
        }
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DocumentStore>,
    pub model: Arc<dyn GenerativeModel>,
    pub config: Arc<Config>,
}

impl AppState {
    /// Connect to the store and build the upstream model client
    pub async fn new(config: Config) -> Result<Self> {
        let store = Arc::new(
            store::Neo4jStore::new(
                &config.neo4j_uri,
                &config.neo4j_user,
                &config.neo4j_password,
            )
            .await?,
        );

        if config.genai.api_key.is_none() {
            tracing::warn!("GEMINI_API_KEY not set, chat replies will fail");
        }
        let model = Arc::new(
            GeminiClient::new(config.genai.clone()).context("Failed to build Gemini client")?,
        );

        Ok(Self {
            store,
            model,
            config: Arc::new(config),
        })
    }
}

/// Connect backends and serve the HTTP + WebSocket API until Ctrl-C
pub async fn start_server(config: Config) -> Result<()> {
    let port = config.server_port;
    if config.auth_config.is_none() {
        tracing::warn!("No auth configured, running in open mode");
    }

    let state = AppState::new(config).await?;
    tracing::info!("Connected to document store");

    let server_state = Arc::new(api::handlers::ServerState::from_app_state(&state));
    let router = api::routes::create_router(server_state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("Failed to bind port {}", port))?;
    tracing::info!("Listening on http://0.0.0.0:{}", port);

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await?;
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod config_tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_yaml_config_loading() {
        let yaml = r#"
server:
  port: 9090
  public_url: https://news.example.com

neo4j:
  uri: bolt://db:7687
  user: admin
  password: secret

genai:
  model: gemini-test
  base_url: http://upstream:1234
  retry:
    max_retries: 4

chat:
  history_limit: 6

auth:
  jwt_secret: "super-secret-key-min-32-characters!"
  access_token_expiry_secs: 600
  allowed_email_domain: "example.com"
"#;

        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(
            config.server.public_url,
            Some("https://news.example.com".into())
        );
        assert_eq!(config.neo4j.uri, "bolt://db:7687");
        assert_eq!(config.genai.model, "gemini-test");
        assert_eq!(config.genai.retry.max_retries, 4);
        assert_eq!(config.genai.retry.base_delay_ms, 500);
        assert_eq!(config.chat.history_limit, 6);
        assert_eq!(config.chat.max_follow_ups, 3);

        let auth = config.auth.unwrap();
        assert_eq!(auth.access_token_expiry_secs, 600);
        assert_eq!(auth.refresh_token_expiry_secs, 604_800);
        assert_eq!(auth.allowed_email_domain, Some("example.com".into()));
        assert!(auth.allow_registration);
    }

    #[test]
    fn test_yaml_defaults() {
        let config = YamlConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.neo4j.uri, "bolt://localhost:7687");
        assert_eq!(config.neo4j.user, "neo4j");
        assert_eq!(config.genai.model, genai::gemini::DEFAULT_MODEL);
        assert!(config.genai.api_key.is_none());
        assert!(config.auth.is_none());
    }

    #[test]
    fn test_no_auth_section_means_open_mode() {
        let yaml = r#"
server:
  port: 8080
"#;
        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.auth.is_none());
    }

    #[test]
    fn test_registration_can_be_disabled() {
        let yaml = r#"
auth:
  jwt_secret: "super-secret-key-min-32-characters!"
  allow_registration: false
"#;
        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(!config.auth.unwrap().allow_registration);
    }

    /// YAML loading, env overrides and fallback in one test to avoid env var races.
    #[test]
    fn test_yaml_and_env_lifecycle() {
        fn clear_env() {
            for var in &[
                "NEO4J_URI",
                "NEO4J_USER",
                "NEO4J_PASSWORD",
                "SERVER_PORT",
                "PUBLIC_URL",
                "GEMINI_API_KEY",
                "GENAI_MODEL",
                "GENAI_BASE_URL",
                "JWT_SECRET",
            ] {
                std::env::remove_var(var);
            }
        }

        // --- Phase 1: YAML values loaded correctly ---
        let yaml = r#"
server:
  port: 9999
neo4j:
  uri: bolt://yaml-host:7687
  user: yaml-user
  password: yaml-pass
genai:
  model: yaml-model
"#;
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("config.yaml");
        let mut file = std::fs::File::create(&file_path).unwrap();
        file.write_all(yaml.as_bytes()).unwrap();

        clear_env();

        let config = Config::from_yaml_and_env(Some(&file_path)).unwrap();
        assert_eq!(config.server_port, 9999);
        assert_eq!(config.neo4j_uri, "bolt://yaml-host:7687");
        assert_eq!(config.neo4j_user, "yaml-user");
        assert_eq!(config.genai.model, "yaml-model");
        assert!(config.genai.api_key.is_none());
        assert!(config.auth_config.is_none());

        // --- Phase 2: Env vars override YAML ---
        std::env::set_var("NEO4J_URI", "bolt://env-host:7687");
        std::env::set_var("SERVER_PORT", "7777");
        std::env::set_var("GEMINI_API_KEY", "env-key");
        std::env::set_var("JWT_SECRET", "env-secret-key-with-at-least-32-chars");

        let config = Config::from_yaml_and_env(Some(&file_path)).unwrap();
        assert_eq!(config.neo4j_uri, "bolt://env-host:7687");
        assert_eq!(config.server_port, 7777);
        assert_eq!(config.genai.api_key.as_deref(), Some("env-key"));
        assert_eq!(config.neo4j_user, "yaml-user");
        let auth = config.auth_config.expect("JWT_SECRET enables auth");
        assert_eq!(auth.access_token_expiry_secs, 900);

        clear_env();

        // --- Phase 3: No YAML file → defaults ---
        let nonexistent = dir.path().join("missing.yaml");
        let config = Config::from_yaml_and_env(Some(&nonexistent)).unwrap();
        assert_eq!(config.server_port, 8080);
        assert_eq!(config.neo4j_uri, "bolt://localhost:7687");
        assert!(config.auth_config.is_none());

        // --- Phase 4: Invalid YAML → defaults ---
        let broken = dir.path().join("broken.yaml");
        std::fs::write(&broken, "server: [not, a, map").unwrap();
        let config = Config::from_yaml_and_env(Some(&broken)).unwrap();
        assert_eq!(config.server_port, 8080);
    }
}
