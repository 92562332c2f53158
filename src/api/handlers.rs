//! Shared server state, error type and health check

use crate::chat::proxy::GENERIC_ERROR_MESSAGE;
use crate::chat::{ChatProxy, ProxyError};
use crate::store::DocumentStore;
use crate::{AppState, AuthConfig};
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use std::sync::Arc;

/// Shared server state
pub struct ServerState {
    pub store: Arc<dyn DocumentStore>,
    pub proxy: Arc<ChatProxy>,
    /// None means open mode: every request runs as the anonymous user
    pub auth_config: Option<AuthConfig>,
    pub server_port: u16,
    /// Public URL behind a reverse proxy, added to the CORS allow-list
    pub public_url: Option<String>,
}

pub type SharedState = Arc<ServerState>;

impl ServerState {
    pub fn from_app_state(app: &AppState) -> Self {
        let proxy = ChatProxy::new(
            app.store.clone(),
            app.model.clone(),
            app.config.chat.clone(),
        );
        Self {
            store: app.store.clone(),
            proxy: Arc::new(proxy),
            auth_config: app.config.auth_config.clone(),
            server_port: app.config.server_port,
            public_url: app.config.public_url.clone(),
        }
    }

    /// Origins allowed by CORS: localhost on the server port, plus the
    /// configured public and frontend URLs
    pub fn allowed_origins(&self) -> Vec<String> {
        let mut origins = vec![
            format!("http://localhost:{}", self.server_port),
            format!("http://127.0.0.1:{}", self.server_port),
        ];

        let mut add = |url: &str| {
            let trimmed = url.trim_end_matches('/').to_string();
            if !trimmed.is_empty() && !origins.contains(&trimmed) {
                origins.push(trimmed);
            }
        };

        if let Some(ref url) = self.public_url {
            add(url);
        }
        if let Some(ref frontend_url) = self
            .auth_config
            .as_ref()
            .and_then(|a| a.frontend_url.clone())
        {
            add(frontend_url);
        }

        origins
    }
}

// ============================================================================
// Health check
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub store: String,
    pub auth: String,
}

/// 200 when the document store answers, 503 otherwise
pub async fn health(State(state): State<SharedState>) -> (StatusCode, Json<HealthResponse>) {
    let store_ok = state.store.health_check().await.unwrap_or(false);
    let (http_status, status) = if store_ok {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
    };

    (
        http_status,
        Json(HealthResponse {
            status: status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            store: if store_ok { "connected" } else { "disconnected" }.to_string(),
            auth: if state.auth_config.is_some() {
                "password"
            } else {
                "open"
            }
            .to_string(),
        }),
    )
}

// ============================================================================
// Errors
// ============================================================================

/// API error rendered as `{"error": "<message>"}`
#[derive(Debug)]
pub enum AppError {
    Internal(anyhow::Error),
    NotFound(String),
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    Conflict(String),
    BadGateway(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            AppError::Internal(e) => {
                tracing::error!(error = %e, "Internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err)
    }
}

impl From<ProxyError> for AppError {
    fn from(err: ProxyError) -> Self {
        match err {
            ProxyError::NotFound(msg) => AppError::NotFound(msg),
            ProxyError::Forbidden => AppError::Forbidden(err.to_string()),
            ProxyError::InvalidInput(msg) => AppError::BadRequest(msg),
            ProxyError::Timeout | ProxyError::Upstream(_) => {
                tracing::warn!(error = %err, "Upstream generation failed");
                AppError::BadGateway(GENERIC_ERROR_MESSAGE.to_string())
            }
            ProxyError::Store(e) => AppError::Internal(e),
        }
    }
}
