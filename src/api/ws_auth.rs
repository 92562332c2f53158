//! WebSocket authentication, checked before the upgrade.
//!
//! Browsers cannot set headers on a WebSocket handshake, so the access token
//! travels as `?token=<jwt>`. Non-browser clients may send
//! `Authorization: Bearer <jwt>` instead. Invalid credentials are answered
//! with a plain 401 and no connection is opened. In open mode every upgrade
//! runs as the anonymous user.

use crate::auth::jwt::{decode_access_token, Claims};
use crate::AuthConfig;
use axum::http::{header::AUTHORIZATION, HeaderMap};
use tracing::debug;

#[derive(Debug)]
pub enum WsAuthResult {
    Authenticated(Claims),
    /// No token in the query string or headers
    Missing,
    Invalid(String),
}

pub fn ws_authenticate(
    query_token: Option<&str>,
    headers: &HeaderMap,
    auth_config: Option<&AuthConfig>,
) -> WsAuthResult {
    let Some(config) = auth_config else {
        return WsAuthResult::Authenticated(Claims::anonymous());
    };

    let header_token = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    let Some(token) = query_token.filter(|t| !t.is_empty()).or(header_token) else {
        return WsAuthResult::Missing;
    };

    match decode_access_token(token, &config.jwt_secret) {
        Ok(claims) => WsAuthResult::Authenticated(claims),
        Err(e) => {
            debug!(error = %e, "WS auth: token rejected");
            WsAuthResult::Invalid(e.to_string())
        }
    }
}
