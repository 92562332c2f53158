//! Access tokens (HS256 JWT).
//!
//! Access tokens are short-lived and carry the user identity. They are sent
//! as `Authorization: Bearer <token>` on REST calls and as `?token=` on the
//! chat WebSocket upgrade.

use crate::store::UserNode;
use crate::AuthConfig;
use anyhow::{Context, Result};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity used for every request in open mode: `00000000-0000-0000-0000-000000000000`
pub const ANONYMOUS_USER_ID: Uuid = Uuid::nil();

/// JWT claims payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// User UUID
    pub sub: String,
    pub email: String,
    pub name: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration (Unix timestamp)
    pub exp: i64,
}

impl Claims {
    pub fn for_user(user: &UserNode, ttl_secs: u64) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            sub: user.id.to_string(),
            email: user.email.clone(),
            name: user.name.clone(),
            iat: now,
            exp: now + ttl_secs as i64,
        }
    }

    /// Claims injected in open mode. Never encoded.
    pub fn anonymous() -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            sub: ANONYMOUS_USER_ID.to_string(),
            email: "anonymous@local".to_string(),
            name: "Anonymous".to_string(),
            iat: now,
            exp: now + 86_400,
        }
    }

    pub fn user_id(&self) -> Option<Uuid> {
        self.sub.parse().ok()
    }

    pub fn is_anonymous(&self) -> bool {
        self.user_id() == Some(ANONYMOUS_USER_ID)
    }
}

pub fn encode_access_token(claims: &Claims, secret: &str) -> Result<String> {
    encode(
        &Header::default(),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .context("Failed to encode access token")
}

/// Decode and validate an access token.
///
/// Expiry is checked without leeway so a token is rejected as soon as `exp` passes.
pub fn decode_access_token(token: &str, secret: &str) -> Result<Claims> {
    let mut validation = Validation::default();
    validation.leeway = 0;
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .context("Invalid access token")?;
    Ok(data.claims)
}

/// Sign a fresh access token for `user` using the configured lifetime
pub fn issue_access_token(user: &UserNode, auth: &AuthConfig) -> Result<String> {
    let claims = Claims::for_user(user, auth.access_token_expiry_secs);
    encode_access_token(&claims, &auth.jwt_secret)
}
