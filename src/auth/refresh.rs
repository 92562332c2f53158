//! Rotating refresh tokens.
//!
//! A refresh token is 32 random bytes hex-encoded (64 chars). Only its
//! SHA-256 hash is persisted. Every successful refresh revokes the presented
//! token and issues a new one, so a token is single-use.

use crate::store::DocumentStore;
use anyhow::Result;
use chrono::{Duration, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Random 256-bit token encoded as hex
pub fn generate_token() -> String {
    let bytes: [u8; 32] = rand::random();
    hex::encode(bytes)
}

/// SHA-256 hex digest of a raw token, the form stored in the database
pub fn hash_token(raw_token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw_token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Create and persist a refresh token for `user_id`. Returns the raw token.
pub async fn issue_refresh_token(
    store: &dyn DocumentStore,
    user_id: Uuid,
    ttl_secs: u64,
) -> Result<String> {
    let raw = generate_token();
    let expires_at = Utc::now() + Duration::seconds(ttl_secs as i64);
    store
        .create_refresh_token(user_id, &hash_token(&raw), expires_at)
        .await?;
    Ok(raw)
}

/// Exchange a raw refresh token for a new one.
///
/// Returns `None` if the token is unknown, revoked or expired. On success the
/// old token is revoked before the replacement is issued.
pub async fn rotate_refresh_token(
    store: &dyn DocumentStore,
    raw_token: &str,
    ttl_secs: u64,
) -> Result<Option<(Uuid, String)>> {
    let token_hash = hash_token(raw_token);
    let Some(existing) = store.validate_refresh_token(&token_hash).await? else {
        return Ok(None);
    };
    if !store.revoke_refresh_token(&token_hash).await? {
        // Lost a race with a concurrent refresh of the same token
        return Ok(None);
    }
    let replacement = issue_refresh_token(store, existing.user_id, ttl_secs).await?;
    Ok(Some((existing.user_id, replacement)))
}
