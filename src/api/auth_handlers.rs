//! Authentication route handlers: email/password accounts, token refresh, user info.
//!
//! Endpoints:
//! - `POST /auth/signup`: create an account, returns a token pair + user
//! - `POST /auth/login`: verify bcrypt password, returns a token pair + user
//! - `POST /auth/refresh`: rotate a refresh token, returns a new pair
//! - `POST /auth/logout`: revoke a refresh token (or all of the user's tokens)
//! - `GET  /auth/me`: the authenticated user (protected)

use crate::api::handlers::{AppError, SharedState};
use crate::auth::jwt::issue_access_token;
use crate::auth::refresh::{hash_token, issue_refresh_token, rotate_refresh_token};
use crate::auth::AuthUser;
use crate::store::UserNode;
use crate::AuthConfig;
use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[cfg(not(test))]
const BCRYPT_COST: u32 = bcrypt::DEFAULT_COST;
#[cfg(test)]
const BCRYPT_COST: u32 = 4;

const MIN_PASSWORD_LEN: usize = 8;

// ============================================================================
// Request / Response types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Body of `/auth/refresh` and `/auth/logout`
#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
    /// Logout only: revoke every refresh token of the token's owner
    #[serde(default)]
    pub all: bool,
}

/// Public user info (safe to send to client)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub email: String,
    pub name: String,
}

impl From<UserNode> for UserResponse {
    fn from(u: UserNode) -> Self {
        Self {
            id: u.id,
            email: u.email,
            name: u.name,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access token lifetime in seconds
    pub expires_in: u64,
    pub user: UserResponse,
}

// ============================================================================
// Handlers
// ============================================================================

fn require_auth_config(state: &SharedState) -> Result<&AuthConfig, AppError> {
    state
        .auth_config
        .as_ref()
        .ok_or_else(|| AppError::Forbidden("Authentication not configured".to_string()))
}

/// Sign an access token and persist a fresh refresh token for `user`
async fn token_pair(
    state: &SharedState,
    auth_config: &AuthConfig,
    user: UserNode,
) -> Result<AuthResponse, AppError> {
    let access_token = issue_access_token(&user, auth_config)?;
    let refresh_token = issue_refresh_token(
        state.store.as_ref(),
        user.id,
        auth_config.refresh_token_expiry_secs,
    )
    .await?;
    Ok(AuthResponse {
        access_token,
        refresh_token,
        token_type: "Bearer".to_string(),
        expires_in: auth_config.access_token_expiry_secs,
        user: user.into(),
    })
}

/// POST /auth/signup
pub async fn signup(
    State(state): State<SharedState>,
    Json(req): Json<SignupRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), AppError> {
    let auth_config = require_auth_config(&state)?;
    if !auth_config.allow_registration {
        return Err(AppError::Forbidden("Registration is disabled".to_string()));
    }
    validate_registration(&req, auth_config)?;

    let email = req.email.trim().to_lowercase();
    if state.store.get_user_by_email(&email).await?.is_some() {
        return Err(AppError::Conflict(
            "An account with this email already exists".to_string(),
        ));
    }

    let password_hash = bcrypt::hash(&req.password, BCRYPT_COST)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to hash password: {}", e)))?;
    let now = Utc::now();
    let user = UserNode {
        id: Uuid::new_v4(),
        email,
        name: req.name.trim().to_string(),
        password_hash: Some(password_hash),
        created_at: now,
        last_login_at: now,
    };
    state.store.create_user(&user).await?;
    tracing::info!(user_id = %user.id, "Account created");

    let response = token_pair(&state, auth_config, user).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// POST /auth/login
///
/// Error messages never reveal whether the email exists.
pub async fn login(
    State(state): State<SharedState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let auth_config = require_auth_config(&state)?;
    let invalid_credentials = || AppError::Unauthorized("Invalid email or password".to_string());

    let user = state
        .store
        .get_user_by_email(&req.email)
        .await?
        .ok_or_else(invalid_credentials)?;
    let password_hash = user
        .password_hash
        .as_deref()
        .ok_or_else(invalid_credentials)?;
    if !bcrypt::verify(&req.password, password_hash).unwrap_or(false) {
        return Err(invalid_credentials());
    }

    state.store.touch_user_login(user.id).await?;
    tracing::debug!(user_id = %user.id, "Login");
    Ok(Json(token_pair(&state, auth_config, user).await?))
}

/// POST /auth/refresh
///
/// The presented refresh token is revoked; the response carries its replacement.
pub async fn refresh(
    State(state): State<SharedState>,
    Json(req): Json<RefreshRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let auth_config = require_auth_config(&state)?;
    let expired = || AppError::Unauthorized("Refresh token is invalid or expired".to_string());

    let (user_id, refresh_token) = rotate_refresh_token(
        state.store.as_ref(),
        &req.refresh_token,
        auth_config.refresh_token_expiry_secs,
    )
    .await?
    .ok_or_else(expired)?;

    let Some(user) = state.store.get_user_by_id(user_id).await? else {
        state.store.revoke_all_user_tokens(user_id).await?;
        return Err(expired());
    };

    Ok(Json(AuthResponse {
        access_token: issue_access_token(&user, auth_config)?,
        refresh_token,
        token_type: "Bearer".to_string(),
        expires_in: auth_config.access_token_expiry_secs,
        user: user.into(),
    }))
}

/// POST /auth/logout
///
/// Always 204: logging out with an unknown or already revoked token is not an error.
pub async fn logout(
    State(state): State<SharedState>,
    Json(req): Json<RefreshRequest>,
) -> Result<StatusCode, AppError> {
    let token_hash = hash_token(&req.refresh_token);
    if req.all {
        if let Some(token) = state.store.validate_refresh_token(&token_hash).await? {
            let revoked = state.store.revoke_all_user_tokens(token.user_id).await?;
            tracing::info!(user_id = %token.user_id, revoked, "Logged out everywhere");
        }
    } else {
        state.store.revoke_refresh_token(&token_hash).await?;
    }
    Ok(StatusCode::NO_CONTENT)
}

/// GET /auth/me
pub async fn me(
    State(state): State<SharedState>,
    user: AuthUser,
) -> Result<Json<UserResponse>, AppError> {
    if state.auth_config.is_none() {
        return Ok(Json(UserResponse {
            id: user.user_id,
            email: user.email,
            name: user.name,
        }));
    }
    let node = state
        .store
        .get_user_by_id(user.user_id)
        .await?
        .ok_or_else(|| AppError::Unauthorized("User no longer exists".to_string()))?;
    Ok(Json(node.into()))
}

fn validate_registration(req: &SignupRequest, auth_config: &AuthConfig) -> Result<(), AppError> {
    if req.name.trim().is_empty() {
        return Err(AppError::BadRequest("Name is required".to_string()));
    }

    let email = req.email.trim().to_lowercase();
    let domain_ok = email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
    if !domain_ok {
        return Err(AppError::BadRequest("Invalid email format".to_string()));
    }

    if req.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::BadRequest(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }

    if let Some(ref domain) = auth_config.allowed_email_domain {
        if !email.ends_with(&format!("@{}", domain)) {
            return Err(AppError::Forbidden(format!(
                "Email domain not allowed (expected @{})",
                domain
            )));
        }
    }

    Ok(())
}
