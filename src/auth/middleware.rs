//! Bearer-token middleware for protected routes.

use crate::api::handlers::{AppError, SharedState};
use crate::auth::jwt::{decode_access_token, Claims};
use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};

/// Require a valid access token and inject its [`Claims`] into request extensions.
///
/// In open mode (no auth config) every request runs as the anonymous user.
/// Otherwise a missing, malformed or expired token is a 401, and a token whose
/// email falls outside `allowed_email_domain` is a 403.
pub async fn require_auth(
    State(state): State<SharedState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(auth_config) = state.auth_config.as_ref() else {
        req.extensions_mut().insert(Claims::anonymous());
        return Ok(next.run(req).await);
    };

    let token = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("Missing Authorization header".to_string()))?
        .strip_prefix("Bearer ")
        .ok_or_else(|| AppError::Unauthorized("Invalid Authorization header format".to_string()))?;

    let claims = decode_access_token(token, &auth_config.jwt_secret)
        .map_err(|_| AppError::Unauthorized("Invalid or expired token".to_string()))?;

    if let Some(ref domain) = auth_config.allowed_email_domain {
        if !claims.email.ends_with(&format!("@{}", domain)) {
            return Err(AppError::Forbidden(format!(
                "Email domain not allowed (expected @{})",
                domain
            )));
        }
    }

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}
