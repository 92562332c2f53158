//! RSS feed subscription handlers (CRUD only, fetching is done elsewhere)

use crate::api::handlers::{AppError, SharedState};
use crate::auth::AuthUser;
use crate::store::FeedNode;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CreateFeedRequest {
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateFeedRequest {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

/// Accept only absolute http(s) URLs
fn normalize_feed_url(raw: &str) -> Result<String, AppError> {
    let url = reqwest::Url::parse(raw.trim())
        .map_err(|_| AppError::BadRequest(format!("Invalid feed URL: {}", raw)))?;
    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Ok(url.to_string()),
        _ => Err(AppError::BadRequest(
            "Feed URL must use http or https".to_string(),
        )),
    }
}

fn clean_title(title: Option<String>) -> Option<String> {
    title.map(|t| t.trim().to_string()).filter(|t| !t.is_empty())
}

/// Load a feed owned by `user_id`. Another user's feed is reported as not found.
async fn owned_feed(
    state: &SharedState,
    user_id: Uuid,
    feed_id: Uuid,
) -> Result<FeedNode, AppError> {
    state
        .store
        .get_feed(feed_id)
        .await?
        .filter(|f| f.user_id == user_id)
        .ok_or_else(|| AppError::NotFound(format!("Feed {} not found", feed_id)))
}

/// GET /feeds
pub async fn list_feeds(
    State(state): State<SharedState>,
    user: AuthUser,
) -> Result<Json<Vec<FeedNode>>, AppError> {
    Ok(Json(state.store.list_feeds(user.user_id).await?))
}

/// POST /feeds
pub async fn create_feed(
    State(state): State<SharedState>,
    user: AuthUser,
    Json(req): Json<CreateFeedRequest>,
) -> Result<(StatusCode, Json<FeedNode>), AppError> {
    let url = normalize_feed_url(&req.url)?;
    let existing = state.store.list_feeds(user.user_id).await?;
    if existing.iter().any(|f| f.url == url) {
        return Err(AppError::Conflict(format!("Already subscribed to {}", url)));
    }

    let now = Utc::now();
    let feed = FeedNode {
        id: Uuid::new_v4(),
        user_id: user.user_id,
        url,
        title: clean_title(req.title),
        created_at: now,
        updated_at: now,
    };
    state.store.create_feed(&feed).await?;
    tracing::info!(feed_id = %feed.id, user_id = %user.user_id, "Feed added");
    Ok((StatusCode::CREATED, Json(feed)))
}

/// GET /feeds/{id}
pub async fn get_feed(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(feed_id): Path<Uuid>,
) -> Result<Json<FeedNode>, AppError> {
    Ok(Json(owned_feed(&state, user.user_id, feed_id).await?))
}

/// PATCH /feeds/{id}
pub async fn update_feed(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(feed_id): Path<Uuid>,
    Json(req): Json<UpdateFeedRequest>,
) -> Result<Json<FeedNode>, AppError> {
    let mut feed = owned_feed(&state, user.user_id, feed_id).await?;
    if let Some(ref url) = req.url {
        feed.url = normalize_feed_url(url)?;
    }
    if req.title.is_some() {
        feed.title = clean_title(req.title);
    }
    feed.updated_at = Utc::now();
    state.store.update_feed(&feed).await?;
    Ok(Json(feed))
}

/// DELETE /feeds/{id}
pub async fn delete_feed(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(feed_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    owned_feed(&state, user.user_id, feed_id).await?;
    state.store.delete_feed(feed_id).await?;
    tracing::info!(feed_id = %feed_id, "Feed removed");
    Ok(StatusCode::NO_CONTENT)
}
