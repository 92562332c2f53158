//! Digest and article read handlers

use crate::api::handlers::{AppError, SharedState};
use crate::api::{ArticleQuery, PaginatedResponse, PaginationParams};
use crate::auth::AuthUser;
use crate::store::{ArticleNode, DigestNode};
use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A digest with its articles, in digest order
#[derive(Debug, Serialize, Deserialize)]
pub struct DigestDetail {
    #[serde(flatten)]
    pub digest: DigestNode,
    pub articles: Vec<ArticleNode>,
}

/// GET /digests
pub async fn list_digests(
    State(state): State<SharedState>,
    user: AuthUser,
    Query(pagination): Query<PaginationParams>,
) -> Result<Json<PaginatedResponse<DigestNode>>, AppError> {
    pagination.validate().map_err(AppError::BadRequest)?;
    let limit = pagination.validated_limit();
    let (digests, total) = state
        .store
        .list_digests(user.user_id, limit, pagination.offset)
        .await?;
    Ok(Json(PaginatedResponse::new(
        digests,
        total,
        limit,
        pagination.offset,
    )))
}

/// GET /digests/{id}
///
/// Another user's digest is reported as not found.
pub async fn get_digest(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(digest_id): Path<Uuid>,
) -> Result<Json<DigestDetail>, AppError> {
    let ctx = state.proxy.load_digest_context(user.user_id, digest_id).await?;
    let articles = ctx
        .articles
        .into_iter()
        .map(|mut a| {
            a.content = None;
            a
        })
        .collect();
    Ok(Json(DigestDetail {
        digest: ctx.digest,
        articles,
    }))
}

/// GET /articles
///
/// Full article text is only returned by `GET /articles/{id}`.
pub async fn list_articles(
    State(state): State<SharedState>,
    _user: AuthUser,
    Query(query): Query<ArticleQuery>,
) -> Result<Json<PaginatedResponse<ArticleNode>>, AppError> {
    query.pagination.validate().map_err(AppError::BadRequest)?;
    let limit = query.pagination.validated_limit();
    let offset = query.pagination.offset;

    let (mut articles, total) = state
        .store
        .list_articles(&query.filter(), limit, offset)
        .await?;
    for article in &mut articles {
        article.content = None;
    }
    Ok(Json(PaginatedResponse::new(articles, total, limit, offset)))
}

/// GET /articles/{id}
pub async fn get_article(
    State(state): State<SharedState>,
    _user: AuthUser,
    Path(article_id): Path<Uuid>,
) -> Result<Json<ArticleNode>, AppError> {
    state
        .store
        .get_article(article_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Article {} not found", article_id)))
}
