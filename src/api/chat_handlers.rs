//! Chat REST handlers: session CRUD, transcript pages, one-shot generation

use crate::api::handlers::{AppError, SharedState};
use crate::api::{PaginatedResponse, PaginationParams};
use crate::auth::AuthUser;
use crate::chat::types::{
    ChatMessage, ChatSession, CreateSessionRequest, CreateSessionResponse, GenerateRequest,
    GenerateResponse, MessagesPage,
};
use crate::store::ChatSessionNode;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use uuid::Uuid;

/// Relative URL of the WebSocket stream for a session
pub fn stream_url(session_id: Uuid) -> String {
    format!("/chat/ws/{}", session_id)
}

/// POST /chat/sessions
pub async fn create_session(
    State(state): State<SharedState>,
    user: AuthUser,
    Json(req): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<CreateSessionResponse>), AppError> {
    if let Some(digest_id) = req.digest_id {
        let owned = state
            .store
            .get_digest(digest_id)
            .await?
            .is_some_and(|d| d.user_id == user.user_id);
        if !owned {
            return Err(AppError::NotFound(format!("Digest {} not found", digest_id)));
        }
    }

    let now = Utc::now();
    let session = ChatSessionNode {
        id: Uuid::new_v4(),
        user_id: user.user_id,
        digest_id: req.digest_id,
        title: req
            .title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty()),
        created_at: now,
        updated_at: now,
        message_count: 0,
    };
    state.store.create_chat_session(&session).await?;
    tracing::info!(session_id = %session.id, user_id = %user.user_id, "Chat session created");

    Ok((
        StatusCode::CREATED,
        Json(CreateSessionResponse {
            session_id: session.id,
            stream_url: stream_url(session.id),
            created_at: session.created_at,
        }),
    ))
}

/// GET /chat/sessions
pub async fn list_sessions(
    State(state): State<SharedState>,
    user: AuthUser,
    Query(pagination): Query<PaginationParams>,
) -> Result<Json<PaginatedResponse<ChatSession>>, AppError> {
    pagination.validate().map_err(AppError::BadRequest)?;
    let limit = pagination.validated_limit();
    let (sessions, total) = state
        .store
        .list_chat_sessions(user.user_id, limit, pagination.offset)
        .await?;
    Ok(Json(PaginatedResponse::new(
        sessions.into_iter().map(ChatSession::from).collect(),
        total,
        limit,
        pagination.offset,
    )))
}

/// GET /chat/sessions/{id}
pub async fn get_session(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(session_id): Path<Uuid>,
) -> Result<Json<ChatSession>, AppError> {
    let session = state.proxy.owned_session(user.user_id, session_id).await?;
    Ok(Json(session.into()))
}

/// DELETE /chat/sessions/{id}
pub async fn delete_session(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(session_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.proxy.owned_session(user.user_id, session_id).await?;
    if !state.store.delete_chat_session(session_id).await? {
        return Err(AppError::NotFound(format!(
            "Chat session {} not found",
            session_id
        )));
    }
    tracing::info!(session_id = %session_id, "Chat session deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// GET /chat/sessions/{id}/messages
pub async fn list_messages(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(session_id): Path<Uuid>,
    Query(pagination): Query<PaginationParams>,
) -> Result<Json<MessagesPage>, AppError> {
    pagination.validate().map_err(AppError::BadRequest)?;
    state.proxy.owned_session(user.user_id, session_id).await?;

    let limit = pagination.validated_limit();
    let (messages, total_count) = state
        .store
        .list_chat_messages(session_id, limit, pagination.offset)
        .await?;
    let page = PaginatedResponse::new(messages, total_count, limit, pagination.offset);

    Ok(Json(MessagesPage {
        messages: page.items.into_iter().map(ChatMessage::from).collect(),
        total_count: page.total,
        has_more: page.has_more,
        offset: page.offset,
        limit: page.limit,
    }))
}

/// POST /chat/generate
pub async fn generate(
    State(state): State<SharedState>,
    user: AuthUser,
    Json(req): Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>, AppError> {
    Ok(Json(state.proxy.generate(user.user_id, req).await?))
}
