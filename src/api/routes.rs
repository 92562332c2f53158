//! API route definitions

use super::handlers::{self, SharedState};
use super::{
    auth_handlers, chat_handlers, digest_handlers, feed_handlers, preference_handlers,
    ws_chat_handler,
};
use crate::auth::require_auth;
use axum::{
    http::HeaderValue,
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the API router
pub fn create_router(state: SharedState) -> Router {
    let origins: Vec<HeaderValue> = state
        .allowed_origins()
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any);

    // Authenticated by the bearer-token middleware
    let protected = Router::new()
        .route("/auth/me", get(auth_handlers::me))
        // ====================================================================
        // Digests & articles
        // ====================================================================
        .route("/digests", get(digest_handlers::list_digests))
        .route("/digests/{id}", get(digest_handlers::get_digest))
        .route("/articles", get(digest_handlers::list_articles))
        .route("/articles/{id}", get(digest_handlers::get_article))
        // ====================================================================
        // Chat
        // ====================================================================
        .route(
            "/chat/sessions",
            get(chat_handlers::list_sessions).post(chat_handlers::create_session),
        )
        .route(
            "/chat/sessions/{id}",
            get(chat_handlers::get_session).delete(chat_handlers::delete_session),
        )
        .route(
            "/chat/sessions/{id}/messages",
            get(chat_handlers::list_messages),
        )
        .route("/chat/generate", post(chat_handlers::generate))
        // ====================================================================
        // Feeds, preferences, topics
        // ====================================================================
        .route(
            "/feeds",
            get(feed_handlers::list_feeds).post(feed_handlers::create_feed),
        )
        .route(
            "/feeds/{id}",
            get(feed_handlers::get_feed)
                .patch(feed_handlers::update_feed)
                .delete(feed_handlers::delete_feed),
        )
        .route(
            "/users/me/preferences",
            get(preference_handlers::get_preferences)
                .put(preference_handlers::update_preferences),
        )
        .route(
            "/topics/suggestions",
            get(preference_handlers::topic_suggestions),
        )
        .route_layer(from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/auth/signup", post(auth_handlers::signup))
        .route("/auth/login", post(auth_handlers::login))
        .route("/auth/refresh", post(auth_handlers::refresh))
        .route("/auth/logout", post(auth_handlers::logout))
        // Token in the query string, checked before the upgrade
        .route("/chat/ws/{session_id}", get(ws_chat_handler::ws_chat))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
