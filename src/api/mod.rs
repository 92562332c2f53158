//! HTTP + WebSocket API

pub mod auth_handlers;
pub mod chat_handlers;
pub mod digest_handlers;
pub mod feed_handlers;
pub mod handlers;
pub mod preference_handlers;
pub mod query;
pub mod routes;
pub mod ws_auth;
pub mod ws_chat_handler;

pub use query::*;
pub use routes::create_router;
