//! Chat module: article-grounded assistant streamed over WebSocket
//!
//! Wire frames and transcript types, prompt assembly, and the stateless
//! [`ChatProxy`] that relays model output and persists the exchange.

pub mod config;
pub mod prompt;
pub mod proxy;
pub mod types;

pub use config::ChatConfig;
pub use proxy::{ChatProxy, ProxyError};
pub use types::{ChatMessage, ChatSession, ClientFrame, ServerFrame};
