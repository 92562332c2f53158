//! Document store: users, preferences, feeds, articles, digests and chat transcripts

pub mod client;
pub mod models;
pub mod traits;

pub use client::Neo4jStore;
pub use models::*;
pub use traits::DocumentStore;

#[cfg(test)]
pub(crate) mod mock;
