//! Client SDK: REST calls with refresh-on-401 and a streaming chat session

pub mod api;
pub mod credentials;
pub mod session;
pub mod state;

pub use api::{ApiClient, ClientError, Credentials};
pub use credentials::{CredentialStore, StoredCredentials};
pub use session::{ChatSessionClient, SendOutcome, SessionUpdate};
pub use state::{ConnectionState, SessionState};
