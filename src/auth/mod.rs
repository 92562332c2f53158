//! Authentication: access tokens, rotating refresh tokens, and the axum
//! middleware/extractor pair that turns a bearer token into an [`AuthUser`].

pub mod extractor;
pub mod jwt;
pub mod middleware;
pub mod refresh;

pub use extractor::AuthUser;
pub use jwt::{Claims, ANONYMOUS_USER_ID};
pub use middleware::require_auth;
