//! Unifies JWT session auth, opaque API-key auth, and opaque OAuth
//! access-token auth behind one [`Claims`] envelope.

mod claims;
mod jwt;
mod middleware;
mod rate_limit;
mod tokens;

pub use claims::{ApiKeyScope, Claims, SessionKind};
pub use jwt::SessionJwt;
pub use middleware::{auth_middleware, AuthState};
pub use rate_limit::AppRateLimiter;
pub use tokens::{hash_token, intersect_allowed_tables, TokenStore};
