//! HTTP middleware: auth is `ayb_auth::auth_middleware` directly; this
//! module holds the rest of the stack (CORS, rate limiting).

mod cors;
mod rate_limit;

pub use cors::layer_for as cors_layer_for;
pub use rate_limit::rate_limit_middleware;
