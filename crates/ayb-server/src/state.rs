//! Shared application state handed to every handler via `State<AppState>`.

use crate::config::Config;
use ayb_auth::{AppRateLimiter, AuthState};
use ayb_jobs::JobQueue;
use ayb_realtime::Hub;
use ayb_schema::SchemaCache;
use deadpool_postgres::Pool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub pool: Pool,
    pub schema_cache: Arc<SchemaCache>,
    pub jobs: Arc<JobQueue>,
    pub hub: Arc<Hub>,
    pub auth: AuthState,
    pub rate_limiter: Arc<AppRateLimiter>,
    pub config: Arc<Config>,
    /// Postgres role RLS policies are written against for authenticated
    /// requests; unauthenticated requests run as `ayb_anon`.
    pub authenticated_role: String,
    pub anon_role: String,
}

impl AppState {
    #[must_use]
    pub fn role_for(&self, claims: &ayb_auth::Claims) -> &str {
        if claims.is_authenticated() {
            &self.authenticated_role
        } else {
            &self.anon_role
        }
    }
}
