//! Opaque API-key and OAuth access-token lookup.
//!
//! Deliberately independent of `ayb-db` — the RLS transaction wrapper there
//! needs `Claims` from this crate, so this crate can't depend back on it.
//! Token rows are read with their own short-lived connection from the pool.

use crate::claims::{ApiKeyScope, Claims, SessionKind};
use ayb_error::{AybError, Result};
use chrono::Utc;
use deadpool_postgres::Pool;
use sha2::{Digest, Sha256};
use uuid::Uuid;

#[must_use]
pub fn hash_token(raw: &str) -> String {
    let digest = Sha256::digest(raw.as_bytes());
    hex::encode(digest)
}

pub struct TokenStore {
    pool: Pool,
}

impl TokenStore {
    #[must_use]
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// `Bearer ayb_<hex>` — opaque API key.
    ///
    /// # Errors
    ///
    /// `401` if the key is unknown, revoked, or expired.
    pub async fn lookup_api_key(&self, raw_key: &str, request_id: Uuid) -> Result<Claims> {
        let client = self.pool_client().await?;
        let hash = hash_token(raw_key);

        let row = client
            .query_opt(
                "select k.user_id, k.scope, k.allowed_tables, k.app_id, k.revoked_at, k.expires_at,
                        a.rate_limit_rps, a.rate_limit_window_sec
                 from _ayb_api_keys k
                 left join _ayb_apps a on a.id = k.app_id and a.table_schema = 'public'
                 where k.hash = $1",
                &[&hash],
            )
            .await
            .map_err(|e| ayb_error::map_pg_error(&e))?
            .ok_or(AybError::Unauthenticated)?;

        let revoked_at: Option<chrono::DateTime<Utc>> = row.get("revoked_at");
        let expires_at: Option<chrono::DateTime<Utc>> = row.get("expires_at");
        if revoked_at.is_some() {
            return Err(AybError::Unauthenticated);
        }
        if expires_at.is_some_and(|exp| exp <= Utc::now()) {
            return Err(AybError::Unauthenticated);
        }

        let scope_raw: String = row.get("scope");
        let api_key_scope = ApiKeyScope::parse(&scope_raw);

        Ok(Claims {
            request_id,
            session_kind: SessionKind::ApiKey,
            user_id: row.get("user_id"),
            app_id: row.get("app_id"),
            api_key_scope,
            allowed_tables: row.get::<_, Option<Vec<String>>>("allowed_tables").unwrap_or_default(),
            oauth_scopes: Vec::new(),
            app_rate_limit_rps: row.get("rate_limit_rps"),
            app_rate_limit_window_sec: row.get::<_, Option<i64>>("rate_limit_window_sec").map(|v| v as u64),
            is_admin: false,
        })
    }

    /// `Bearer ayb_at_<hex>` — opaque OAuth access token.
    ///
    /// # Errors
    ///
    /// `401` if the token is unknown, expired, revoked, or its client is revoked.
    pub async fn lookup_oauth_token(&self, raw_token: &str, request_id: Uuid) -> Result<Claims> {
        let client = self.pool_client().await?;
        let hash = hash_token(raw_token);

        let row = client
            .query_opt(
                "select t.user_id, t.scope, t.allowed_tables, t.expires_at, t.revoked_at,
                        c.revoked_at as client_revoked_at, c.app_id,
                        a.rate_limit_rps, a.rate_limit_window_sec
                 from _ayb_oauth_tokens t
                 join _ayb_oauth_clients c on c.id = t.client_id
                 left join _ayb_apps a on a.id = c.app_id and a.table_schema = 'public'
                 where t.hash = $1 and t.kind = 'access'",
                &[&hash],
            )
            .await
            .map_err(|e| ayb_error::map_pg_error(&e))?
            .ok_or(AybError::Unauthenticated)?;

        let expires_at: chrono::DateTime<Utc> = row.get("expires_at");
        let revoked_at: Option<chrono::DateTime<Utc>> = row.get("revoked_at");
        let client_revoked_at: Option<chrono::DateTime<Utc>> = row.get("client_revoked_at");
        if revoked_at.is_some() || client_revoked_at.is_some() || expires_at <= Utc::now() {
            return Err(AybError::Unauthenticated);
        }

        let scope_raw: String = row.get("scope");
        let oauth_scopes: Vec<String> = scope_raw.split_whitespace().map(str::to_string).collect();

        Ok(Claims {
            request_id,
            session_kind: SessionKind::OAuth,
            user_id: row.get("user_id"),
            app_id: row.get("app_id"),
            api_key_scope: Some(ApiKeyScope::ReadWrite),
            allowed_tables: row.get::<_, Option<Vec<String>>>("allowed_tables").unwrap_or_default(),
            oauth_scopes,
            app_rate_limit_rps: row.get("rate_limit_rps"),
            app_rate_limit_window_sec: row.get::<_, Option<i64>>("rate_limit_window_sec").map(|v| v as u64),
            is_admin: false,
        })
    }

    async fn pool_client(&self) -> Result<deadpool_postgres::Object> {
        self.pool
            .get()
            .await
            .map_err(|e| AybError::internal(PoolError(e.to_string())))
    }
}

/// Intersects two `allowedTables` sets — an empty set means "unrestricted",
/// so it yields the other side untouched.
#[must_use]
pub fn intersect_allowed_tables(a: &[String], b: &[String]) -> Vec<String> {
    match (a.is_empty(), b.is_empty()) {
        (true, _) => b.to_vec(),
        (_, true) => a.to_vec(),
        _ => a.iter().filter(|t| b.contains(t)).cloned().collect(),
    }
}

#[derive(Debug)]
struct PoolError(String);

impl std::fmt::Display for PoolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "failed to acquire connection: {}", self.0)
    }
}

impl std::error::Error for PoolError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_token_is_deterministic_and_hex() {
        let h1 = hash_token("ayb_abc123");
        let h2 = hash_token("ayb_abc123");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
        assert!(h1.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn different_tokens_hash_differently() {
        assert_ne!(hash_token("a"), hash_token("b"));
    }

    #[test]
    fn intersect_with_empty_sides_is_unrestricted_passthrough() {
        let restricted = vec!["posts".to_string()];
        assert_eq!(intersect_allowed_tables(&[], &restricted), restricted);
        assert_eq!(intersect_allowed_tables(&restricted, &[]), restricted);
        assert!(intersect_allowed_tables(&[], &[]).is_empty());
    }

    #[test]
    fn intersect_keeps_only_common_tables() {
        let a = vec!["posts".to_string(), "users".to_string()];
        let b = vec!["users".to_string(), "tags".to_string()];
        assert_eq!(intersect_allowed_tables(&a, &b), vec!["users".to_string()]);
    }
}
