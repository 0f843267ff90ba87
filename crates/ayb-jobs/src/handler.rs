//! Job handler trait and the built-in job-type registry.
//!
//! Each job carries a `job_type` string; the worker loop looks it up here and
//! runs its handler. A type with no registered handler fails immediately —
//! it's never retried, since retrying wouldn't make the type exist.

use async_trait::async_trait;
use ayb_error::{AybError, Result};
use deadpool_postgres::Pool;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, payload: &Value, pool: &Pool) -> Result<()>;
}

pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register(&mut self, job_type: impl Into<String>, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(job_type.into(), handler);
    }

    pub async fn dispatch(&self, job_type: &str, payload: &Value, pool: &Pool) -> Result<()> {
        match self.handlers.get(job_type) {
            Some(handler) => handler.handle(payload, pool).await,
            None => Err(AybError::Validation(format!("unknown job type: {job_type}"))),
        }
    }

    #[must_use]
    pub fn is_registered(&self, job_type: &str) -> bool {
        self.handlers.contains_key(job_type)
    }

    #[must_use]
    pub fn builtin(pool: Pool) -> Self {
        let mut registry = Self::new();
        registry.register("stale_session_cleanup", Arc::new(StaleSessionCleanup));
        registry.register("webhook_delivery_pruning", Arc::new(WebhookDeliveryPruning));
        registry.register("expired_oauth_token_cleanup", Arc::new(ExpiredOAuthTokenCleanup));
        registry.register(
            "expired_magic_link_cleanup",
            Arc::new(ExpiredMagicLinkCleanup),
        );
        registry.register("materialized_view_refresh", Arc::new(MatviewRefreshJob::new(pool)));
        registry
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

struct StaleSessionCleanup;

#[async_trait]
impl JobHandler for StaleSessionCleanup {
    async fn handle(&self, _payload: &Value, pool: &Pool) -> Result<()> {
        let client = pool.get().await.map_err(AybError::internal)?;
        client
            .execute("DELETE FROM _ayb_sessions WHERE expires_at < now()", &[])
            .await
            .map_err(|e| ayb_error::map_pg_error(&e))?;
        Ok(())
    }
}

struct WebhookDeliveryPruning;

#[async_trait]
impl JobHandler for WebhookDeliveryPruning {
    async fn handle(&self, _payload: &Value, pool: &Pool) -> Result<()> {
        let client = pool.get().await.map_err(AybError::internal)?;
        client
            .execute(
                "DELETE FROM _ayb_webhook_deliveries WHERE created_at < now() - interval '30 days'",
                &[],
            )
            .await
            .map_err(|e| ayb_error::map_pg_error(&e))?;
        Ok(())
    }
}

struct ExpiredOAuthTokenCleanup;

#[async_trait]
impl JobHandler for ExpiredOAuthTokenCleanup {
    async fn handle(&self, _payload: &Value, pool: &Pool) -> Result<()> {
        let client = pool.get().await.map_err(AybError::internal)?;
        client
            .execute(
                "DELETE FROM _ayb_oauth_tokens WHERE expires_at < now()",
                &[],
            )
            .await
            .map_err(|e| ayb_error::map_pg_error(&e))?;
        client
            .execute(
                "DELETE FROM _ayb_oauth_codes WHERE expires_at < now()",
                &[],
            )
            .await
            .map_err(|e| ayb_error::map_pg_error(&e))?;
        Ok(())
    }
}

struct ExpiredMagicLinkCleanup;

#[async_trait]
impl JobHandler for ExpiredMagicLinkCleanup {
    async fn handle(&self, _payload: &Value, pool: &Pool) -> Result<()> {
        let client = pool.get().await.map_err(AybError::internal)?;
        client
            .execute("DELETE FROM _ayb_magic_links WHERE expires_at < now()", &[])
            .await
            .map_err(|e| ayb_error::map_pg_error(&e))?;
        client
            .execute(
                "DELETE FROM _ayb_password_resets WHERE expires_at < now()",
                &[],
            )
            .await
            .map_err(|e| ayb_error::map_pg_error(&e))?;
        Ok(())
    }
}

/// Delegates to [`crate::matviews::refresh_now`], auto-registering the
/// matview if the job's payload names one that isn't registered yet.
struct MatviewRefreshJob {
    pool: Pool,
}

impl MatviewRefreshJob {
    fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobHandler for MatviewRefreshJob {
    async fn handle(&self, payload: &Value, _pool: &Pool) -> Result<()> {
        let schema = payload
            .get("schema")
            .and_then(Value::as_str)
            .ok_or_else(|| AybError::Validation("materialized_view_refresh payload missing schema".into()))?;
        let view = payload
            .get("view")
            .and_then(Value::as_str)
            .ok_or_else(|| AybError::Validation("materialized_view_refresh payload missing view".into()))?;

        let manager = crate::matviews::MatviewManager::new(self.pool.clone());
        let registration = manager.ensure_registered(schema, view).await?;
        manager.refresh_now(registration.id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl JobHandler for Noop {
        async fn handle(&self, _payload: &Value, _pool: &Pool) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn unregistered_job_type_is_not_registered() {
        let registry = HandlerRegistry::new();
        assert!(!registry.is_registered("made_up_type"));
    }

    #[test]
    fn registering_a_handler_makes_it_known() {
        let mut registry = HandlerRegistry::new();
        registry.register("noop", Arc::new(Noop));
        assert!(registry.is_registered("noop"));
        assert!(!registry.is_registered("other"));
    }
}
