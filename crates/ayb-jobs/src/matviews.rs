//! Materialized view registrations and `RefreshNow`.

use crate::model::{MvRegistration, RefreshMode, RefreshStatus};
use ayb_db::quote_qualified;
use ayb_error::{AybError, Result};
use chrono::Utc;
use deadpool_postgres::Pool;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use uuid::Uuid;

pub struct MatviewManager {
    pool: Pool,
}

impl MatviewManager {
    #[must_use]
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub async fn register(&self, schema: &str, view: &str, mode: RefreshMode) -> Result<MvRegistration> {
        let client = self.pool.get().await.map_err(AybError::internal)?;
        let row = client
            .query_one(
                "INSERT INTO _ayb_mv_registrations (schema, view_name, mode)
                 VALUES ($1, $2, $3)
                 RETURNING id, schema, view_name, mode,
                           last_refresh_started_at, last_refresh_finished_at,
                           last_refresh_status, last_error",
                &[&schema, &view, &mode.as_db_str()],
            )
            .await
            .map_err(|e| ayb_error::map_pg_error(&e))?;
        row_to_registration(row)
    }

    /// Look up an existing registration for `(schema, view)`, registering a
    /// `standard`-mode one if none exists yet. Handles the race where two
    /// callers both try to auto-register the same matview concurrently.
    pub async fn ensure_registered(&self, schema: &str, view: &str) -> Result<MvRegistration> {
        if let Some(existing) = self.find(schema, view).await? {
            return Ok(existing);
        }
        match self.register(schema, view, RefreshMode::Standard).await {
            Ok(reg) => Ok(reg),
            Err(AybError::Conflict(_)) => self
                .find(schema, view)
                .await?
                .ok_or_else(|| AybError::Internal(Box::new(std::io::Error::other(
                    "registration vanished after conflict",
                )))),
            Err(other) => Err(other),
        }
    }

    pub async fn find(&self, schema: &str, view: &str) -> Result<Option<MvRegistration>> {
        let client = self.pool.get().await.map_err(AybError::internal)?;
        let row = client
            .query_opt(
                "SELECT id, schema, view_name, mode,
                        last_refresh_started_at, last_refresh_finished_at,
                        last_refresh_status, last_error
                 FROM _ayb_mv_registrations
                 WHERE schema = $1 AND view_name = $2",
                &[&schema, &view],
            )
            .await
            .map_err(|e| ayb_error::map_pg_error(&e))?;
        row.map(row_to_registration).transpose()
    }

    /// Refresh the matview named by registration `id`, following the
    /// advisory-lock-guarded sequence: load, verify existence, lock, check
    /// concurrent-mode prerequisites, refresh, record outcome, unlock.
    pub async fn refresh_now(&self, id: Uuid) -> Result<()> {
        let registration = self.load(id).await?;
        let client = self.pool.get().await.map_err(AybError::internal)?;

        self.verify_matview_exists(&client, &registration.schema, &registration.view)
            .await?;

        let lock_key = advisory_lock_key(&registration.schema, &registration.view);
        let acquired: bool = client
            .query_one("SELECT pg_try_advisory_lock($1)", &[&lock_key])
            .await
            .map_err(|e| ayb_error::map_pg_error(&e))?
            .get(0);
        if !acquired {
            return Err(AybError::Conflict("refresh already in progress".into()));
        }

        let outcome = self.run_refresh(&client, &registration).await;

        let _: bool = client
            .query_one("SELECT pg_advisory_unlock($1)", &[&lock_key])
            .await
            .map(|row| row.get(0))
            .unwrap_or(false);

        self.record_outcome(id, &outcome).await?;
        outcome
    }

    async fn run_refresh(
        &self,
        client: &deadpool_postgres::Object,
        registration: &MvRegistration,
    ) -> Result<()> {
        if registration.mode == RefreshMode::Concurrent {
            self.verify_concurrent_prerequisites(client, &registration.schema, &registration.view)
                .await?;
        }

        let qualified = quote_qualified(&registration.schema, &registration.view)?;
        let concurrently = if registration.mode == RefreshMode::Concurrent {
            "CONCURRENTLY "
        } else {
            ""
        };
        client
            .execute(
                &format!("REFRESH MATERIALIZED VIEW {concurrently}{qualified}"),
                &[],
            )
            .await
            .map_err(|e| ayb_error::map_pg_error(&e))?;
        Ok(())
    }

    async fn verify_matview_exists(
        &self,
        client: &deadpool_postgres::Object,
        schema: &str,
        view: &str,
    ) -> Result<()> {
        let exists: bool = client
            .query_one(
                "SELECT EXISTS (
                     SELECT 1 FROM pg_class c
                     JOIN pg_namespace n ON n.oid = c.relnamespace
                     WHERE c.relkind = 'm' AND n.nspname = $1 AND c.relname = $2
                 )",
                &[&schema, &view],
            )
            .await
            .map_err(|e| ayb_error::map_pg_error(&e))?
            .get(0);
        if !exists {
            return Err(AybError::NotFound(format!(
                "materialized view {schema}.{view} does not exist"
            )));
        }
        Ok(())
    }

    async fn verify_concurrent_prerequisites(
        &self,
        client: &deadpool_postgres::Object,
        schema: &str,
        view: &str,
    ) -> Result<()> {
        let populated: bool = client
            .query_one(
                "SELECT c.relispopulated
                 FROM pg_class c
                 JOIN pg_namespace n ON n.oid = c.relnamespace
                 WHERE n.nspname = $1 AND c.relname = $2",
                &[&schema, &view],
            )
            .await
            .map_err(|e| ayb_error::map_pg_error(&e))?
            .get(0);
        if !populated {
            return Err(AybError::Validation(
                "CONCURRENTLY refresh requires the matview to already be populated".into(),
            ));
        }

        let has_unique_index: bool = client
            .query_one(
                "SELECT EXISTS (
                     SELECT 1 FROM pg_index i
                     JOIN pg_class c ON c.oid = i.indrelid
                     JOIN pg_namespace n ON n.oid = c.relnamespace
                     WHERE n.nspname = $1 AND c.relname = $2
                       AND i.indisunique AND i.indpred IS NULL
                 )",
                &[&schema, &view],
            )
            .await
            .map_err(|e| ayb_error::map_pg_error(&e))?
            .get(0);
        if !has_unique_index {
            return Err(AybError::Validation(
                "CONCURRENTLY refresh requires at least one non-partial unique index".into(),
            ));
        }
        Ok(())
    }

    async fn load(&self, id: Uuid) -> Result<MvRegistration> {
        let client = self.pool.get().await.map_err(AybError::internal)?;
        let row = client
            .query_opt(
                "SELECT id, schema, view_name, mode,
                        last_refresh_started_at, last_refresh_finished_at,
                        last_refresh_status, last_error
                 FROM _ayb_mv_registrations WHERE id = $1",
                &[&id],
            )
            .await
            .map_err(|e| ayb_error::map_pg_error(&e))?
            .ok_or_else(|| AybError::NotFound(format!("matview registration {id} not found")))?;
        row_to_registration(row)
    }

    async fn record_outcome(&self, id: Uuid, outcome: &Result<()>) -> Result<()> {
        let client = self.pool.get().await.map_err(AybError::internal)?;
        let started_at = Utc::now();
        let (status, error_text) = match outcome {
            Ok(()) => (RefreshStatus::Success.as_db_str(), None),
            Err(e) => (RefreshStatus::Error.as_db_str(), Some(e.to_string())),
        };
        client
            .execute(
                "UPDATE _ayb_mv_registrations
                 SET last_refresh_started_at = $2, last_refresh_finished_at = now(),
                     last_refresh_status = $3, last_error = $4
                 WHERE id = $1",
                &[&id, &started_at, &status, &error_text],
            )
            .await
            .map_err(|e| ayb_error::map_pg_error(&e))?;
        Ok(())
    }
}

impl RefreshStatus {
    #[must_use]
    pub fn as_db_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }

    #[must_use]
    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "success" => Some(Self::Success),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

fn row_to_registration(row: tokio_postgres::Row) -> Result<MvRegistration> {
    let mode_str: String = row.get("mode");
    let mode = RefreshMode::from_db_str(&mode_str)
        .ok_or_else(|| AybError::Validation(format!("unknown refresh mode: {mode_str}")))?;
    let status_str: Option<String> = row.get("last_refresh_status");
    let last_refresh_status = status_str
        .map(|s| {
            RefreshStatus::from_db_str(&s)
                .ok_or_else(|| AybError::Validation(format!("unknown refresh status: {s}")))
        })
        .transpose()?;
    Ok(MvRegistration {
        id: row.get("id"),
        schema: row.get("schema"),
        view: row.get("view_name"),
        mode,
        last_refresh_started_at: row.get("last_refresh_started_at"),
        last_refresh_finished_at: row.get("last_refresh_finished_at"),
        last_refresh_status,
        last_error: row.get("last_error"),
    })
}

/// Keys the advisory lock from `hash(schema+"."+view)`, folded to `i64`
/// since `pg_try_advisory_lock` takes a signed 64-bit key.
fn advisory_lock_key(schema: &str, view: &str) -> i64 {
    let mut hasher = DefaultHasher::new();
    format!("{schema}.{view}").hash(&mut hasher);
    hasher.finish() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advisory_lock_key_is_deterministic() {
        assert_eq!(
            advisory_lock_key("public", "totals"),
            advisory_lock_key("public", "totals")
        );
    }

    #[test]
    fn advisory_lock_key_differs_per_view() {
        assert_ne!(
            advisory_lock_key("public", "totals"),
            advisory_lock_key("public", "other_totals")
        );
    }

    #[test]
    fn refresh_status_db_str_round_trips() {
        for status in [RefreshStatus::Success, RefreshStatus::Error] {
            assert_eq!(RefreshStatus::from_db_str(status.as_db_str()), Some(status));
        }
        assert_eq!(RefreshStatus::from_db_str("bogus"), None);
    }
}
