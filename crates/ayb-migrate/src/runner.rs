//! Applies pending migrations in order, each inside its own transaction.

use crate::migration::MigrationSource;
use ayb_error::{AybError, Result};
use deadpool_postgres::Pool;
use std::collections::HashSet;

pub struct Runner {
    pool: Pool,
}

impl Runner {
    #[must_use]
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Applies every migration from `source` not yet recorded in the
    /// ledger, in version order. A failing migration rolls back and leaves
    /// the ledger unchanged for it and everything after it.
    ///
    /// # Errors
    ///
    /// Returns an error from the first migration that fails to apply, or
    /// from reading `source`.
    pub async fn run(&self, source: &dyn MigrationSource) -> Result<Vec<i64>> {
        self.ensure_ledger().await?;
        let applied_before = self.applied_versions().await?;

        let mut newly_applied = Vec::new();
        for migration in source.migrations()? {
            if applied_before.contains(&migration.version) {
                continue;
            }
            self.apply(&migration).await?;
            tracing::info!(version = migration.version, name = %migration.name, "migration applied");
            newly_applied.push(migration.version);
        }
        Ok(newly_applied)
    }

    async fn ensure_ledger(&self) -> Result<()> {
        let client = self.pool.get().await.map_err(AybError::internal)?;
        client
            .batch_execute(
                "CREATE TABLE IF NOT EXISTS _ayb_migrations (
                     version BIGINT PRIMARY KEY,
                     name TEXT NOT NULL,
                     applied_at TIMESTAMPTZ NOT NULL DEFAULT now()
                 )",
            )
            .await
            .map_err(|e| ayb_error::map_pg_error(&e))?;
        Ok(())
    }

    async fn applied_versions(&self) -> Result<HashSet<i64>> {
        let client = self.pool.get().await.map_err(AybError::internal)?;
        let rows = client
            .query("SELECT version FROM _ayb_migrations", &[])
            .await
            .map_err(|e| ayb_error::map_pg_error(&e))?;
        Ok(rows.into_iter().map(|row| row.get("version")).collect())
    }

    async fn apply(&self, migration: &crate::migration::Migration) -> Result<()> {
        let mut client = self.pool.get().await.map_err(AybError::internal)?;
        let txn = client.transaction().await.map_err(|e| ayb_error::map_pg_error(&e))?;

        let result = txn.batch_execute(&migration.sql).await;
        if let Err(err) = result {
            if let Err(rollback_err) = txn.rollback().await {
                tracing::warn!(error = %rollback_err, "rollback failed after migration error");
            }
            return Err(ayb_error::map_pg_error(&err));
        }

        txn.execute(
            "INSERT INTO _ayb_migrations (version, name) VALUES ($1, $2)",
            &[&migration.version, &migration.name],
        )
        .await
        .map_err(|e| ayb_error::map_pg_error(&e))?;

        txn.commit().await.map_err(|e| ayb_error::map_pg_error(&e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::{InMemorySource, Migration};

    #[test]
    fn in_memory_source_is_usable_as_a_trait_object() {
        let source: Box<dyn MigrationSource> = Box::new(InMemorySource::new(vec![Migration {
            version: 1,
            name: "noop".into(),
            sql: "SELECT 1".into(),
        }]));
        assert_eq!(source.migrations().unwrap().len(), 1);
    }
}
