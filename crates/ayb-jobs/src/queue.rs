//! The job queue: enqueue, SKIP LOCKED claiming, lease renewal, and the
//! success/failure/sweep paths.
//!
//! Claiming follows the same shape as a Postgres work queue built on `FOR
//! UPDATE SKIP LOCKED`: one row is picked under lock and immediately flipped
//! to `running` in the same statement, so two workers polling concurrently
//! never see the same job.

use crate::backoff::backoff;
use crate::model::{Job, JobState};
use ayb_error::{AybError, Result};
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use serde_json::Value;
use std::time::Duration;
use uuid::Uuid;

pub struct JobQueue {
    pool: Pool,
}

impl JobQueue {
    #[must_use]
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Insert a job. If `idempotency_key` is `Some` and a job with the same
    /// `(job_type, idempotency_key)` already exists, this is a silent no-op —
    /// the existing job id is returned.
    pub async fn enqueue(
        &self,
        job_type: &str,
        payload: Value,
        max_attempts: i32,
        run_at: DateTime<Utc>,
        idempotency_key: Option<&str>,
        schedule_id: Option<Uuid>,
    ) -> Result<Uuid> {
        let client = self.pool.get().await.map_err(AybError::internal)?;
        let row = client
            .query_one(
                "INSERT INTO _ayb_jobs
                    (job_type, payload, state, run_at, attempts, max_attempts,
                     idempotency_key, schedule_id)
                 VALUES ($1, $2, 'queued', $3, 0, $4, $5, $6)
                 ON CONFLICT (job_type, idempotency_key)
                     WHERE idempotency_key IS NOT NULL
                     DO UPDATE SET job_type = EXCLUDED.job_type
                 RETURNING id",
                &[
                    &job_type,
                    &payload,
                    &run_at,
                    &max_attempts,
                    &idempotency_key,
                    &schedule_id,
                ],
            )
            .await
            .map_err(|e| ayb_error::map_pg_error(&e))?;
        Ok(row.get("id"))
    }

    /// Claim up to `limit` due jobs, flipping them to `running` under a lease
    /// that expires after `lease_duration`. Rows locked by another worker's
    /// in-flight claim are skipped, not waited on.
    pub async fn claim(&self, worker_id: &str, limit: i64, lease_duration: Duration) -> Result<Vec<Job>> {
        let mut client = self.pool.get().await.map_err(AybError::internal)?;
        let txn = client.transaction().await.map_err(|e| ayb_error::map_pg_error(&e))?;

        let lease_secs = lease_duration.as_secs_f64();
        let rows = txn
            .query(
                "WITH claimable AS (
                     SELECT id FROM _ayb_jobs
                     WHERE state = 'queued' AND run_at <= now()
                     ORDER BY run_at, id
                     LIMIT $1
                     FOR UPDATE SKIP LOCKED
                 )
                 UPDATE _ayb_jobs
                 SET state = 'running',
                     attempts = attempts + 1,
                     lease_until = now() + make_interval(secs => $2),
                     worker_id = $3,
                     updated_at = now()
                 WHERE id IN (SELECT id FROM claimable)
                 RETURNING id, job_type, payload, state, run_at, lease_until, attempts,
                           max_attempts, last_error, idempotency_key, schedule_id,
                           created_at, updated_at",
                &[&limit, &lease_secs, &worker_id],
            )
            .await
            .map_err(|e| ayb_error::map_pg_error(&e))?;

        txn.commit().await.map_err(|e| ayb_error::map_pg_error(&e))?;

        rows.into_iter().map(row_to_job).collect()
    }

    /// Push a claimed job's lease out further without changing its state —
    /// called periodically by the worker holding it, at roughly half the
    /// lease duration.
    pub async fn renew_lease(&self, job_id: Uuid, lease_duration: Duration) -> Result<()> {
        let client = self.pool.get().await.map_err(AybError::internal)?;
        let lease_secs = lease_duration.as_secs_f64();
        client
            .execute(
                "UPDATE _ayb_jobs
                 SET lease_until = now() + make_interval(secs => $1), updated_at = now()
                 WHERE id = $2 AND state = 'running'",
                &[&lease_secs, &job_id],
            )
            .await
            .map_err(|e| ayb_error::map_pg_error(&e))?;
        Ok(())
    }

    pub async fn mark_succeeded(&self, job_id: Uuid) -> Result<()> {
        let client = self.pool.get().await.map_err(AybError::internal)?;
        client
            .execute(
                "UPDATE _ayb_jobs
                 SET state = 'succeeded', lease_until = NULL, updated_at = now()
                 WHERE id = $1 AND state = 'running'",
                &[&job_id],
            )
            .await
            .map_err(|e| ayb_error::map_pg_error(&e))?;
        Ok(())
    }

    /// Either reschedules the job with a backoff delay (if under
    /// `max_attempts`) or transitions it to `failed` permanently.
    pub async fn mark_failed(&self, job_id: Uuid, error: &str) -> Result<()> {
        let mut client = self.pool.get().await.map_err(AybError::internal)?;
        let txn = client.transaction().await.map_err(|e| ayb_error::map_pg_error(&e))?;

        let row = txn
            .query_opt(
                "SELECT attempts, max_attempts FROM _ayb_jobs WHERE id = $1 FOR UPDATE",
                &[&job_id],
            )
            .await
            .map_err(|e| ayb_error::map_pg_error(&e))?;

        let Some(row) = row else {
            return Ok(());
        };
        let attempts: i32 = row.get("attempts");
        let max_attempts: i32 = row.get("max_attempts");

        if attempts >= max_attempts {
            txn.execute(
                "UPDATE _ayb_jobs
                 SET state = 'failed', last_error = $2, lease_until = NULL, updated_at = now()
                 WHERE id = $1",
                &[&job_id, &error],
            )
            .await
            .map_err(|e| ayb_error::map_pg_error(&e))?;
        } else {
            let delay = backoff(attempts).as_secs_f64();
            txn.execute(
                "UPDATE _ayb_jobs
                 SET state = 'queued', last_error = $2, lease_until = NULL,
                     run_at = now() + make_interval(secs => $3), updated_at = now()
                 WHERE id = $1",
                &[&job_id, &error, &delay],
            )
            .await
            .map_err(|e| ayb_error::map_pg_error(&e))?;
        }

        txn.commit().await.map_err(|e| ayb_error::map_pg_error(&e))?;
        Ok(())
    }

    /// Reset `running` jobs whose lease has expired back to `queued` so
    /// another worker can pick them up — covers workers that crashed or were
    /// killed mid-job.
    pub async fn sweep_expired_leases(&self) -> Result<u64> {
        let client = self.pool.get().await.map_err(AybError::internal)?;
        let n = client
            .execute(
                "UPDATE _ayb_jobs
                 SET state = 'queued', lease_until = NULL, worker_id = NULL, updated_at = now()
                 WHERE state = 'running' AND lease_until < now()",
                &[],
            )
            .await
            .map_err(|e| ayb_error::map_pg_error(&e))?;
        Ok(n)
    }
}

fn row_to_job(row: tokio_postgres::Row) -> Result<Job> {
    let state_str: String = row.get("state");
    let state = JobState::from_db_str(&state_str)
        .ok_or_else(|| AybError::Validation(format!("unknown job state: {state_str}")))?;
    Ok(Job {
        id: row.get("id"),
        job_type: row.get("job_type"),
        payload: row.get("payload"),
        state,
        run_at: row.get("run_at"),
        lease_until: row.get("lease_until"),
        attempts: row.get("attempts"),
        max_attempts: row.get("max_attempts"),
        last_error: row.get("last_error"),
        idempotency_key: row.get("idempotency_key"),
        schedule_id: row.get("schedule_id"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}
