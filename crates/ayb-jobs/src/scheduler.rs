//! Cron-driven schedule ticking: turns `Schedule` rows into enqueued jobs.
//!
//! Each tick looks at schedules that are `enabled` and due, computes the
//! next fire time from the cron expression in the schedule's own timezone,
//! and enqueues a job keyed by `(schedule_id, fired_at)` so a tick that
//! double-fires (two scheduler instances, a slow tick) never double-enqueues.

use crate::queue::JobQueue;
use ayb_error::{AybError, Result};
use chrono::Utc;
use chrono_tz::Tz;
use cron::Schedule as CronSchedule;
use deadpool_postgres::Pool;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

pub struct Scheduler {
    pool: Pool,
    queue: JobQueue,
}

struct DueSchedule {
    id: Uuid,
    job_type: String,
    cron_expression: String,
    timezone: String,
    payload: serde_json::Value,
}

impl Scheduler {
    #[must_use]
    pub fn new(pool: Pool, queue: JobQueue) -> Self {
        Self { pool, queue }
    }

    /// Run the tick loop forever at `tick_interval`, until `shutdown` fires.
    pub async fn run(&self, tick_interval: Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(tick_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(err) = self.tick().await {
                        tracing::warn!(error = %err, "scheduler tick failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    /// Fire every schedule that's enabled and due, enqueuing one job each and
    /// advancing `last_run_at`/`next_run_at`.
    pub async fn tick(&self) -> Result<()> {
        let due = self.load_due_schedules().await?;
        for schedule in due {
            if let Err(err) = self.fire(&schedule).await {
                tracing::warn!(schedule_id = %schedule.id, error = %err, "schedule fire failed");
            }
        }
        Ok(())
    }

    async fn load_due_schedules(&self) -> Result<Vec<DueSchedule>> {
        let client = self.pool.get().await.map_err(AybError::internal)?;
        let rows = client
            .query(
                "SELECT id, job_type, cron_expression, timezone, payload
                 FROM _ayb_schedules
                 WHERE enabled = true AND (next_run_at IS NULL OR next_run_at <= now())",
                &[],
            )
            .await
            .map_err(|e| ayb_error::map_pg_error(&e))?;

        Ok(rows
            .into_iter()
            .map(|row| DueSchedule {
                id: row.get("id"),
                job_type: row.get("job_type"),
                cron_expression: row.get("cron_expression"),
                timezone: row.get("timezone"),
                payload: row.get("payload"),
            })
            .collect())
    }

    async fn fire(&self, schedule: &DueSchedule) -> Result<()> {
        let fired_at = Utc::now();
        let next_run_at = compute_next_run(&schedule.cron_expression, &schedule.timezone)?;

        let idempotency_key = format!("{}:{}", schedule.id, fired_at.to_rfc3339());
        self.queue
            .enqueue(
                &schedule.job_type,
                schedule.payload.clone(),
                3,
                fired_at,
                Some(&idempotency_key),
                Some(schedule.id),
            )
            .await?;

        let client = self.pool.get().await.map_err(AybError::internal)?;
        client
            .execute(
                "UPDATE _ayb_schedules
                 SET last_run_at = $2, next_run_at = $3, updated_at = now()
                 WHERE id = $1 AND enabled = true",
                &[&schedule.id, &fired_at, &next_run_at],
            )
            .await
            .map_err(|e| ayb_error::map_pg_error(&e))?;

        Ok(())
    }
}

fn compute_next_run(cron_expression: &str, timezone: &str) -> Result<chrono::DateTime<Utc>> {
    let tz = Tz::from_str(timezone)
        .map_err(|_| AybError::Validation(format!("unknown timezone: {timezone}")))?;
    let schedule = CronSchedule::from_str(cron_expression)
        .map_err(|e| AybError::Validation(format!("invalid cron expression: {e}")))?;

    let now_in_tz = Utc::now().with_timezone(&tz);
    let next = schedule
        .after(&now_in_tz)
        .next()
        .ok_or_else(|| AybError::Validation("cron expression has no future occurrence".into()))?;
    Ok(next.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn computes_next_run_in_utc() {
        let next = compute_next_run("0 0 * * * *", "UTC").unwrap();
        assert!(next > Utc::now());
    }

    #[test]
    fn rejects_unknown_timezone() {
        assert!(compute_next_run("0 0 * * * *", "Not/AZone").is_err());
    }

    #[test]
    fn rejects_invalid_cron_expression() {
        assert!(compute_next_run("not a cron expr", "UTC").is_err());
    }
}
