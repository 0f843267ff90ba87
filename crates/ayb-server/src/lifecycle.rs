//! Process startup and graceful shutdown.
//!
//! One shared pool backs the HTTP server, the realtime listener, the job
//! workers, the scheduler, and the lease sweeper. Shutdown stops them in
//! the order that keeps each layer's invariants intact: scheduler ticks
//! first (stop creating new work), then the claim loop (stop picking up
//! more), then a bounded wait for in-flight handlers, and only then is the
//! pool dropped.

use crate::config::Config;
use crate::state::AppState;
use ayb_auth::{AppRateLimiter, AuthState, SessionJwt, TokenStore};
use ayb_db::{build_pool, PoolSettings};
use ayb_jobs::{HandlerRegistry, JobQueue, Scheduler};
use ayb_migrate::{FileSystemSource, Runner};
use ayb_realtime::{run_listener, Hub};
use ayb_schema::SchemaCache;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

const DEFAULT_MIGRATIONS_DIR: &str = "migrations";

/// Handles to every background task, kept so shutdown can join them.
pub struct Runtime {
    pub state: AppState,
    shutdown_tx: watch::Sender<bool>,
    scheduler_task: Option<JoinHandle<()>>,
    listener_task: Option<JoinHandle<()>>,
    sweeper_task: JoinHandle<()>,
    worker_tasks: Vec<JoinHandle<()>>,
    shutdown_timeout: Duration,
}

impl Runtime {
    /// Build the connection pool, run migrations, load the schema, and
    /// spawn every background task.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool can't be established, migrations fail,
    /// or the initial schema introspection fails.
    pub async fn start(config: Config) -> anyhow::Result<Self> {
        let pool = build_pool(&PoolSettings {
            connection_string: config.database.url.clone(),
            max_size: config.database.pool_max_size,
        })
        .await?;

        if Path::new(DEFAULT_MIGRATIONS_DIR).is_dir() {
            let runner = Runner::new(pool.clone());
            let source = FileSystemSource::new(DEFAULT_MIGRATIONS_DIR);
            let applied = runner.run(&source).await?;
            tracing::info!(count = applied.len(), "migrations applied");
        }

        let schema_cache = Arc::new(SchemaCache::new());
        schema_cache.load(&pool).await?;
        tracing::info!("schema snapshot loaded");

        let auth = AuthState {
            session_jwt: Arc::new(SessionJwt::new(config.auth.session_jwt_secret.as_bytes())),
            token_store: Arc::new(TokenStore::new(pool.clone())),
        };

        let jobs = Arc::new(JobQueue::new(pool.clone()));
        let hub = Arc::new(Hub::new(pool.clone(), schema_cache.clone(), "ayb_authenticated"));

        let state = AppState {
            pool: pool.clone(),
            schema_cache: schema_cache.clone(),
            jobs: jobs.clone(),
            hub: hub.clone(),
            auth,
            rate_limiter: Arc::new(AppRateLimiter::new()),
            config: Arc::new(config.clone()),
            authenticated_role: "ayb_authenticated".to_string(),
            anon_role: "ayb_anon".to_string(),
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let listener_task = {
            let hub = hub.clone();
            let shutdown_rx = shutdown_rx.clone();
            let connection_string = config.database.url.clone();
            Some(tokio::spawn(async move {
                run_listener(connection_string, hub, shutdown_rx).await;
            }))
        };

        let scheduler_task = if config.jobs.scheduler_enabled {
            let scheduler = Scheduler::new(pool.clone(), JobQueue::new(pool.clone()));
            let shutdown_rx = shutdown_rx.clone();
            let tick = Duration::from_secs(config.jobs.scheduler_tick_s);
            Some(tokio::spawn(async move {
                scheduler.run(tick, shutdown_rx).await;
            }))
        } else {
            None
        };

        let sweeper_task = {
            let jobs = jobs.clone();
            let mut shutdown_rx = shutdown_rx.clone();
            let lease_duration = Duration::from_secs(config.jobs.lease_duration_s);
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(lease_duration / 2);
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            if let Err(err) = jobs.sweep_expired_leases().await {
                                tracing::warn!(error = %err, "lease sweep failed");
                            }
                        }
                        _ = shutdown_rx.changed() => {
                            if *shutdown_rx.borrow() {
                                break;
                            }
                        }
                    }
                }
            })
        };

        let mut worker_tasks = Vec::new();
        if config.jobs.enabled {
            let registry = Arc::new(HandlerRegistry::builtin(pool.clone()));
            for worker_idx in 0..config.jobs.worker_concurrency {
                let jobs = jobs.clone();
                let registry = registry.clone();
                let mut shutdown_rx = shutdown_rx.clone();
                let poll_interval = Duration::from_millis(config.jobs.poll_interval_ms);
                let lease_duration = Duration::from_secs(config.jobs.lease_duration_s);
                let worker_id = format!("worker-{worker_idx}");

                let worker_pool = pool.clone();
                worker_tasks.push(tokio::spawn(async move {
                    worker_loop(jobs, registry, worker_pool, worker_id, poll_interval, lease_duration, shutdown_rx).await;
                }));
            }
        }

        Ok(Self {
            state,
            shutdown_tx,
            scheduler_task,
            listener_task,
            sweeper_task,
            worker_tasks,
            shutdown_timeout: Duration::from_secs(config.server.shutdown_timeout_s),
        })
    }

    /// Stop scheduler ticks, then the claim loop, then wait up to the
    /// configured timeout for in-flight handlers before returning — the
    /// caller drops the pool once this resolves.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);

        if let Some(task) = self.scheduler_task {
            let _ = task.await;
        }

        let wait = async {
            for task in self.worker_tasks {
                let _ = task.await;
            }
        };
        if tokio::time::timeout(self.shutdown_timeout, wait).await.is_err() {
            tracing::warn!("job workers did not finish within the shutdown timeout");
        }

        if let Some(task) = self.listener_task {
            let _ = task.await;
        }
        let _ = self.sweeper_task.await;
    }
}

async fn worker_loop(
    jobs: Arc<JobQueue>,
    registry: Arc<HandlerRegistry>,
    pool: deadpool_postgres::Pool,
    worker_id: String,
    poll_interval: Duration,
    lease_duration: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(poll_interval);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                match jobs.claim(&worker_id, 1, lease_duration).await {
                    Ok(claimed) => {
                        for job in claimed {
                            if !registry.is_registered(&job.job_type) {
                                let _ = jobs.mark_failed(job.id, "unknown job type").await;
                                continue;
                            }
                            match registry.dispatch(&job.job_type, &job.payload, &pool).await {
                                Ok(()) => {
                                    let _ = jobs.mark_succeeded(job.id).await;
                                }
                                Err(err) => {
                                    let _ = jobs.mark_failed(job.id, &err.to_string()).await;
                                }
                            }
                        }
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, worker_id = %worker_id, "job claim failed");
                    }
                }
            }
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
}
