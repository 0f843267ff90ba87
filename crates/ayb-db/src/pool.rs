//! Connection pool construction.

use ayb_error::{AybError, Result};
use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime};
use tokio_postgres::NoTls;

/// Settings for building the shared Postgres pool — mirrors `[database]` in
/// the server config.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub connection_string: String,
    pub max_size: usize,
}

/// Build the pool and verify connectivity with a trivial round trip.
///
/// # Errors
///
/// Returns an internal error if the pool can't be built or the database is
/// unreachable.
pub async fn build_pool(settings: &PoolSettings) -> Result<Pool> {
    let mut cfg = Config::new();
    cfg.url = Some(settings.connection_string.clone());
    cfg.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });
    cfg.pool = Some(deadpool_postgres::PoolConfig::new(settings.max_size));

    let pool = cfg
        .create_pool(Some(Runtime::Tokio1), NoTls)
        .map_err(AybError::internal)?;

    let client = pool.get().await.map_err(AybError::internal)?;
    client.query("SELECT 1", &[]).await.map_err(|e| ayb_error::map_pg_error(&e))?;

    Ok(pool)
}
