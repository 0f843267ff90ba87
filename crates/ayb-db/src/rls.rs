//! The row-level-security transaction wrapper.
//!
//! Every request that touches user data runs inside one of these: a fresh
//! transaction that sets the Postgres role and session variables RLS
//! policies key off, runs the caller's body, then commits on success or
//! rolls back on any error — callers never see a half-applied mutation.

use crate::identifier::quote_identifier;
use ayb_auth::Claims;
use ayb_error::{AybError, Result};
use deadpool_postgres::Pool;
use futures::future::BoxFuture;
use tokio_postgres::Transaction;

/// Run `body` inside an RLS-scoped transaction.
///
/// `role` is the Postgres role RLS policies are written against (e.g.
/// `ayb_app`); it is validated and quoted, never interpolated raw.
///
/// # Errors
///
/// Propagates whatever `body` returns, and any error from acquiring a
/// connection, starting the transaction, or committing it.
pub async fn with_rls<T>(
    pool: &Pool,
    claims: &Claims,
    role: &str,
    body: impl for<'t> FnOnce(&'t Transaction<'t>) -> BoxFuture<'t, Result<T>>,
) -> Result<T> {
    let mut client = pool.get().await.map_err(AybError::internal)?;
    let txn = client.transaction().await.map_err(|e| ayb_error::map_pg_error(&e))?;

    set_local_context(&txn, claims, role).await?;

    let result = body(&txn).await;

    match result {
        Ok(value) => {
            txn.commit().await.map_err(|e| ayb_error::map_pg_error(&e))?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = txn.rollback().await {
                tracing::warn!(error = %rollback_err, "rollback failed after request error");
            }
            Err(err)
        }
    }
}

async fn set_local_context(txn: &Transaction<'_>, claims: &Claims, role: &str) -> Result<()> {
    let quoted_role = quote_identifier(role)?;
    txn.execute(&format!("SET LOCAL ROLE {quoted_role}"), &[])
        .await
        .map_err(|e| ayb_error::map_pg_error(&e))?;

    let user_id = claims.user_id.map(|id| id.to_string()).unwrap_or_default();
    txn.execute("SELECT set_config('ayb.user_id', $1, true)", &[&user_id])
        .await
        .map_err(|e| ayb_error::map_pg_error(&e))?;

    let app_id = claims.app_id.map(|id| id.to_string()).unwrap_or_default();
    txn.execute("SELECT set_config('ayb.app_id', $1, true)", &[&app_id])
        .await
        .map_err(|e| ayb_error::map_pg_error(&e))?;

    Ok(())
}
