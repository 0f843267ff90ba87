//! Administrative endpoints, gated on `Claims::is_admin`.

use crate::state::AppState;
use ayb_auth::Claims;
use ayb_error::{AybError, Result};
use axum::extract::State;
use axum::{Extension, Json};
use serde_json::json;

/// `POST /admin/schema/reload` — re-introspects `information_schema` and
/// atomically publishes the new snapshot. Safe to call while requests are
/// in flight; readers keep seeing the previous snapshot until this swap
/// completes.
pub async fn reload_schema(State(state): State<AppState>, Extension(claims): Extension<Claims>) -> Result<Json<serde_json::Value>> {
    if !claims.is_admin {
        return Err(AybError::Forbidden("schema reload requires an admin session".into()));
    }

    state.schema_cache.load(&state.pool).await?;

    let table_count = state.schema_cache.get().map(|s| s.tables().count()).unwrap_or(0);
    Ok(Json(json!({ "status": "reloaded", "tables": table_count })))
}
