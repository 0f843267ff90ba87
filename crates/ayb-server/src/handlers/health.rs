//! Liveness and readiness probes.

use crate::state::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::json;

/// `GET /health/live` — the process is up and serving requests at all.
pub async fn live() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// `GET /health/ready` — the schema cache is populated and the pool can
/// reach Postgres; 503 otherwise so load balancers stop routing traffic.
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let schema_ready = state.schema_cache.get().is_some();
    let pool_ready = state.pool.get().await.is_ok();

    if schema_ready && pool_ready {
        (StatusCode::OK, Json(json!({ "status": "ok" })))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "unavailable", "schema": schema_ready, "database": pool_ready })),
        )
    }
}
