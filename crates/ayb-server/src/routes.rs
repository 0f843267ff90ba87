//! Wires handlers into the route table and layers the middleware stack:
//! CORS and tracing wrap everything, then auth resolves `Claims`, then the
//! per-app rate limiter enforces its budget, then the handler runs.

use crate::handlers::{admin, collections, health, realtime, rpc};
use crate::middleware::{cors_layer_for, rate_limit_middleware};
use crate::state::AppState;
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

#[must_use]
pub fn build(state: AppState) -> Router {
    let protected = Router::new()
        .route("/collections/{name}", get(collections::list).post(collections::create))
        .route("/collections/{name}/{id}", get(collections::get).patch(collections::patch).delete(collections::delete))
        .route("/collections/{name}/batch", post(collections::batch))
        .route("/rpc/{function}", post(rpc::call))
        .route("/realtime", get(realtime::stream))
        .route("/admin/schema/reload", post(admin::reload_schema))
        .layer(from_fn_with_state(state.clone(), rate_limit_middleware))
        .layer(from_fn_with_state(state.auth.clone(), ayb_auth::auth_middleware));

    let health = Router::new().route("/health/live", get(health::live)).route("/health/ready", get(health::ready));

    let cors = cors_layer_for(&state.config.server.cors_allowed_origins);

    Router::new()
        .merge(protected)
        .merge(health)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
