//! Per-app rate-limit enforcement — runs after [`ayb_auth::auth_middleware`]
//! so `Claims` are already in the request extensions.

use crate::state::AppState;
use ayb_auth::Claims;
use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

pub async fn rate_limit_middleware(State(state): State<AppState>, request: Request<Body>, next: Next) -> Response {
    let Some(claims) = request.extensions().get::<Claims>().cloned() else {
        return next.run(request).await;
    };

    if let Err(err) = state.rate_limiter.check(&claims) {
        return err.into_response();
    }

    next.run(request).await
}
