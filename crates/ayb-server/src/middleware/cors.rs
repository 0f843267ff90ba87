//! CORS layer construction.

use tower_http::cors::{Any, CorsLayer};

/// Wide-open CORS for local/dev use (no `cors_allowed_origins` configured).
#[must_use]
pub fn permissive() -> CorsLayer {
    CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
}

/// Restrict to `allowed_origins`, still covering every method this server
/// actually exposes (the REST verbs plus `OPTIONS` for preflight).
#[must_use]
pub fn restricted(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<_> = allowed_origins.iter().filter_map(|o| o.parse().ok()).collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::PATCH,
            axum::http::Method::PUT,
            axum::http::Method::DELETE,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers([axum::http::header::CONTENT_TYPE, axum::http::header::AUTHORIZATION])
}

/// Picks permissive or restricted CORS based on configuration.
#[must_use]
pub fn layer_for(allowed_origins: &[String]) -> CorsLayer {
    if allowed_origins.is_empty() {
        permissive()
    } else {
        restricted(allowed_origins)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_origins_yields_permissive_layer() {
        let _layer = layer_for(&[]);
    }

    #[test]
    fn configured_origins_yield_restricted_layer() {
        let _layer = layer_for(&["https://example.com".to_string()]);
    }
}
