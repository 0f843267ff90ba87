//! Axum middleware that inspects `Authorization` and attaches [`Claims`] to
//! the request extensions — downstream handlers never parse the header
//! themselves.

use crate::claims::Claims;
use crate::jwt::SessionJwt;
use crate::tokens::TokenStore;
use ayb_error::AybError;
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, Request};
use axum::middleware::Next;
use axum::response::Response;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone)]
pub struct AuthState {
    pub session_jwt: Arc<SessionJwt>,
    pub token_store: Arc<TokenStore>,
}

/// Parses `Authorization: Bearer <...>` into [`Claims`] and inserts them
/// into the request extensions, dispatching on the token's prefix:
/// opaque OAuth access tokens as `ayb_at_<hex>`, API keys as `ayb_<hex>`,
/// everything else as a session JWT.
pub async fn auth_middleware(State(state): State<AuthState>, mut request: Request<Body>, next: Next) -> Response {
    let request_id = Uuid::new_v4();

    let claims = match extract_bearer(&request) {
        None => Claims::anonymous(request_id),
        Some(token) if token.starts_with("ayb_at_") => {
            match state.token_store.lookup_oauth_token(&token[7..], request_id).await {
                Ok(claims) => claims,
                Err(err) => return err.into_response_with(request_id),
            }
        }
        Some(token) if token.starts_with("ayb_") => {
            match state.token_store.lookup_api_key(&token[4..], request_id).await {
                Ok(claims) => claims,
                Err(err) => return err.into_response_with(request_id),
            }
        }
        Some(token) => match state.session_jwt.verify(&token, request_id) {
            Ok(claims) => claims,
            Err(err) => return err.into_response_with(request_id),
        },
    };

    request.extensions_mut().insert(claims);
    next.run(request).await
}

fn extract_bearer(request: &Request<Body>) -> Option<String> {
    let header_value = request.headers().get(header::AUTHORIZATION)?.to_str().ok()?;
    header_value.strip_prefix("Bearer ").map(str::to_string)
}

trait IntoResponseWithRequestId {
    fn into_response_with(self, request_id: Uuid) -> Response;
}

impl IntoResponseWithRequestId for AybError {
    fn into_response_with(self, request_id: Uuid) -> Response {
        use axum::response::IntoResponse;
        tracing::debug!(%request_id, "authentication failed");
        self.into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body as AxumBody;
    use axum::http::Request as HttpRequest;

    #[test]
    fn extracts_bearer_token() {
        let request = HttpRequest::builder()
            .header(header::AUTHORIZATION, "Bearer ayb_abcdef")
            .body(AxumBody::empty())
            .unwrap();
        assert_eq!(extract_bearer(&request), Some("ayb_abcdef".to_string()));
    }

    #[test]
    fn missing_header_yields_none() {
        let request = HttpRequest::builder().body(AxumBody::empty()).unwrap();
        assert_eq!(extract_bearer(&request), None);
    }

    #[test]
    fn non_bearer_scheme_yields_none() {
        let request = HttpRequest::builder()
            .header(header::AUTHORIZATION, "Basic dXNlcjpwYXNz")
            .body(AxumBody::empty())
            .unwrap();
        assert_eq!(extract_bearer(&request), None);
    }
}
