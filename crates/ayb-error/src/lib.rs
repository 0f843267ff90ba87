//! Unified error type and HTTP error envelope for the AYB data-plane engine.
//!
//! Every crate in the workspace that can fail in a way a client should see
//! returns (or converts into) [`AybError`]. The HTTP layer turns it into the
//! JSON envelope described by the wire spec via `IntoResponse`.

mod field;
mod pg;

pub use field::FieldError;
pub use pg::map_pg_error;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::collections::HashMap;

/// The top-level error type returned by AYB's data-plane components.
///
/// Variants map 1:1 onto the status-code taxonomy in the spec's error
/// handling section: validation -> 400, auth -> 401/403, not found -> 404,
/// conflict -> 409, method/media -> 405/415, rate -> 429, fatal -> 500,
/// schema-not-ready -> 503.
#[derive(Debug, thiserror::Error)]
pub enum AybError {
    #[error("{0}")]
    Validation(String),

    #[error("authentication required")]
    Unauthenticated,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    MethodNotAllowed(String),

    #[error("unsupported content type")]
    UnsupportedMedia,

    #[error("rate limit exceeded")]
    RateLimited { retry_after_secs: u64 },

    #[error("schema cache is not ready")]
    SchemaNotReady,

    #[error("internal error")]
    Internal(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl AybError {
    /// Construct a validation error carrying per-field detail, as emitted
    /// for constraint violations (FK, not-null, check) and invalid-input hints.
    pub fn validation_with_fields(
        message: impl Into<String>,
        fields: HashMap<String, FieldError>,
    ) -> ValidationWithFields {
        ValidationWithFields {
            message: message.into(),
            fields,
        }
    }

    pub fn internal(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Internal(Box::new(err))
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            Self::UnsupportedMedia => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::SchemaNotReady => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// A validation error with structured per-field detail, e.g.
/// `{"email": {"code": "invalid_format", "message": "..."}}`.
#[derive(Debug)]
pub struct ValidationWithFields {
    message: String,
    fields: HashMap<String, FieldError>,
}

impl From<ValidationWithFields> for AybError {
    fn from(v: ValidationWithFields) -> Self {
        // The field detail rides along in the envelope via a side channel:
        // handlers that need it call `into_response` on `ValidationWithFields`
        // directly rather than going through `AybError`.
        Self::Validation(v.message)
    }
}

impl IntoResponse for ValidationWithFields {
    fn into_response(self) -> Response {
        let body = ErrorEnvelope {
            code: StatusCode::BAD_REQUEST.as_u16(),
            message: self.message,
            data: if self.fields.is_empty() {
                None
            } else {
                Some(self.fields)
            },
            doc_url: None,
        };
        (StatusCode::BAD_REQUEST, Json(body)).into_response()
    }
}

/// The wire error envelope: `{"code", "message", "data"?, "doc_url"?}`.
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub code: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<HashMap<String, FieldError>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_url: Option<String>,
}

impl IntoResponse for AybError {
    fn into_response(self) -> Response {
        let status = self.status();
        if let Self::Internal(ref source) = self {
            tracing::error!(error = %source, "internal error");
        }
        let retry_after = match &self {
            Self::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        };
        let message = match &self {
            // Internal error messages are never leaked to clients.
            Self::Internal(_) => "internal server error".to_string(),
            other => other.to_string(),
        };
        let body = ErrorEnvelope {
            code: status.as_u16(),
            message,
            data: None,
            doc_url: None,
        };
        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = secs.to_string().parse() {
                response.headers_mut().insert("Retry-After", value);
            }
        }
        response
    }
}

pub type Result<T> = std::result::Result<T, AybError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_taxonomy() {
        assert_eq!(AybError::Validation("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(AybError::Unauthenticated.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AybError::Forbidden("x".into()).status(), StatusCode::FORBIDDEN);
        assert_eq!(AybError::NotFound("x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(AybError::Conflict("x".into()).status(), StatusCode::CONFLICT);
        assert_eq!(
            AybError::MethodNotAllowed("x".into()).status(),
            StatusCode::METHOD_NOT_ALLOWED
        );
        assert_eq!(AybError::UnsupportedMedia.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert_eq!(
            AybError::RateLimited { retry_after_secs: 5 }.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(AybError::SchemaNotReady.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn internal_error_message_is_not_leaked() {
        let err = AybError::internal(std::io::Error::other("disk on fire"));
        assert_eq!(err.to_string(), "internal error");
    }
}
