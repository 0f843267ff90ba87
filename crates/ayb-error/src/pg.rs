//! The single `mapPGError` table: turns a `tokio_postgres::Error` into the
//! `AybError` the HTTP layer knows how to render.

use crate::AybError;
use tokio_postgres::error::SqlState;

/// Map a driver-level Postgres error onto the AYB error taxonomy.
///
/// This is the one place SQLSTATEs are interpreted; handlers should never
/// match on `SqlState` themselves.
#[must_use]
pub fn map_pg_error(err: &tokio_postgres::Error) -> AybError {
    let Some(code) = err.code() else {
        return AybError::internal(CloneableError(err.to_string()));
    };

    match *code {
        SqlState::UNIQUE_VIOLATION => {
            AybError::Conflict(format!("unique constraint violation: {}", detail(err)))
        }
        SqlState::FOREIGN_KEY_VIOLATION => {
            AybError::Validation(format!("foreign key constraint violation: {}", detail(err)))
        }
        SqlState::NOT_NULL_VIOLATION => {
            AybError::Validation(format!("not-null constraint violation: {}", detail(err)))
        }
        SqlState::CHECK_VIOLATION => {
            AybError::Validation(format!("check constraint violation: {}", detail(err)))
        }
        SqlState::INVALID_TEXT_REPRESENTATION => AybError::Validation(invalid_input_hint(err)),
        SqlState::INSUFFICIENT_PRIVILEGE => {
            AybError::Forbidden("insufficient privilege — row-level security denied access".into())
        }
        _ => AybError::internal(CloneableError(err.to_string())),
    }
}

fn detail(err: &tokio_postgres::Error) -> String {
    err.as_db_error()
        .map(|e| {
            e.column()
                .map(|c| format!("{c}: {}", e.message()))
                .unwrap_or_else(|| e.message().to_string())
        })
        .unwrap_or_else(|| err.to_string())
}

/// 22P02 carries the target type name in the driver message
/// (`invalid input syntax for type uuid: "..."`); surface a friendly hint
/// for the types AYB's schema cache commonly reflects.
fn invalid_input_hint(err: &tokio_postgres::Error) -> String {
    let message = err
        .as_db_error()
        .map(|e| e.message().to_string())
        .unwrap_or_else(|| err.to_string());

    let lower = message.to_lowercase();
    let hint = if lower.contains("type uuid") {
        Some("expected format: 550e8400-e29b-41d4-a716-446655440000")
    } else if lower.contains("type integer") || lower.contains("type bigint") {
        Some("expected a whole number")
    } else if lower.contains("type numeric") || lower.contains("type double precision") {
        Some("expected a number")
    } else if lower.contains("type boolean") {
        Some("expected true or false")
    } else if lower.contains("type json") || lower.contains("type jsonb") {
        Some("expected valid JSON")
    } else if lower.contains("type date") {
        Some("expected format: YYYY-MM-DD")
    } else if lower.contains("type timestamp") {
        Some("expected an ISO-8601 timestamp")
    } else {
        None
    };

    match hint {
        Some(hint) => format!("invalid value — {hint}"),
        None => format!("invalid value: {message}"),
    }
}

/// `tokio_postgres::Error` isn't `Clone`, and `AybError::internal` needs a
/// boxed `std::error::Error`; this carries just the rendered message across
/// that boundary.
#[derive(Debug)]
struct CloneableError(String);

impl std::fmt::Display for CloneableError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for CloneableError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unrecognised_sqlstate_is_internal() {
        // We can't construct a tokio_postgres::Error with an arbitrary
        // SQLSTATE outside the driver, so this module is otherwise covered
        // by integration tests that run against a real connection.
    }
}
