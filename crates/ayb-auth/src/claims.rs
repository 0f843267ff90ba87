//! Per-request auth claims, attached to the request context by the
//! middleware and consulted by every downstream handler.

use ayb_error::AybError;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    User,
    ApiKey,
    OAuth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiKeyScope {
    ReadOnly,
    ReadWrite,
    /// `*` — unrestricted.
    Wildcard,
}

impl ApiKeyScope {
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "readonly" => Some(Self::ReadOnly),
            "readwrite" => Some(Self::ReadWrite),
            "*" => Some(Self::Wildcard),
            _ => None,
        }
    }

    #[must_use]
    pub fn allows_write(self) -> bool {
        matches!(self, Self::ReadWrite | Self::Wildcard)
    }
}

#[derive(Debug, Clone)]
pub struct Claims {
    pub request_id: Uuid,
    pub session_kind: SessionKind,
    pub user_id: Option<Uuid>,
    pub app_id: Option<Uuid>,
    pub api_key_scope: Option<ApiKeyScope>,
    pub allowed_tables: Vec<String>,
    pub oauth_scopes: Vec<String>,
    pub app_rate_limit_rps: Option<f64>,
    pub app_rate_limit_window_sec: Option<u64>,
    /// Admin-scoped requests bypass the per-app rate limiter entirely.
    pub is_admin: bool,
}

impl Claims {
    #[must_use]
    pub fn anonymous(request_id: Uuid) -> Self {
        Self {
            request_id,
            session_kind: SessionKind::User,
            user_id: None,
            app_id: None,
            api_key_scope: None,
            allowed_tables: Vec::new(),
            oauth_scopes: Vec::new(),
            app_rate_limit_rps: None,
            app_rate_limit_window_sec: None,
            is_admin: false,
        }
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.user_id.is_some()
    }

    /// Denies any scope other than `readwrite`/`*` on state-changing methods.
    ///
    /// # Errors
    ///
    /// Returns `403 Forbidden` when the claims carry a read-only scope.
    pub fn check_write_scope(&self) -> Result<(), AybError> {
        match self.api_key_scope {
            Some(scope) if !scope.allows_write() => Err(AybError::Forbidden(
                "read-only scope does not permit write operations".into(),
            )),
            _ => Ok(()),
        }
    }

    /// Denies access to `table` when `allowedTables` is non-empty and
    /// doesn't name it.
    ///
    /// # Errors
    ///
    /// Returns `403 Forbidden` when `allowed_tables` is restricted and
    /// excludes `table`.
    pub fn check_table_scope(&self, table: &str) -> Result<(), AybError> {
        if self.allowed_tables.is_empty() || self.allowed_tables.iter().any(|t| t == table) {
            Ok(())
        } else {
            Err(AybError::Forbidden(format!(
                "access to table '{table}' is not permitted by this credential"
            )))
        }
    }

    /// `true` if a hop to `table` during expand is permitted — callers treat
    /// a forbidden hop as "silently skip the field", never a 403.
    #[must_use]
    pub fn allows_table(&self, table: &str) -> bool {
        self.allowed_tables.is_empty() || self.allowed_tables.iter().any(|t| t == table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims_with_scope(scope: Option<ApiKeyScope>) -> Claims {
        Claims {
            api_key_scope: scope,
            ..Claims::anonymous(Uuid::nil())
        }
    }

    #[test]
    fn readonly_scope_denies_writes() {
        let claims = claims_with_scope(Some(ApiKeyScope::ReadOnly));
        assert!(claims.check_write_scope().is_err());
    }

    #[test]
    fn readwrite_and_wildcard_scope_allow_writes() {
        assert!(claims_with_scope(Some(ApiKeyScope::ReadWrite)).check_write_scope().is_ok());
        assert!(claims_with_scope(Some(ApiKeyScope::Wildcard)).check_write_scope().is_ok());
    }

    #[test]
    fn no_scope_allows_writes() {
        assert!(claims_with_scope(None).check_write_scope().is_ok());
    }

    #[test]
    fn empty_allowed_tables_permits_everything() {
        let claims = Claims::anonymous(Uuid::nil());
        assert!(claims.check_table_scope("anything").is_ok());
        assert!(claims.allows_table("anything"));
    }

    #[test]
    fn restricted_allowed_tables_denies_others() {
        let claims = Claims {
            allowed_tables: vec!["posts".into()],
            ..Claims::anonymous(Uuid::nil())
        };
        assert!(claims.check_table_scope("posts").is_ok());
        assert!(claims.check_table_scope("users").is_err());
        assert!(!claims.allows_table("users"));
    }
}
