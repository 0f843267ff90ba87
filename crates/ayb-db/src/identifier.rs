//! Identifier validation and quoting — every identifier spliced into DDL or
//! a `SET LOCAL ROLE` statement passes through here first, never a raw
//! caller-supplied string.

use ayb_error::AybError;

#[must_use]
pub fn is_valid_identifier(ident: &str) -> bool {
    ayb_schema_like_validate(ident)
}

fn ayb_schema_like_validate(ident: &str) -> bool {
    let mut chars = ident.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    !ident.is_empty() && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') && ident.len() <= 63
}

/// Quote `ident` as a PostgreSQL double-quoted identifier, validating it
/// first so nothing but `[A-Za-z_][A-Za-z0-9_]*` ever reaches this point.
///
/// # Errors
///
/// Returns `400 Validation` if `ident` isn't a safe bare identifier.
pub fn quote_identifier(ident: &str) -> Result<String, AybError> {
    if !is_valid_identifier(ident) {
        return Err(AybError::Validation(format!("invalid identifier: {ident}")));
    }
    Ok(format!("\"{ident}\""))
}

/// Quote a schema-qualified identifier (`schema.table`), validating each
/// component independently.
///
/// # Errors
///
/// Returns `400 Validation` if either component isn't a safe bare identifier.
pub fn quote_qualified(schema: &str, name: &str) -> Result<String, AybError> {
    Ok(format!("{}.{}", quote_identifier(schema)?, quote_identifier(name)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_identifiers_quote_cleanly() {
        assert_eq!(quote_identifier("users").unwrap(), "\"users\"");
        assert_eq!(quote_qualified("public", "users").unwrap(), "\"public\".\"users\"");
    }

    #[test]
    fn invalid_identifiers_are_rejected() {
        assert!(quote_identifier("users; drop table x").is_err());
        assert!(quote_identifier("2users").is_err());
        assert!(quote_identifier("").is_err());
    }
}
