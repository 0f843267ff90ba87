//! Parses the `filter` query-string expression into parameterized SQL.
//!
//! Known columns only — every literal is bound as a positional parameter,
//! never inlined into the generated SQL.

mod ast;
mod compile;
mod lexer;
mod param;
mod parser;

pub use ast::{CompareOp, Expr, Literal};
pub use compile::{compile, compile_from};
pub use param::FilterParam;
pub use parser::parse;

use ayb_error::Result;
use ayb_schema::Table;

/// Parse and compile a `filter` query-string value against `table` in one
/// step — the path the REST handler actually takes.
pub fn parse_and_compile(input: &str, table: &Table) -> Result<(String, Vec<FilterParam>)> {
    let expr = parse(input)?;
    compile(&expr, table)
}

#[cfg(test)]
mod proptests {
    use super::*;
    use ayb_schema::{Column, TableKind};
    use proptest::prelude::*;

    fn test_table() -> Table {
        Table {
            schema: "public".into(),
            name: "items".into(),
            kind: TableKind::Table,
            columns: vec![Column {
                name: "name".into(),
                position: 1,
                type_name: "text".into(),
                nullable: true,
                is_array: false,
                is_json: false,
                is_enum: false,
                is_primary_key: false,
            }],
            primary_key: Vec::new(),
            relationships: Vec::new(),
        }
    }

    proptest! {
        /// Whatever string a caller supplies as a literal, it must surface
        /// only as a bound parameter value — never spliced into the SQL text.
        #[test]
        fn literal_values_never_appear_in_generated_sql(raw in "[^'\\\\]{0,40}") {
            let table = test_table();
            let input = format!("name = '{}'", raw.replace('\'', "\\'").replace('\\', "\\\\"));
            if let Ok((sql, params)) = parse_and_compile(&input, &table) {
                prop_assert!(!sql.contains(&raw) || raw.is_empty());
                prop_assert_eq!(params.len(), 1);
            }
        }

        #[test]
        fn sql_injection_payloads_are_bound_not_inlined(payload in "[a-zA-Z0-9 ;='\"()-]{0,30}") {
            let table = test_table();
            let escaped = payload.replace('\\', "\\\\").replace('\'', "\\'");
            let input = format!("name = '{escaped}'");
            if let Ok((sql, _params)) = parse_and_compile(&input, &table) {
                prop_assert!(!sql.contains(';'));
                prop_assert!(sql.starts_with("name = $"));
            }
        }
    }
}
