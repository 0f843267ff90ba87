//! Compiles a parsed [`Expr`] into a parameterized SQL fragment against a
//! specific table, validating every column reference along the way.

use crate::ast::{Expr, Literal};
use crate::param::FilterParam;
use ayb_error::AybError;
use ayb_schema::Table;

/// Compile `expr` against `table`, starting parameter numbering at `$1`.
///
/// # Errors
///
/// Returns a `400 Validation` error if `expr` references a column the table
/// doesn't declare, or uses an operator inconsistent with its literal (e.g.
/// `LIKE` against a number).
pub fn compile(expr: &Expr, table: &Table) -> Result<(String, Vec<FilterParam>), AybError> {
    compile_from(expr, table, 1)
}

/// Same as [`compile`], but numbering parameters starting at `start` — for
/// splicing the filter clause after other bound parameters (e.g. RLS
/// predicates) in the same query.
pub fn compile_from(expr: &Expr, table: &Table, start: usize) -> Result<(String, Vec<FilterParam>), AybError> {
    let mut compiler = Compiler {
        table,
        next: start,
        params: Vec::new(),
    };
    let sql = compiler.compile_expr(expr)?;
    Ok((sql, compiler.params))
}

struct Compiler<'a> {
    table: &'a Table,
    next: usize,
    params: Vec<FilterParam>,
}

impl Compiler<'_> {
    fn compile_expr(&mut self, expr: &Expr) -> Result<String, AybError> {
        match expr {
            Expr::And(parts) => self.join(parts, "AND"),
            Expr::Or(parts) => self.join(parts, "OR"),
            Expr::Not(inner) => Ok(format!("NOT ({})", self.compile_expr(inner)?)),
            Expr::Compare { column, op, value } => self.compile_compare(column, *op, value),
            Expr::In { column, values } => self.compile_in(column, values),
        }
    }

    fn join(&mut self, parts: &[Expr], joiner: &str) -> Result<String, AybError> {
        let rendered: Result<Vec<String>, AybError> = parts.iter().map(|p| self.compile_expr(p)).collect();
        Ok(format!("({})", rendered?.join(&format!(" {joiner} "))))
    }

    fn compile_compare(&mut self, column: &str, op: crate::ast::CompareOp, value: &Literal) -> Result<String, AybError> {
        let col = self.resolve_column(column)?;

        if value.is_null() {
            return match op {
                crate::ast::CompareOp::Eq => Ok(format!("{column} IS NULL")),
                crate::ast::CompareOp::Ne => Ok(format!("{column} IS NOT NULL")),
                _ => Err(AybError::Validation(format!(
                    "null can only be compared with '=' or '!=' (column '{column}')"
                ))),
            };
        }

        use crate::ast::CompareOp::{Like, NotLike};
        if matches!(op, Like | NotLike) {
            let Literal::Str(text) = value else {
                return Err(AybError::Validation(format!(
                    "'~'/'!~' require a string literal (column '{column}')"
                )));
            };
            let param = self.bind(text.clone());
            return Ok(format!("{column}::text {} {param}", op.sql_operator()));
        }

        let text = literal_to_text(value);
        let param = self.bind(text);
        Ok(format!("{column} {} {param}::{}", op.sql_operator(), col.type_name))
    }

    fn compile_in(&mut self, column: &str, values: &[Literal]) -> Result<String, AybError> {
        let col = self.resolve_column(column)?;
        let mut placeholders = Vec::with_capacity(values.len());
        for value in values {
            if value.is_null() {
                return Err(AybError::Validation(format!(
                    "IN list may not contain null (column '{column}')"
                )));
            }
            let param = self.bind(literal_to_text(value));
            placeholders.push(format!("{param}::{}", col.type_name));
        }
        Ok(format!("{column} IN ({})", placeholders.join(", ")))
    }

    fn resolve_column(&self, name: &str) -> Result<&ayb_schema::Column, AybError> {
        self.table
            .column(name)
            .ok_or_else(|| AybError::Validation(format!("unknown column: {name}")))
    }

    fn bind(&mut self, text: String) -> String {
        self.params.push(FilterParam(text));
        let placeholder = format!("${}", self.next);
        self.next += 1;
        placeholder
    }
}

fn literal_to_text(value: &Literal) -> String {
    match value {
        Literal::Str(s) => s.clone(),
        Literal::Num(n) => {
            if n.fract() == 0.0 && n.abs() < 1e15 {
                format!("{n:.0}")
            } else {
                n.to_string()
            }
        }
        Literal::Bool(b) => b.to_string(),
        Literal::Null => unreachable!("null is handled before literal_to_text is called"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use ayb_schema::{Column, Table, TableKind};

    fn users_table() -> Table {
        Table {
            schema: "public".into(),
            name: "users".into(),
            kind: TableKind::Table,
            columns: vec![
                Column {
                    name: "id".into(),
                    position: 1,
                    type_name: "uuid".into(),
                    nullable: false,
                    is_array: false,
                    is_json: false,
                    is_enum: false,
                    is_primary_key: true,
                },
                Column {
                    name: "age".into(),
                    position: 2,
                    type_name: "int4".into(),
                    nullable: true,
                    is_array: false,
                    is_json: false,
                    is_enum: false,
                    is_primary_key: false,
                },
                Column {
                    name: "name".into(),
                    position: 3,
                    type_name: "text".into(),
                    nullable: false,
                    is_array: false,
                    is_json: false,
                    is_enum: false,
                    is_primary_key: false,
                },
            ],
            primary_key: vec!["id".into()],
            relationships: Vec::new(),
        }
    }

    #[test]
    fn compiles_simple_comparison_with_cast() {
        let table = users_table();
        let expr = parse("age >= 18").unwrap();
        let (sql, params) = compile(&expr, &table).unwrap();
        assert_eq!(sql, "age >= $1::int4");
        assert_eq!(params, vec![FilterParam("18".into())]);
    }

    #[test]
    fn null_compiles_to_is_null() {
        let table = users_table();
        let expr = parse("age = null").unwrap();
        let (sql, params) = compile(&expr, &table).unwrap();
        assert_eq!(sql, "age IS NULL");
        assert!(params.is_empty());
    }

    #[test]
    fn not_equal_null_compiles_to_is_not_null() {
        let table = users_table();
        let expr = parse("age != null").unwrap();
        let (sql, _) = compile(&expr, &table).unwrap();
        assert_eq!(sql, "age IS NOT NULL");
    }

    #[test]
    fn unknown_column_is_rejected() {
        let table = users_table();
        let expr = parse("nickname = 'bob'").unwrap();
        assert!(compile(&expr, &table).is_err());
    }

    #[test]
    fn in_list_casts_every_element() {
        let table = users_table();
        let expr = parse("age IN (1, 2, 3)").unwrap();
        let (sql, params) = compile(&expr, &table).unwrap();
        assert_eq!(sql, "age IN ($1::int4, $2::int4, $3::int4)");
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn and_or_nesting_compiles_with_parens() {
        let table = users_table();
        let expr = parse("(age >= 18 && age <= 65) || name = 'root'").unwrap();
        let (sql, params) = compile(&expr, &table).unwrap();
        assert_eq!(sql, "((age >= $1::int4 AND age <= $2::int4) OR name = $3::text)");
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn like_requires_string_literal() {
        let table = users_table();
        let expr = parse("age ~ 1").unwrap();
        assert!(compile(&expr, &table).is_err());
    }

    #[test]
    fn like_compiles_without_wildcard_injection() {
        let table = users_table();
        let expr = parse("name ~ '%bob%'").unwrap();
        let (sql, params) = compile(&expr, &table).unwrap();
        assert_eq!(sql, "name::text LIKE $1");
        assert_eq!(params, vec![FilterParam("%bob%".into())]);
    }
}
