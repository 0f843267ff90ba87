//! The per-event visibility probe: a short RLS-scoped transaction that asks
//! "can this subscriber actually see this row?" before forwarding an event.

use ayb_auth::Claims;
use ayb_db::{quote_qualified, with_rls};
use ayb_error::{AybError, Result};
use ayb_filter::{compile_from, Expr, FilterParam};
use ayb_schema::Table;
use deadpool_postgres::Pool;
use serde_json::Value;
use tokio_postgres::types::ToSql;

/// `SELECT 1 FROM schema.table WHERE pk = $1 [AND pk2 = $2 ...] [AND (filter)]
/// LIMIT 1`, run under the subscriber's claims. `Ok(true)` means the row is
/// visible to `claims` right now.
pub async fn probe_visibility(
    pool: &Pool,
    claims: &Claims,
    role: &str,
    table: &Table,
    pk_values: &[Value],
    filter: Option<&Expr>,
) -> Result<bool> {
    if pk_values.len() != table.primary_key.len() {
        return Err(AybError::Internal(Box::new(std::io::Error::other(
            "primary key arity mismatch in change event",
        ))));
    }

    let qualified = quote_qualified(&table.schema, &table.name)?;
    let mut params: Vec<FilterParam> = Vec::new();
    let mut clauses = Vec::new();

    for (col_name, value) in table.primary_key.iter().zip(pk_values.iter()) {
        let column = table
            .column(col_name)
            .ok_or_else(|| AybError::Internal(Box::new(std::io::Error::other("primary key column missing from table"))))?;
        let idx = params.len() + 1;
        params.push(FilterParam(json_to_text(value)));
        clauses.push(format!("{col_name} = ${idx}::{}", column.type_name));
    }

    if let Some(expr) = filter {
        let (filter_sql, filter_params) = compile_from(expr, table, params.len() + 1)?;
        clauses.push(format!("({filter_sql})"));
        params.extend(filter_params);
    }

    let sql = format!(
        "SELECT 1 FROM {qualified} WHERE {} LIMIT 1",
        clauses.join(" AND ")
    );

    with_rls(pool, claims, role, move |txn| {
        Box::pin(async move {
            let dyn_params: Vec<&(dyn ToSql + Sync)> =
                params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
            let row = txn
                .query_opt(&sql, &dyn_params)
                .await
                .map_err(|e| ayb_error::map_pg_error(&e))?;
            Ok(row.is_some())
        })
    })
    .await
}

fn json_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_to_text_unwraps_strings_without_quotes() {
        assert_eq!(json_to_text(&Value::String("abc".into())), "abc");
        assert_eq!(json_to_text(&Value::Number(42.into())), "42");
        assert_eq!(json_to_text(&Value::Bool(true)), "true");
    }
}
