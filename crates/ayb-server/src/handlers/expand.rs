//! The `expand` engine: batched related-record fetches spliced onto each
//! list/get response under `record.expand.<fieldName>`.
//!
//! Every hop runs on the caller's transaction, so RLS applies to related
//! fetches exactly as it does to the primary query.

use ayb_auth::Claims;
use ayb_db::quote_qualified;
use ayb_error::{AybError, Result};
use ayb_filter::FilterParam;
use ayb_schema::{Relationship, RelationshipKind, Snapshot, Table};
use serde_json::Value;
use std::collections::HashMap;
use tokio_postgres::types::ToSql;
use tokio_postgres::Transaction;

use super::query::{parse_expand_path, MAX_EXPAND_DEPTH};

/// Resolve every `expand` path against `table` and attach results to `items`
/// in place.
pub async fn apply(
    txn: &Transaction<'_>,
    snapshot: &Snapshot,
    table: &Table,
    claims: &Claims,
    raw_paths: &[String],
    items: &mut [Value],
) -> Result<()> {
    if items.is_empty() || raw_paths.is_empty() {
        return Ok(());
    }
    let paths: Vec<Vec<String>> = raw_paths.iter().map(|p| parse_expand_path(p)).filter(|p| !p.is_empty()).collect();
    apply_depth(txn, snapshot, table, claims, &paths, items, 0).await
}

async fn apply_depth(
    txn: &Transaction<'_>,
    snapshot: &Snapshot,
    table: &Table,
    claims: &Claims,
    paths: &[Vec<String>],
    items: &mut [Value],
    depth: usize,
) -> Result<()> {
    if depth >= MAX_EXPAND_DEPTH || items.is_empty() {
        return Ok(());
    }

    let mut heads: HashMap<&str, Vec<&[String]>> = HashMap::new();
    for path in paths {
        if let Some((head, rest)) = path.split_first() {
            heads.entry(head.as_str()).or_default().push(rest);
        }
    }

    for (head, rest_paths) in heads {
        let Some(rel) = table.relationship_for_expand(head) else {
            continue;
        };
        // A forbidden hop is silently skipped, never a 403 — the field is
        // simply absent from the response.
        if !claims.allows_table(&rel.to_table) {
            continue;
        }
        let Some(related) = snapshot.table(&rel.to_schema, &rel.to_table) else {
            continue;
        };

        let mut related_rows = fetch_related_rows(txn, related, rel, items).await?;

        let nested: Vec<Vec<String>> = rest_paths.iter().filter(|p| !p.is_empty()).map(<[String]>::to_vec).collect();
        if !nested.is_empty() && !related_rows.is_empty() {
            Box::pin(apply_depth(txn, snapshot, related, claims, &nested, &mut related_rows, depth + 1)).await?;
        }

        attach(items, rel, &related_rows, head);
    }

    Ok(())
}

/// One batched `SELECT ... WHERE (to_columns) IN (...)` per relationship,
/// covering every row on the page in a single round trip.
async fn fetch_related_rows(txn: &Transaction<'_>, related: &Table, rel: &Relationship, items: &[Value]) -> Result<Vec<Value>> {
    let keys = distinct_keys(items, &rel.from_columns);
    if keys.is_empty() {
        return Ok(Vec::new());
    }

    let qualified = quote_qualified(&related.schema, &related.name)?;
    let mut params: Vec<FilterParam> = Vec::new();
    let mut tuples = Vec::new();
    for key in &keys {
        let mut placeholders = Vec::new();
        for (col, value) in rel.to_columns.iter().zip(key.iter()) {
            let column = related.column(col).ok_or_else(|| {
                AybError::Internal(Box::new(std::io::Error::other(format!(
                    "expand target column '{col}' missing from '{}.{}'",
                    related.schema, related.name
                ))))
            })?;
            params.push(FilterParam(json_to_text(value)));
            placeholders.push(format!("${}::{}", params.len(), column.type_name));
        }
        tuples.push(format!("({})", placeholders.join(", ")));
    }

    let cols_list = rel.to_columns.join(", ");
    let sql = format!(
        "SELECT to_jsonb(sub) AS data FROM (SELECT * FROM {qualified}) sub WHERE ({cols_list}) IN ({})",
        tuples.join(", ")
    );
    let dyn_params: Vec<&(dyn ToSql + Sync)> = params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
    let rows = txn.query(&sql, &dyn_params).await.map_err(|e| ayb_error::map_pg_error(&e))?;
    Ok(rows.iter().map(|r| r.get::<_, Value>("data")).collect())
}

/// Groups `related_rows` by their `to_columns` value and splices the match
/// (or array of matches, for one-to-many) onto each source item under
/// `record.expand.<field_name>`.
fn attach(items: &mut [Value], rel: &Relationship, related_rows: &[Value], field_name: &str) {
    let mut by_key: HashMap<Vec<String>, Vec<Value>> = HashMap::new();
    for row in related_rows {
        let key: Vec<String> = rel.to_columns.iter().map(|c| json_to_text(row.get(c).unwrap_or(&Value::Null))).collect();
        by_key.entry(key).or_default().push(row.clone());
    }

    for item in items.iter_mut() {
        let Some(key) = extract_key(item, &rel.from_columns) else {
            continue;
        };
        if key.iter().any(Value::is_null) {
            continue;
        }
        let text_key: Vec<String> = key.iter().map(json_to_text).collect();
        let Some(matches) = by_key.get(&text_key) else {
            continue;
        };

        let value = match rel.kind {
            RelationshipKind::ManyToOne => matches.first().cloned().unwrap_or(Value::Null),
            RelationshipKind::OneToMany | RelationshipKind::ManyToMany => Value::Array(matches.clone()),
        };

        if let Value::Object(map) = item {
            let expand_entry = map.entry("expand").or_insert_with(|| Value::Object(serde_json::Map::new()));
            if let Value::Object(expand_map) = expand_entry {
                expand_map.insert(field_name.to_string(), value);
            }
        }
    }
}

fn distinct_keys(items: &[Value], columns: &[String]) -> Vec<Vec<Value>> {
    let mut out: Vec<Vec<Value>> = Vec::new();
    for item in items {
        let Some(key) = extract_key(item, columns) else {
            continue;
        };
        if key.iter().any(Value::is_null) {
            continue;
        }
        if !out.contains(&key) {
            out.push(key);
        }
    }
    out
}

fn extract_key(item: &Value, columns: &[String]) -> Option<Vec<Value>> {
    columns.iter().map(|c| item.get(c).cloned()).collect()
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
    fn distinct_keys_drops_nulls_and_duplicates() {
        let items = vec![
            serde_json::json!({"author_id": 1}),
            serde_json::json!({"author_id": 1}),
            serde_json::json!({"author_id": 2}),
            serde_json::json!({"author_id": null}),
        ];
        let keys = distinct_keys(&items, &["author_id".to_string()]);
        assert_eq!(keys.len(), 2);
    }

    #[test]
    fn attach_splices_many_to_one_match_under_expand() {
        let rel = Relationship {
            field_name: "author".into(),
            kind: RelationshipKind::ManyToOne,
            from_columns: vec!["author_id".into()],
            to_columns: vec!["id".into()],
            to_schema: "public".into(),
            to_table: "users".into(),
        };
        let mut items = vec![serde_json::json!({"id": 1, "author_id": 7})];
        let related = vec![serde_json::json!({"id": 7, "name": "jo"})];
        attach(&mut items, &rel, &related, "author");
        assert_eq!(items[0]["expand"]["author"]["name"], "jo");
    }

    #[test]
    fn attach_groups_one_to_many_matches_into_an_array() {
        let rel = Relationship {
            field_name: "posts".into(),
            kind: RelationshipKind::OneToMany,
            from_columns: vec!["id".into()],
            to_columns: vec!["author_id".into()],
            to_schema: "public".into(),
            to_table: "posts".into(),
        };
        let mut items = vec![serde_json::json!({"id": 7})];
        let related = vec![
            serde_json::json!({"id": 1, "author_id": 7}),
            serde_json::json!({"id": 2, "author_id": 7}),
        ];
        attach(&mut items, &rel, &related, "posts");
        assert_eq!(items[0]["expand"]["posts"].as_array().unwrap().len(), 2);
    }
}
