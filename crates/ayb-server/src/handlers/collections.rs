//! `GET/POST/PATCH/DELETE /collections/{name}[/{id}]` and the batch endpoint.

use super::expand;
use super::query::ListParams;
use crate::state::AppState;
use ayb_auth::Claims;
use ayb_db::{quote_qualified, with_rls};
use ayb_error::{AybError, Result};
use ayb_filter::FilterParam;
use ayb_schema::Table;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use tokio_postgres::types::ToSql;
use tokio_postgres::Transaction;

const MAX_BATCH_OPERATIONS: usize = 100;

fn load_table(state: &AppState, name: &str) -> Result<Table> {
    let snapshot = state.schema_cache.get().ok_or(AybError::SchemaNotReady)?;
    snapshot
        .table_by_name(name)
        .cloned()
        .ok_or_else(|| AybError::NotFound(format!("unknown collection '{name}'")))
}

fn require_primary_key(table: &Table) -> Result<()> {
    if table.has_primary_key() {
        Ok(())
    } else {
        Err(AybError::Validation(format!(
            "collection '{}' has no primary key and can't be targeted by id",
            table.name
        )))
    }
}

fn require_writable(table: &Table) -> Result<()> {
    if table.kind.is_writable() {
        Ok(())
    } else {
        Err(AybError::MethodNotAllowed(format!("collection '{}' is read-only", table.name)))
    }
}

/// `1,2` against a two-column primary key → `["1", "2"]`.
fn parse_composite_id(table: &Table, raw_id: &str) -> Result<Vec<String>> {
    let parts: Vec<String> = raw_id.split(',').map(str::trim).map(str::to_string).collect();
    if parts.len() != table.primary_key.len() {
        return Err(AybError::Validation(format!(
            "id has {} component(s), expected {} for this collection's primary key",
            parts.len(),
            table.primary_key.len()
        )));
    }
    Ok(parts)
}

fn is_text_type(type_name: &str) -> bool {
    matches!(type_name, "text" | "varchar" | "bpchar" | "citext")
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

fn json_to_bind(value: &Value) -> Option<FilterParam> {
    if value.is_null() {
        None
    } else {
        Some(FilterParam(json_to_text(value)))
    }
}

fn resolve_fields(table: &Table, fields: Option<&[String]>) -> String {
    match fields {
        Some(requested) => {
            let known: Vec<&str> = requested.iter().filter(|f| table.has_column(f)).map(String::as_str).collect();
            if known.is_empty() {
                "*".to_string()
            } else {
                known.join(", ")
            }
        }
        None => "*".to_string(),
    }
}

fn resolve_sort(table: &Table, sort: &[super::query::SortKey]) -> String {
    sort.iter()
        .filter(|key| table.has_column(&key.column))
        .map(|key| format!("{} {}", key.column, if key.descending { "DESC" } else { "ASC" }))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `GET /collections/{name}`
pub async fn list(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Json<Value>> {
    claims.check_table_scope(&name)?;
    let table = load_table(&state, &name)?;
    let params = ListParams::parse(&query);

    let projected = resolve_fields(&table, params.fields.as_deref());
    let mut where_clauses = Vec::new();
    let mut bind: Vec<FilterParam> = Vec::new();

    if let Some(filter_str) = &params.filter {
        let expr = ayb_filter::parse(filter_str)?;
        let (sql, filter_params) = ayb_filter::compile_from(&expr, &table, bind.len() + 1)?;
        where_clauses.push(sql);
        bind.extend(filter_params);
    }

    let mut order_by = resolve_sort(&table, &params.sort);

    if let Some(search_str) = &params.search {
        let text_columns: Vec<&str> = table.columns.iter().filter(|c| is_text_type(&c.type_name)).map(|c| c.name.as_str()).collect();
        if text_columns.is_empty() {
            return Err(AybError::Validation(format!("collection '{name}' has no text columns to search")));
        }
        let concat_expr = text_columns
            .iter()
            .map(|c| format!("coalesce({c}::text, '')"))
            .collect::<Vec<_>>()
            .join(" || ' ' || ");
        let idx = bind.len() + 1;
        bind.push(FilterParam(search_str.clone()));
        where_clauses.push(format!("to_tsvector('simple', {concat_expr}) @@ plainto_tsquery('simple', ${idx})"));
        if order_by.is_empty() {
            order_by = format!("ts_rank(to_tsvector('simple', {concat_expr}), plainto_tsquery('simple', ${idx})) DESC");
        }
    }

    let where_sql = if where_clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", where_clauses.join(" AND "))
    };
    let order_sql = if order_by.is_empty() { String::new() } else { format!("ORDER BY {order_by}") };

    let qualified = quote_qualified(&table.schema, &table.name)?;
    let limit_idx = bind.len() + 1;
    let offset_idx = bind.len() + 2;
    let select_sql =
        format!("SELECT to_jsonb(sub) AS data FROM (SELECT {projected} FROM {qualified} {where_sql} {order_sql} LIMIT ${limit_idx} OFFSET ${offset_idx}) sub");
    let count_sql = format!("SELECT count(*) AS count FROM {qualified} {where_sql}");

    let per_page = params.per_page;
    let offset = (params.page - 1) * params.per_page;
    let skip_total = params.skip_total;
    let expand_paths = params.expand.clone();

    let role = state.role_for(&claims).to_string();
    let pool = state.pool.clone();
    let schema_cache = state.schema_cache.clone();
    let claims_for_body = claims.clone();
    let name_for_body = name.clone();

    let (items, total_items) = with_rls(&pool, &claims, &role, move |txn| {
        Box::pin(async move {
            let mut dyn_params: Vec<&(dyn ToSql + Sync)> = bind.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
            dyn_params.push(&per_page);
            dyn_params.push(&offset);
            let rows = txn.query(&select_sql, &dyn_params).await.map_err(|e| ayb_error::map_pg_error(&e))?;
            let mut items: Vec<Value> = rows.iter().map(|r| r.get::<_, Value>("data")).collect();

            let total_items = if skip_total {
                -1
            } else {
                let count_params: Vec<&(dyn ToSql + Sync)> = bind.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
                let row = txn.query_one(&count_sql, &count_params).await.map_err(|e| ayb_error::map_pg_error(&e))?;
                row.get::<_, i64>("count")
            };

            if !expand_paths.is_empty() {
                let snapshot = schema_cache.get().ok_or(AybError::SchemaNotReady)?;
                let table = snapshot.table_by_name(&name_for_body).ok_or(AybError::SchemaNotReady)?;
                expand::apply(txn, &snapshot, table, &claims_for_body, &expand_paths, &mut items).await?;
            }

            Ok((items, total_items))
        })
    })
    .await?;

    let total_pages = if total_items < 0 { -1 } else { (total_items + per_page - 1) / per_page.max(1) };

    Ok(Json(serde_json::json!({
        "page": params.page,
        "perPage": per_page,
        "totalItems": total_items,
        "totalPages": total_pages,
        "items": items,
    })))
}

/// `GET /collections/{name}/{id}`
pub async fn get(
    State(state): State<AppState>,
    Path((name, id)): Path<(String, String)>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Json<Value>> {
    claims.check_table_scope(&name)?;
    let table = load_table(&state, &name)?;
    require_primary_key(&table)?;
    let id_values = parse_composite_id(&table, &id)?;
    let expand_paths: Vec<String> = query
        .get("expand")
        .map(|s| s.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect())
        .unwrap_or_default();

    let role = state.role_for(&claims).to_string();
    let pool = state.pool.clone();
    let schema_cache = state.schema_cache.clone();
    let claims_for_body = claims.clone();
    let name_for_body = name.clone();

    let item = with_rls(&pool, &claims, &role, move |txn| {
        Box::pin(async move {
            let mut item = select_one(txn, &table, &id_values).await?;
            if !expand_paths.is_empty() {
                let snapshot = schema_cache.get().ok_or(AybError::SchemaNotReady)?;
                let table2 = snapshot.table_by_name(&name_for_body).ok_or(AybError::SchemaNotReady)?;
                let mut items = [item];
                expand::apply(txn, &snapshot, table2, &claims_for_body, &expand_paths, &mut items).await?;
                item = items.into_iter().next().expect("single element");
            }
            Ok(item)
        })
    })
    .await?;

    Ok(Json(item))
}

/// `POST /collections/{name}`
pub async fn create(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Extension(claims): Extension<Claims>,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<Value>)> {
    claims.check_write_scope()?;
    claims.check_table_scope(&name)?;
    let table = load_table(&state, &name)?;
    require_writable(&table)?;

    let role = state.role_for(&claims).to_string();
    let pool = state.pool.clone();

    let item = with_rls(&pool, &claims, &role, move |txn| Box::pin(async move { insert_row(txn, &table, &body).await })).await?;

    Ok((StatusCode::CREATED, Json(item)))
}

/// `PATCH /collections/{name}/{id}`
pub async fn patch(
    State(state): State<AppState>,
    Path((name, id)): Path<(String, String)>,
    Extension(claims): Extension<Claims>,
    Json(body): Json<Value>,
) -> Result<Json<Value>> {
    claims.check_write_scope()?;
    claims.check_table_scope(&name)?;
    let table = load_table(&state, &name)?;
    require_writable(&table)?;
    require_primary_key(&table)?;
    let id_values = parse_composite_id(&table, &id)?;

    let role = state.role_for(&claims).to_string();
    let pool = state.pool.clone();

    let item = with_rls(&pool, &claims, &role, move |txn| {
        Box::pin(async move { update_row(txn, &table, &id_values, &body).await })
    })
    .await?;

    Ok(Json(item))
}

/// `DELETE /collections/{name}/{id}`
pub async fn delete(
    State(state): State<AppState>,
    Path((name, id)): Path<(String, String)>,
    Extension(claims): Extension<Claims>,
) -> Result<StatusCode> {
    claims.check_write_scope()?;
    claims.check_table_scope(&name)?;
    let table = load_table(&state, &name)?;
    require_writable(&table)?;
    require_primary_key(&table)?;
    let id_values = parse_composite_id(&table, &id)?;

    let role = state.role_for(&claims).to_string();
    let pool = state.pool.clone();

    with_rls(&pool, &claims, &role, move |txn| Box::pin(async move { delete_row(txn, &table, &id_values).await })).await?;

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    operations: Vec<BatchOperation>,
}

#[derive(Debug, Deserialize)]
struct BatchOperation {
    method: BatchMethod,
    id: Option<String>,
    body: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum BatchMethod {
    Create,
    Update,
    Delete,
}

/// `POST /collections/{name}/batch`
pub async fn batch(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Extension(claims): Extension<Claims>,
    Json(request): Json<BatchRequest>,
) -> Result<Json<Value>> {
    claims.check_write_scope()?;
    claims.check_table_scope(&name)?;
    let table = load_table(&state, &name)?;
    require_writable(&table)?;
    require_primary_key(&table)?;

    if request.operations.is_empty() {
        return Err(AybError::Validation("batch requires at least one operation".into()));
    }
    if request.operations.len() > MAX_BATCH_OPERATIONS {
        return Err(AybError::Validation("too many operations".into()));
    }
    for (idx, op) in request.operations.iter().enumerate() {
        validate_batch_operation(idx, op)?;
    }

    let role = state.role_for(&claims).to_string();
    let pool = state.pool.clone();

    let results = with_rls(&pool, &claims, &role, move |txn| {
        Box::pin(async move {
            let mut results = Vec::with_capacity(request.operations.len());
            for (idx, op) in request.operations.iter().enumerate() {
                let outcome = run_batch_operation(txn, &table, op).await.map_err(|e| annotate_index(e, idx))?;
                results.push(outcome);
            }
            Ok(results)
        })
    })
    .await?;

    Ok(Json(serde_json::json!({ "results": results })))
}

fn validate_batch_operation(idx: usize, op: &BatchOperation) -> Result<()> {
    match op.method {
        BatchMethod::Create => match &op.body {
            Some(Value::Object(map)) if !map.is_empty() => Ok(()),
            Some(Value::Object(_)) => Err(AybError::Validation(format!("operation {idx}: empty body"))),
            _ => Err(AybError::Validation(format!("operation {idx}: create requires a body object"))),
        },
        BatchMethod::Update => {
            if op.id.is_none() {
                return Err(AybError::Validation(format!("operation {idx}: update requires an id")));
            }
            match &op.body {
                Some(Value::Object(map)) if !map.is_empty() => Ok(()),
                Some(Value::Object(_)) => Err(AybError::Validation(format!("operation {idx}: empty body"))),
                _ => Err(AybError::Validation(format!("operation {idx}: update requires a body object"))),
            }
        }
        BatchMethod::Delete => {
            if op.id.is_none() {
                Err(AybError::Validation(format!("operation {idx}: delete requires an id")))
            } else {
                Ok(())
            }
        }
    }
}

async fn run_batch_operation(txn: &Transaction<'_>, table: &Table, op: &BatchOperation) -> Result<Value> {
    match op.method {
        BatchMethod::Create => insert_row(txn, table, op.body.as_ref().expect("validated")).await,
        BatchMethod::Update => {
            let id = op.id.as_deref().expect("validated");
            let id_values = parse_composite_id(table, id)?;
            update_row(txn, table, &id_values, op.body.as_ref().expect("validated")).await
        }
        BatchMethod::Delete => {
            let id = op.id.as_deref().expect("validated");
            let id_values = parse_composite_id(table, id)?;
            delete_row(txn, table, &id_values).await?;
            Ok(serde_json::json!({ "deleted": true }))
        }
    }
}

fn annotate_index(err: AybError, idx: usize) -> AybError {
    match err {
        AybError::Validation(m) => AybError::Validation(format!("operation {idx}: {m}")),
        AybError::NotFound(m) => AybError::NotFound(format!("operation {idx}: {m}")),
        AybError::Conflict(m) => AybError::Conflict(format!("operation {idx}: {m}")),
        other => other,
    }
}

async fn select_one(txn: &Transaction<'_>, table: &Table, id_values: &[String]) -> Result<Value> {
    let qualified = quote_qualified(&table.schema, &table.name)?;
    let mut clauses = Vec::new();
    let mut bind: Vec<FilterParam> = Vec::new();
    for (col, value) in table.primary_key.iter().zip(id_values.iter()) {
        let column = table.column(col).expect("primary key column must exist on its own table");
        bind.push(FilterParam(value.clone()));
        clauses.push(format!("{col} = ${}::{}", bind.len(), column.type_name));
    }
    let sql = format!("SELECT to_jsonb(sub) AS data FROM (SELECT * FROM {qualified} WHERE {}) sub", clauses.join(" AND "));
    let dyn_params: Vec<&(dyn ToSql + Sync)> = bind.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
    let row = txn.query_opt(&sql, &dyn_params).await.map_err(|e| ayb_error::map_pg_error(&e))?;
    row.map(|r| r.get::<_, Value>("data"))
        .ok_or_else(|| AybError::NotFound(format!("no such record in '{}'", table.name)))
}

async fn insert_row(txn: &Transaction<'_>, table: &Table, body: &Value) -> Result<Value> {
    let Value::Object(map) = body else {
        return Err(AybError::Validation("request body must be a JSON object".into()));
    };
    if map.is_empty() {
        return Err(AybError::Validation("request body must not be empty".into()));
    }

    let mut columns = Vec::new();
    let mut placeholders = Vec::new();
    let mut bind: Vec<Option<FilterParam>> = Vec::new();
    for (key, value) in map {
        let Some(column) = table.column(key) else { continue };
        columns.push(key.as_str());
        bind.push(json_to_bind(value));
        placeholders.push(format!("${}::{}", bind.len(), column.type_name));
    }
    if columns.is_empty() {
        return Err(AybError::Validation("no recognized columns".into()));
    }

    let qualified = quote_qualified(&table.schema, &table.name)?;
    let sql = format!(
        "INSERT INTO {qualified} AS t ({}) VALUES ({}) RETURNING to_jsonb(t) AS data",
        columns.join(", "),
        placeholders.join(", ")
    );
    let dyn_params: Vec<&(dyn ToSql + Sync)> = bind.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
    let row = txn.query_one(&sql, &dyn_params).await.map_err(|e| ayb_error::map_pg_error(&e))?;
    Ok(row.get::<_, Value>("data"))
}

async fn update_row(txn: &Transaction<'_>, table: &Table, id_values: &[String], body: &Value) -> Result<Value> {
    let Value::Object(map) = body else {
        return Err(AybError::Validation("request body must be a JSON object".into()));
    };
    if map.is_empty() {
        return Err(AybError::Validation("request body must not be empty".into()));
    }

    let mut set_clauses = Vec::new();
    let mut bind: Vec<Option<FilterParam>> = Vec::new();
    for (key, value) in map {
        let Some(column) = table.column(key) else { continue };
        bind.push(json_to_bind(value));
        set_clauses.push(format!("{key} = ${}::{}", bind.len(), column.type_name));
    }
    if set_clauses.is_empty() {
        return Err(AybError::Validation("no recognized columns".into()));
    }

    let mut where_clauses = Vec::new();
    for (col, value) in table.primary_key.iter().zip(id_values.iter()) {
        let column = table.column(col).expect("primary key column must exist on its own table");
        bind.push(Some(FilterParam(value.clone())));
        where_clauses.push(format!("{col} = ${}::{}", bind.len(), column.type_name));
    }

    let qualified = quote_qualified(&table.schema, &table.name)?;
    let sql = format!(
        "UPDATE {qualified} AS t SET {} WHERE {} RETURNING to_jsonb(t) AS data",
        set_clauses.join(", "),
        where_clauses.join(" AND ")
    );
    let dyn_params: Vec<&(dyn ToSql + Sync)> = bind.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
    let row = txn.query_opt(&sql, &dyn_params).await.map_err(|e| ayb_error::map_pg_error(&e))?;
    row.map(|r| r.get::<_, Value>("data"))
        .ok_or_else(|| AybError::NotFound(format!("no such record in '{}'", table.name)))
}

async fn delete_row(txn: &Transaction<'_>, table: &Table, id_values: &[String]) -> Result<()> {
    let qualified = quote_qualified(&table.schema, &table.name)?;
    let mut clauses = Vec::new();
    let mut bind: Vec<FilterParam> = Vec::new();
    for (col, value) in table.primary_key.iter().zip(id_values.iter()) {
        let column = table.column(col).expect("primary key column must exist on its own table");
        bind.push(FilterParam(value.clone()));
        clauses.push(format!("{col} = ${}::{}", bind.len(), column.type_name));
    }
    let sql = format!("DELETE FROM {qualified} WHERE {}", clauses.join(" AND "));
    let dyn_params: Vec<&(dyn ToSql + Sync)> = bind.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
    let affected = txn.execute(&sql, &dyn_params).await.map_err(|e| ayb_error::map_pg_error(&e))?;
    if affected == 0 {
        return Err(AybError::NotFound(format!("no such record in '{}'", table.name)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ayb_schema::{Column, TableKind};

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
                    name: "email".into(),
                    position: 2,
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
    fn composite_id_with_wrong_arity_is_rejected() {
        let table = users_table();
        assert!(parse_composite_id(&table, "1,2").is_err());
        assert_eq!(parse_composite_id(&table, "abc").unwrap(), vec!["abc".to_string()]);
    }

    #[test]
    fn unwritable_collections_are_rejected() {
        let mut table = users_table();
        table.kind = TableKind::View;
        assert!(require_writable(&table).is_err());
    }

    #[test]
    fn tables_without_primary_keys_are_rejected() {
        let mut table = users_table();
        table.primary_key = Vec::new();
        assert!(require_primary_key(&table).is_err());
    }

    #[test]
    fn resolve_fields_falls_back_to_star_when_nothing_recognized() {
        let table = users_table();
        assert_eq!(resolve_fields(&table, Some(&["bogus".to_string()])), "*");
        assert_eq!(resolve_fields(&table, Some(&["email".to_string(), "bogus".to_string()])), "email");
        assert_eq!(resolve_fields(&table, None), "*");
    }

    #[test]
    fn resolve_sort_drops_unknown_columns() {
        let table = users_table();
        let keys = vec![
            super::super::query::SortKey {
                column: "email".into(),
                descending: true,
            },
            super::super::query::SortKey {
                column: "bogus".into(),
                descending: false,
            },
        ];
        assert_eq!(resolve_sort(&table, &keys), "email DESC");
    }

    #[test]
    fn validate_batch_operation_requires_id_for_update_and_delete() {
        assert!(validate_batch_operation(
            0,
            &BatchOperation {
                method: BatchMethod::Update,
                id: None,
                body: Some(serde_json::json!({"email": "a@b.com"})),
            }
        )
        .is_err());
        assert!(validate_batch_operation(
            0,
            &BatchOperation {
                method: BatchMethod::Delete,
                id: None,
                body: None,
            }
        )
        .is_err());
    }
}
