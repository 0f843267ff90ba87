//! `POST /rpc/{function}` — calls a reflected SQL function by name, matching
//! JSON body keys to parameter names.

use crate::state::AppState;
use ayb_auth::Claims;
use ayb_db::{quote_qualified, with_rls};
use ayb_error::{AybError, Result};
use ayb_filter::FilterParam;
use ayb_schema::ParameterMode;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde_json::Value;
use tokio_postgres::types::ToSql;

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

/// `POST /rpc/{function}`
pub async fn call(
    State(state): State<AppState>,
    Path(function_name): Path<String>,
    Extension(claims): Extension<Claims>,
    Json(body): Json<Value>,
) -> Result<Response> {
    let snapshot = state.schema_cache.get().ok_or(AybError::SchemaNotReady)?;
    let function = snapshot
        .function_by_name(&function_name)
        .ok_or_else(|| AybError::NotFound(format!("unknown function '{function_name}'")))?
        .clone();

    if !function.is_reachable() {
        return Err(AybError::Validation(format!(
            "function '{function_name}' has unnamed parameters and can't be called by name"
        )));
    }

    let args = match body {
        Value::Object(map) => map,
        Value::Null => serde_json::Map::new(),
        _ => return Err(AybError::Validation("request body must be a JSON object of named arguments".into())),
    };

    let mut arg_clauses = Vec::new();
    let mut bind: Vec<Option<FilterParam>> = Vec::new();

    for param in &function.parameters {
        if param.mode == ParameterMode::Out {
            continue;
        }
        let provided = args.get(&param.name);

        if param.mode == ParameterMode::Variadic {
            match provided {
                Some(Value::Array(items)) => {
                    let mut elems = Vec::new();
                    for item in items {
                        bind.push(json_to_bind(item));
                        elems.push(format!("${}::{}", bind.len(), param.type_name));
                    }
                    arg_clauses.push(format!("{} => VARIADIC ARRAY[{}]::{}[]", param.name, elems.join(", "), param.type_name));
                }
                Some(_) => return Err(AybError::Validation(format!("parameter '{}' must be a JSON array", param.name))),
                None => arg_clauses.push(format!("{} => VARIADIC ARRAY[]::{}[]", param.name, param.type_name)),
            }
            continue;
        }

        if provided.is_none() && !param.has_default {
            bind.push(None);
            arg_clauses.push(format!("{} => ${}::{}", param.name, bind.len(), param.type_name));
        } else if let Some(value) = provided {
            bind.push(json_to_bind(value));
            arg_clauses.push(format!("{} => ${}::{}", param.name, bind.len(), param.type_name));
        }
        // else: omitted and has a SQL-side default — leave it out of the call entirely.
    }

    let qualified = quote_qualified(&function.schema, &function.name)?;
    let args_sql = arg_clauses.join(", ");

    let role = state.role_for(&claims).to_string();
    let pool = state.pool.clone();
    let is_void = function.is_void;
    let returns_table_shape = function.returns_table_shape();

    let response = with_rls(&pool, &claims, &role, move |txn| {
        Box::pin(async move {
            let dyn_params: Vec<&(dyn ToSql + Sync)> = bind.iter().map(|p| p as &(dyn ToSql + Sync)).collect();

            if is_void {
                let sql = format!("SELECT {qualified}({args_sql})");
                txn.execute(&sql, &dyn_params).await.map_err(|e| ayb_error::map_pg_error(&e))?;
                return Ok(StatusCode::NO_CONTENT.into_response());
            }

            if returns_table_shape {
                let sql = format!("SELECT to_jsonb(sub) AS data FROM {qualified}({args_sql}) AS sub");
                let rows = txn.query(&sql, &dyn_params).await.map_err(|e| ayb_error::map_pg_error(&e))?;
                let items: Vec<Value> = rows.iter().map(|r| r.get::<_, Value>("data")).collect();
                return Ok(Json(Value::Array(items)).into_response());
            }

            let sql = format!("SELECT to_jsonb({qualified}({args_sql})) AS result");
            let row = txn.query_one(&sql, &dyn_params).await.map_err(|e| ayb_error::map_pg_error(&e))?;
            Ok(Json(row.get::<_, Value>("result")).into_response())
        })
    })
    .await?;

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_to_bind_maps_null_to_none() {
        assert!(json_to_bind(&Value::Null).is_none());
        assert_eq!(json_to_bind(&serde_json::json!(5)).unwrap().0, "5");
        assert_eq!(json_to_bind(&serde_json::json!("hi")).unwrap().0, "hi");
    }
}
