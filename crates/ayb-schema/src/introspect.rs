//! `information_schema`/`pg_catalog` queries backing [`crate::cache::SchemaCache::load`].

use crate::model::{
    Column, Function, Parameter, ParameterMode, Relationship, RelationshipKind, Table, TableKind,
};
use ayb_error::Result;
use deadpool_postgres::GenericClient;
use std::collections::HashMap;

/// Schemas excluded from reflection — system catalogs and Postgres extensions
/// never carry application tables worth exposing over REST.
const EXCLUDED_SCHEMAS: &[&str] = &["pg_catalog", "information_schema", "pg_toast"];

pub(crate) async fn load_tables(client: &impl GenericClient) -> Result<Vec<Table>> {
    let mut tables = load_relations(client).await?;
    let columns = load_columns(client).await?;
    let primary_keys = load_primary_keys(client).await?;
    let relationships = load_relationships(client).await?;

    for table in &mut tables {
        let key = table.key();
        table.columns = columns.get(&key).cloned().unwrap_or_default();
        table.primary_key = primary_keys.get(&key).cloned().unwrap_or_default();
        for column in &mut table.columns {
            column.is_primary_key = table.primary_key.contains(&column.name);
        }
        table.relationships = relationships.get(&key).cloned().unwrap_or_default();
    }

    Ok(tables)
}

async fn load_relations(client: &impl GenericClient) -> Result<Vec<Table>> {
    let rows = client
        .query(
            "select table_schema, table_name, table_type
             from information_schema.tables
             where table_schema not in ($1, $2, $3)",
            &[&EXCLUDED_SCHEMAS[0], &EXCLUDED_SCHEMAS[1], &EXCLUDED_SCHEMAS[2]],
        )
        .await
        .map_err(|e| ayb_error::map_pg_error(&e))?;

    let matview_rows = client
        .query(
            "select schemaname, matviewname from pg_matviews
             where schemaname not in ($1, $2, $3)",
            &[&EXCLUDED_SCHEMAS[0], &EXCLUDED_SCHEMAS[1], &EXCLUDED_SCHEMAS[2]],
        )
        .await
        .map_err(|e| ayb_error::map_pg_error(&e))?;

    let mut tables: Vec<Table> = rows
        .iter()
        .map(|row| {
            let table_type: String = row.get("table_type");
            let kind = if table_type == "VIEW" {
                TableKind::View
            } else {
                TableKind::Table
            };
            Table {
                schema: row.get("table_schema"),
                name: row.get("table_name"),
                kind,
                columns: Vec::new(),
                primary_key: Vec::new(),
                relationships: Vec::new(),
            }
        })
        .collect();

    for row in &matview_rows {
        tables.push(Table {
            schema: row.get("schemaname"),
            name: row.get("matviewname"),
            kind: TableKind::Matview,
            columns: Vec::new(),
            primary_key: Vec::new(),
            relationships: Vec::new(),
        });
    }

    Ok(tables)
}

async fn load_columns(client: &impl GenericClient) -> Result<HashMap<String, Vec<Column>>> {
    let rows = client
        .query(
            "select table_schema, table_name, column_name, ordinal_position,
                    udt_name, is_nullable, data_type
             from information_schema.columns
             where table_schema not in ($1, $2, $3)
             order by table_schema, table_name, ordinal_position",
            &[&EXCLUDED_SCHEMAS[0], &EXCLUDED_SCHEMAS[1], &EXCLUDED_SCHEMAS[2]],
        )
        .await
        .map_err(|e| ayb_error::map_pg_error(&e))?;

    let enum_types = load_enum_type_names(client).await?;

    let mut by_table: HashMap<String, Vec<Column>> = HashMap::new();
    for row in &rows {
        let schema: String = row.get("table_schema");
        let table: String = row.get("table_name");
        let udt_name: String = row.get("udt_name");
        let data_type: String = row.get("data_type");
        let is_array = data_type == "ARRAY";
        let type_name = udt_name.trim_start_matches('_').to_string();
        let column = Column {
            name: row.get("column_name"),
            position: row.get("ordinal_position"),
            is_json: type_name == "json" || type_name == "jsonb",
            is_enum: enum_types.contains(&type_name),
            type_name,
            nullable: row.get::<_, String>("is_nullable") == "YES",
            is_array,
            is_primary_key: false,
        };
        by_table.entry(format!("{schema}.{table}")).or_default().push(column);
    }
    Ok(by_table)
}

async fn load_enum_type_names(client: &impl GenericClient) -> Result<std::collections::HashSet<String>> {
    let rows = client
        .query(
            "select distinct t.typname
             from pg_type t
             join pg_enum e on e.enumtypid = t.oid",
            &[],
        )
        .await
        .map_err(|e| ayb_error::map_pg_error(&e))?;
    Ok(rows.iter().map(|r| r.get("typname")).collect())
}

async fn load_primary_keys(client: &impl GenericClient) -> Result<HashMap<String, Vec<String>>> {
    let rows = client
        .query(
            "select tc.table_schema, tc.table_name, kcu.column_name, kcu.ordinal_position
             from information_schema.table_constraints tc
             join information_schema.key_column_usage kcu
               on tc.constraint_name = kcu.constraint_name
              and tc.table_schema = kcu.table_schema
             where tc.constraint_type = 'PRIMARY KEY'
             order by tc.table_schema, tc.table_name, kcu.ordinal_position",
            &[],
        )
        .await
        .map_err(|e| ayb_error::map_pg_error(&e))?;

    let mut by_table: HashMap<String, Vec<String>> = HashMap::new();
    for row in &rows {
        let schema: String = row.get("table_schema");
        let table: String = row.get("table_name");
        by_table
            .entry(format!("{schema}.{table}"))
            .or_default()
            .push(row.get("column_name"));
    }
    Ok(by_table)
}

/// Foreign keys drive both the many-to-one side (the table carrying the FK)
/// and the synthesised one-to-many side (the referenced table). Many-to-many
/// is not inferred automatically — AYB doesn't guess join tables, it takes
/// the two many-to-one legs at face value and leaves the app to expand
/// through the join table explicitly.
async fn load_relationships(client: &impl GenericClient) -> Result<HashMap<String, Vec<Relationship>>> {
    let rows = client
        .query(
            "select
                tc.table_schema as from_schema,
                tc.table_name as from_table,
                kcu.column_name as from_column,
                kcu.ordinal_position as position,
                ccu.table_schema as to_schema,
                ccu.table_name as to_table,
                ccu.column_name as to_column
             from information_schema.table_constraints tc
             join information_schema.key_column_usage kcu
               on tc.constraint_name = kcu.constraint_name
              and tc.table_schema = kcu.table_schema
             join information_schema.constraint_column_usage ccu
               on tc.constraint_name = ccu.constraint_name
              and tc.table_schema = ccu.table_schema
             where tc.constraint_type = 'FOREIGN KEY'
             order by tc.table_schema, tc.table_name, tc.constraint_name, kcu.ordinal_position",
            &[],
        )
        .await
        .map_err(|e| ayb_error::map_pg_error(&e))?;

    #[derive(Default)]
    struct Leg {
        from_schema: String,
        from_table: String,
        from_columns: Vec<String>,
        to_schema: String,
        to_table: String,
        to_columns: Vec<String>,
    }

    let mut legs: HashMap<String, Leg> = HashMap::new();
    for row in &rows {
        let from_schema: String = row.get("from_schema");
        let from_table: String = row.get("from_table");
        let from_column: String = row.get("from_column");
        let to_schema: String = row.get("to_schema");
        let to_table: String = row.get("to_table");
        let to_column: String = row.get("to_column");
        // Group by the implicit constraint identity (from table + to table +
        // leg start) since constraint_name alone isn't returned per-row here.
        let key = format!("{from_schema}.{from_table}->{to_schema}.{to_table}:{from_column}");
        let leg = legs.entry(key).or_insert_with(|| Leg {
            from_schema: from_schema.clone(),
            from_table: from_table.clone(),
            to_schema: to_schema.clone(),
            to_table: to_table.clone(),
            ..Leg::default()
        });
        leg.from_columns.push(from_column);
        leg.to_columns.push(to_column);
    }

    let mut by_table: HashMap<String, Vec<Relationship>> = HashMap::new();
    for leg in legs.into_values() {
        let from_key = format!("{}.{}", leg.from_schema, leg.from_table);
        let to_key = format!("{}.{}", leg.to_schema, leg.to_table);

        let field_name = leg
            .from_columns
            .first()
            .map(|c| c.trim_end_matches("_id").to_string())
            .unwrap_or_else(|| leg.to_table.clone());

        by_table.entry(from_key).or_default().push(Relationship {
            field_name: field_name.clone(),
            kind: RelationshipKind::ManyToOne,
            from_columns: leg.from_columns.clone(),
            to_columns: leg.to_columns.clone(),
            to_schema: leg.to_schema.clone(),
            to_table: leg.to_table.clone(),
        });

        by_table.entry(to_key).or_default().push(Relationship {
            field_name: leg.from_table.clone(),
            kind: RelationshipKind::OneToMany,
            from_columns: leg.to_columns,
            to_columns: leg.from_columns,
            to_schema: leg.from_schema,
            to_table: leg.from_table,
        });
    }

    Ok(by_table)
}

pub(crate) async fn load_functions(client: &impl GenericClient) -> Result<Vec<Function>> {
    let rows = client
        .query(
            "select
                r.specific_schema as schema,
                r.routine_name as name,
                r.data_type as return_type,
                r.type_udt_name as return_udt_name
             from information_schema.routines r
             where r.specific_schema not in ($1, $2, $3)
               and r.routine_type = 'FUNCTION'",
            &[&EXCLUDED_SCHEMAS[0], &EXCLUDED_SCHEMAS[1], &EXCLUDED_SCHEMAS[2]],
        )
        .await
        .map_err(|e| ayb_error::map_pg_error(&e))?;

    let param_rows = client
        .query(
            "select specific_schema, specific_name, parameter_name, parameter_mode,
                    udt_name, ordinal_position, parameter_default
             from information_schema.parameters
             where specific_schema not in ($1, $2, $3)
             order by specific_schema, specific_name, ordinal_position",
            &[&EXCLUDED_SCHEMAS[0], &EXCLUDED_SCHEMAS[1], &EXCLUDED_SCHEMAS[2]],
        )
        .await
        .map_err(|e| ayb_error::map_pg_error(&e))?;

    // information_schema.parameters keys on specific_name, which we didn't
    // select for functions above; re-query routines joined to specific_name
    // so both can be correlated.
    let specific_rows = client
        .query(
            "select specific_schema, specific_name, routine_name
             from information_schema.routines
             where specific_schema not in ($1, $2, $3)
               and routine_type = 'FUNCTION'",
            &[&EXCLUDED_SCHEMAS[0], &EXCLUDED_SCHEMAS[1], &EXCLUDED_SCHEMAS[2]],
        )
        .await
        .map_err(|e| ayb_error::map_pg_error(&e))?;

    let mut specific_to_name: HashMap<String, (String, String)> = HashMap::new();
    for row in &specific_rows {
        let specific_schema: String = row.get("specific_schema");
        let specific_name: String = row.get("specific_name");
        let routine_name: String = row.get("routine_name");
        specific_to_name.insert(specific_name, (specific_schema, routine_name));
    }

    let mut params_by_function: HashMap<String, Vec<Parameter>> = HashMap::new();
    for row in &param_rows {
        let specific_name: String = row.get("specific_name");
        let Some((schema, routine_name)) = specific_to_name.get(&specific_name) else {
            continue;
        };
        let key = format!("{schema}.{routine_name}");
        let mode = match row.get::<_, Option<String>>("parameter_mode").as_deref() {
            Some("OUT") => ParameterMode::Out,
            Some("INOUT") => ParameterMode::InOut,
            Some("VARIADIC") => ParameterMode::Variadic,
            _ => ParameterMode::In,
        };
        let parameter = Parameter {
            name: row.get::<_, Option<String>>("parameter_name").unwrap_or_default(),
            type_name: row.get("udt_name"),
            mode,
            has_default: row.get::<_, Option<String>>("parameter_default").is_some(),
            position: row.get("ordinal_position"),
        };
        params_by_function.entry(key).or_default().push(parameter);
    }

    let functions = rows
        .iter()
        .map(|row| {
            let schema: String = row.get("schema");
            let name: String = row.get("name");
            let return_type: String = row.get("return_type");
            let key = format!("{schema}.{name}");
            let parameters = params_by_function.remove(&key).unwrap_or_default();
            let has_out_params = parameters
                .iter()
                .any(|p| matches!(p.mode, ParameterMode::Out | ParameterMode::InOut));
            Function {
                schema,
                name,
                returns_set: return_type == "USER-DEFINED" && row.get::<_, String>("return_udt_name").is_empty(),
                is_void: return_type == "void",
                parameters,
                return_type,
                has_out_params,
            }
        })
        .collect();

    Ok(functions)
}

/// Validates an identifier reflected elsewhere as safe to splice into DDL
/// (matview refresh, migration ledger table names) — reflection never trusts
/// a caller-supplied identifier without running it through this first.
#[must_use]
pub fn is_valid_identifier(ident: &str) -> bool {
    let mut chars = ident.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    !ident.is_empty() && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') && ident.len() <= 63
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_validation() {
        assert!(is_valid_identifier("users"));
        assert!(is_valid_identifier("_private"));
        assert!(is_valid_identifier("user_2"));
        assert!(!is_valid_identifier("2users"));
        assert!(!is_valid_identifier("users; drop table x"));
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier("a-b"));
    }
}
