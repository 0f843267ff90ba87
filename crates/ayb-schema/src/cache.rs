//! The in-memory, process-local, reloadable schema cache.
//!
//! A [`Snapshot`] is immutable once built. [`SchemaCache::load`] builds a new
//! one from `information_schema`/`pg_catalog` and publishes it atomically via
//! [`arc_swap::ArcSwapOption`] — concurrent readers see either the old or the
//! new snapshot in full, never a partial one.

use crate::introspect;
use crate::model::{Function, Table};
use arc_swap::ArcSwapOption;
use ayb_error::{AybError, Result};
use deadpool_postgres::Pool;
use std::collections::HashMap;
use std::sync::Arc;

/// A fully-built, queryable view of the reflected schema.
#[derive(Debug)]
pub struct Snapshot {
    tables: HashMap<String, Table>,
    functions: HashMap<String, Function>,
}

impl Snapshot {
    fn build(mut tables: Vec<Table>, functions: Vec<Function>) -> Self {
        // Drop relationships whose target table didn't make it into this
        // snapshot — the invariant is that every relationship resolves.
        let keys: std::collections::HashSet<String> = tables.iter().map(Table::key).collect();
        for table in &mut tables {
            table
                .relationships
                .retain(|r| keys.contains(&format!("{}.{}", r.to_schema, r.to_table)));
        }

        Self {
            tables: tables.into_iter().map(|t| (t.key(), t)).collect(),
            functions: functions.into_iter().map(|f| (f.key(), f)).collect(),
        }
    }

    #[must_use]
    pub fn table(&self, schema: &str, name: &str) -> Option<&Table> {
        self.tables.get(&format!("{schema}.{name}"))
    }

    /// Convenience lookup defaulting to the `public` schema, which is how
    /// the REST handler addresses collections by bare name.
    #[must_use]
    pub fn table_by_name(&self, name: &str) -> Option<&Table> {
        self.table("public", name)
    }

    #[must_use]
    pub fn function(&self, schema: &str, name: &str) -> Option<&Function> {
        self.functions.get(&format!("{schema}.{name}"))
    }

    #[must_use]
    pub fn function_by_name(&self, name: &str) -> Option<&Function> {
        self.function("public", name)
    }

    #[must_use]
    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.values()
    }
}

/// Owns the published snapshot pointer. Reloads are serialised by the
/// caller (the admin reload endpoint takes a lock before calling `load`);
/// readers never block.
pub struct SchemaCache {
    current: ArcSwapOption<Snapshot>,
}

impl Default for SchemaCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaCache {
    #[must_use]
    pub fn new() -> Self {
        Self {
            current: ArcSwapOption::from(None),
        }
    }

    /// Rebuild from `information_schema`/`pg_catalog` inside a single read
    /// transaction and publish the result atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the introspection queries fail.
    pub async fn load(&self, pool: &Pool) -> Result<()> {
        let client = pool
            .get()
            .await
            .map_err(|e| AybError::internal(PoolError(e.to_string())))?;
        let tables = introspect::load_tables(&client).await?;
        let functions = introspect::load_functions(&client).await?;
        let snapshot = Snapshot::build(tables, functions);
        tracing::info!(
            tables = snapshot.tables.len(),
            functions = snapshot.functions.len(),
            "schema cache reloaded"
        );
        self.current.store(Some(Arc::new(snapshot)));
        Ok(())
    }

    /// Returns the current snapshot, or `None` if [`Self::load`] has never
    /// succeeded — handlers should map that to 503.
    #[must_use]
    pub fn get(&self) -> Option<Arc<Snapshot>> {
        self.current.load_full()
    }
}

#[derive(Debug)]
struct PoolError(String);

impl std::fmt::Display for PoolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "failed to acquire connection: {}", self.0)
    }
}

impl std::error::Error for PoolError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Column, RelationshipKind, Relationship, TableKind};

    fn simple_table(name: &str, rels: Vec<Relationship>) -> Table {
        Table {
            schema: "public".into(),
            name: name.into(),
            kind: TableKind::Table,
            columns: vec![Column {
                name: "id".into(),
                position: 1,
                type_name: "uuid".into(),
                nullable: false,
                is_array: false,
                is_json: false,
                is_enum: false,
                is_primary_key: true,
            }],
            primary_key: vec!["id".into()],
            relationships: rels,
        }
    }

    #[test]
    fn snapshot_drops_relationships_to_missing_tables() {
        let dangling = Relationship {
            field_name: "owner".into(),
            kind: RelationshipKind::ManyToOne,
            from_columns: vec!["owner_id".into()],
            to_columns: vec!["id".into()],
            to_schema: "public".into(),
            to_table: "ghost".into(),
        };
        let snapshot = Snapshot::build(vec![simple_table("posts", vec![dangling])], vec![]);
        let posts = snapshot.table_by_name("posts").expect("posts present");
        assert!(posts.relationships.is_empty());
    }

    #[test]
    fn snapshot_keeps_relationships_to_present_tables() {
        let rel = Relationship {
            field_name: "author".into(),
            kind: RelationshipKind::ManyToOne,
            from_columns: vec!["author_id".into()],
            to_columns: vec!["id".into()],
            to_schema: "public".into(),
            to_table: "users".into(),
        };
        let snapshot = Snapshot::build(
            vec![simple_table("posts", vec![rel]), simple_table("users", vec![])],
            vec![],
        );
        let posts = snapshot.table_by_name("posts").expect("posts present");
        assert_eq!(posts.relationships.len(), 1);
    }

    #[test]
    fn empty_cache_returns_none() {
        let cache = SchemaCache::new();
        assert!(cache.get().is_none());
    }
}
