//! The reflected schema model: tables, columns, relationships, functions.
//!
//! These types are plain data — all the invariants that matter (PK columns
//! are a subset of columns, relationship endpoints resolve, key uniqueness)
//! are enforced while a [`crate::cache::Snapshot`] is built, not here.

use serde::Serialize;

/// What kind of relation a [`Table`] reflects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TableKind {
    Table,
    View,
    Matview,
}

impl TableKind {
    /// Views and materialized views are read-only; writes to them fail 405.
    #[must_use]
    pub fn is_writable(self) -> bool {
        matches!(self, Self::Table)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Column {
    pub name: String,
    pub position: i32,
    pub type_name: String,
    pub nullable: bool,
    pub is_array: bool,
    pub is_json: bool,
    pub is_enum: bool,
    pub is_primary_key: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipKind {
    ManyToOne,
    OneToMany,
    ManyToMany,
}

#[derive(Debug, Clone, Serialize)]
pub struct Relationship {
    pub field_name: String,
    pub kind: RelationshipKind,
    pub from_columns: Vec<String>,
    pub to_columns: Vec<String>,
    pub to_schema: String,
    pub to_table: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Table {
    pub schema: String,
    pub name: String,
    pub kind: TableKind,
    pub columns: Vec<Column>,
    pub primary_key: Vec<String>,
    pub relationships: Vec<Relationship>,
}

impl Table {
    /// `schema.name`, the cache's unique key for this table.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    #[must_use]
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// A table without a primary key can't be targeted by single-record
    /// read/update/delete or batch operations.
    #[must_use]
    pub fn has_primary_key(&self) -> bool {
        !self.primary_key.is_empty()
    }

    #[must_use]
    pub fn relationship(&self, field_name: &str) -> Option<&Relationship> {
        self.relationships.iter().find(|r| r.field_name == field_name)
    }

    /// Many-to-one relationships fall back to matching the FK column name
    /// when no relationship matches `field_name` directly. One-to-many never
    /// falls back — the column name on the *other* table is ambiguous.
    #[must_use]
    pub fn relationship_for_expand(&self, field_name: &str) -> Option<&Relationship> {
        if let Some(rel) = self.relationship(field_name) {
            return Some(rel);
        }
        self.relationships
            .iter()
            .find(|r| r.kind == RelationshipKind::ManyToOne && r.from_columns.iter().any(|c| c == field_name))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterMode {
    In,
    Out,
    InOut,
    Variadic,
}

#[derive(Debug, Clone, Serialize)]
pub struct Parameter {
    pub name: String,
    pub type_name: String,
    pub mode: ParameterMode,
    pub has_default: bool,
    pub position: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct Function {
    pub schema: String,
    pub name: String,
    pub parameters: Vec<Parameter>,
    pub return_type: String,
    pub returns_set: bool,
    pub has_out_params: bool,
    pub is_void: bool,
}

impl Function {
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    /// Unnamed parameters make a function unreachable via named-argument RPC.
    #[must_use]
    pub fn is_reachable(&self) -> bool {
        self.parameters.iter().all(|p| !p.name.is_empty())
    }

    #[must_use]
    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// `record`/`SETOF`/OUT-param functions project as rows; everything
    /// else unwraps to a bare scalar in the response.
    #[must_use]
    pub fn returns_table_shape(&self) -> bool {
        self.returns_set || self.has_out_params || self.return_type == "record"
    }
}
