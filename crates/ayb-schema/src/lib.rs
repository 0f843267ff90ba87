//! Schema reflection and the hot-reloadable snapshot cache.
//!
//! Reflection is read-only: AYB discovers what PostgreSQL already has
//! (tables, views, materialized views, columns, primary keys, foreign-key
//! relationships, callable functions) rather than owning a schema DSL.

mod cache;
mod introspect;
mod model;

pub use cache::{SchemaCache, Snapshot};
pub use introspect::is_valid_identifier;
pub use model::{
    Column, Function, Parameter, ParameterMode, Relationship, RelationshipKind, Table, TableKind,
};
