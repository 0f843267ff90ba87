//! Bind value for a compiled filter parameter.
//!
//! Every literal is bound as text and cast on the SQL side to the target
//! column's declared type (see [`crate::compile`]) — this sidesteps having
//! to pick a concrete `ToSql` impl per Postgres type at compile time while
//! still never inlining a literal into the query string.

use bytes::BytesMut;
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type};

#[derive(Debug, Clone, PartialEq)]
pub struct FilterParam(pub String);

impl ToSql for FilterParam {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        self.0.to_sql(ty, out)
    }

    fn accepts(ty: &Type) -> bool {
        <String as ToSql>::accepts(ty)
    }

    to_sql_checked!();
}
