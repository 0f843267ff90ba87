//! Connection pooling and the RLS transaction wrapper shared by every
//! data-touching component.

mod identifier;
mod pool;
mod rls;

pub use identifier::{is_valid_identifier, quote_identifier, quote_qualified};
pub use pool::{build_pool, PoolSettings};
pub use rls::with_rls;

pub use deadpool_postgres::Pool;
pub use tokio_postgres::Transaction;
