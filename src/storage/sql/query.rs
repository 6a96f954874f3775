//! SQL database abstraction trait.

use sea_query_binder::{SqlxBinder, SqlxValues};

/// Trait for SQL database backends.
///
/// This trait abstracts over different SQL databases (PostgreSQL, SQLite)
/// by providing the pool type and the query builder used to render
/// statements with bound parameters.
pub trait SqlDatabase: Send + Sync + 'static {
    /// The connection pool type for this database.
    type Pool: Clone + Send + Sync;

    /// Render a sea-query statement to SQL plus its bound values.
    fn build<S: SqlxBinder>(stmt: &S) -> (String, SqlxValues);
}
