//! Unified SQL storage implementation.
//!
//! The batch statements are written once against sea-query and stamped out
//! per backend (PostgreSQL, SQLite) through the `SqlDatabase` trait.

mod query;
mod statements;
mod target;

pub use query::SqlDatabase;
pub use target::SqlTarget;

#[cfg(feature = "postgres")]
pub mod postgres {
    //! PostgreSQL database backend.

    use sea_query::PostgresQueryBuilder;
    use sea_query_binder::{SqlxBinder, SqlxValues};
    use sqlx::PgPool;

    /// PostgreSQL database marker type.
    pub struct Postgres;

    impl super::SqlDatabase for Postgres {
        type Pool = PgPool;

        fn build<S: SqlxBinder>(stmt: &S) -> (String, SqlxValues) {
            stmt.build_sqlx(PostgresQueryBuilder)
        }
    }

    /// PostgreSQL storage target.
    pub type PostgresTarget = super::SqlTarget<Postgres>;
}

#[cfg(feature = "sqlite")]
pub mod sqlite {
    //! SQLite database backend.

    use sea_query::SqliteQueryBuilder;
    use sea_query_binder::{SqlxBinder, SqlxValues};
    use sqlx::SqlitePool;

    /// SQLite database marker type.
    pub struct Sqlite;

    impl super::SqlDatabase for Sqlite {
        type Pool = SqlitePool;

        fn build<S: SqlxBinder>(stmt: &S) -> (String, SqlxValues) {
            stmt.build_sqlx(SqliteQueryBuilder)
        }
    }

    /// SQLite storage target.
    pub type SqliteTarget = super::SqlTarget<Sqlite>;
}
