//! Batch statements shared by every SQL backend.
//!
//! Uses a macro to generate implementations for each SQL backend, so the
//! claim protocol's SQL exists once while each backend keeps its own pool
//! type and error classification.

use super::SqlTarget;

/// Macro to implement `BatchStatements` for a specific SQL backend.
///
/// `$map_err` converts a driver error into a `StorageError`; the embedded
/// engine uses it to recognise lock contention.
macro_rules! impl_batch_statements {
    ($db_type:ty, $feature:literal, $map_err:path) => {
        #[cfg(feature = $feature)]
        #[async_trait::async_trait]
        impl crate::storage::BatchStatements for SqlTarget<$db_type> {
            async fn insert(
                &self,
                head: &[u8],
                body: &[u8],
                arrived_at: chrono::DateTime<chrono::Utc>,
            ) -> crate::storage::Result<i64> {
                use sea_query::Query;
                use sqlx::Row;

                use crate::storage::record::format_timestamp;
                use crate::storage::schema::RawRequests;
                use crate::storage::sql::SqlDatabase;

                let stmt = Query::insert()
                    .into_table(self.table())
                    .columns([RawRequests::Head, RawRequests::Data, RawRequests::ArrivedAt])
                    .values_panic([
                        head.to_vec().into(),
                        body.to_vec().into(),
                        format_timestamp(arrived_at).into(),
                    ])
                    .returning_col(RawRequests::Id)
                    .to_owned();

                self.run("insert", || async {
                    let (sql, values) = <$db_type>::build(&stmt);
                    let row = sqlx::query_with(&sql, values)
                        .fetch_one(&self.pool)
                        .await
                        .map_err($map_err)?;
                    row.try_get::<i64, _>(0).map_err($map_err)
                })
                .await
            }

            async fn max_pending_id(&self) -> crate::storage::Result<Option<i64>> {
                use sea_query::{Expr, Query};
                use sqlx::Row;

                use crate::storage::schema::{pending, RawRequests};
                use crate::storage::sql::SqlDatabase;

                let stmt = Query::select()
                    .expr(Expr::col(RawRequests::Id).max())
                    .from(self.table())
                    .cond_where(pending())
                    .to_owned();

                self.run("max_pending_id", || async {
                    let (sql, values) = <$db_type>::build(&stmt);
                    let row = sqlx::query_with(&sql, values)
                        .fetch_one(&self.pool)
                        .await
                        .map_err($map_err)?;
                    row.try_get::<Option<i64>, _>(0).map_err($map_err)
                })
                .await
            }

            async fn tag_pending(&self, watermark: i64) -> crate::storage::Result<u64> {
                use sea_query::{Cond, Expr, Query};

                use crate::storage::schema::{pending, RawRequests};
                use crate::storage::sql::SqlDatabase;

                let stmt = Query::update()
                    .table(self.table())
                    .value(RawRequests::BatchId, watermark)
                    .cond_where(
                        Cond::all()
                            .add(pending())
                            .add(Expr::col(RawRequests::Id).lte(watermark)),
                    )
                    .to_owned();

                self.run("tag_pending", || async {
                    let (sql, values) = <$db_type>::build(&stmt);
                    let result = sqlx::query_with(&sql, values)
                        .execute(&self.pool)
                        .await
                        .map_err($map_err)?;
                    Ok(result.rows_affected())
                })
                .await
            }

            async fn select_batch(
                &self,
                watermark: i64,
            ) -> crate::storage::Result<Vec<crate::storage::Record>> {
                use sea_query::{Expr, Order, Query};
                use sqlx::Row;

                use crate::storage::record::parse_timestamp;
                use crate::storage::schema::RawRequests;
                use crate::storage::sql::SqlDatabase;
                use crate::storage::Record;

                let stmt = Query::select()
                    .columns([
                        RawRequests::Id,
                        RawRequests::Head,
                        RawRequests::Data,
                        RawRequests::ArrivedAt,
                        RawRequests::BatchId,
                    ])
                    .from(self.table())
                    .and_where(Expr::col(RawRequests::BatchId).eq(watermark))
                    .order_by(RawRequests::ArrivedAt, Order::Asc)
                    .order_by(RawRequests::Id, Order::Asc)
                    .to_owned();

                let rows = self
                    .run("select_batch", || async {
                        let (sql, values) = <$db_type>::build(&stmt);
                        sqlx::query_with(&sql, values)
                            .fetch_all(&self.pool)
                            .await
                            .map_err($map_err)
                    })
                    .await?;

                rows.iter()
                    .map(|row| -> crate::storage::Result<Record> {
                        let arrived_at: String = row.try_get("arrived_at").map_err($map_err)?;
                        Ok(Record {
                            id: Some(row.try_get::<i64, _>("id").map_err($map_err)?),
                            head: row.try_get("head").map_err($map_err)?,
                            body: row.try_get("data").map_err($map_err)?,
                            arrived_at: parse_timestamp(&arrived_at)?,
                            batch_id: row.try_get("batch_id").map_err($map_err)?,
                        })
                    })
                    .collect()
            }

            async fn delete_batch(&self, watermark: i64) -> crate::storage::Result<u64> {
                use sea_query::{Expr, Query};

                use crate::storage::schema::RawRequests;
                use crate::storage::sql::SqlDatabase;

                let stmt = Query::delete()
                    .from_table(self.table())
                    .and_where(Expr::col(RawRequests::BatchId).eq(watermark))
                    .to_owned();

                self.run("delete_batch", || async {
                    let (sql, values) = <$db_type>::build(&stmt);
                    let result = sqlx::query_with(&sql, values)
                        .execute(&self.pool)
                        .await
                        .map_err($map_err)?;
                    Ok(result.rows_affected())
                })
                .await
            }

            async fn claimed_watermarks(&self) -> crate::storage::Result<Vec<i64>> {
                use sea_query::{Order, Query};
                use sqlx::Row;

                use crate::storage::schema::{claimed, RawRequests};
                use crate::storage::sql::SqlDatabase;

                let stmt = Query::select()
                    .distinct()
                    .column(RawRequests::BatchId)
                    .from(self.table())
                    .cond_where(claimed())
                    .order_by(RawRequests::BatchId, Order::Asc)
                    .to_owned();

                let rows = self
                    .run("claimed_watermarks", || async {
                        let (sql, values) = <$db_type>::build(&stmt);
                        sqlx::query_with(&sql, values)
                            .fetch_all(&self.pool)
                            .await
                            .map_err($map_err)
                    })
                    .await?;

                rows.iter()
                    .map(|row| row.try_get::<i64, _>(0).map_err($map_err))
                    .collect()
            }
        }
    };
}

// Generate implementations for each SQL backend
impl_batch_statements!(
    super::postgres::Postgres,
    "postgres",
    crate::storage::StorageError::Database
);
impl_batch_statements!(
    super::sqlite::Sqlite,
    "sqlite",
    crate::storage::StorageError::from_sqlite
);
