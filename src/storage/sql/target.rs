//! One live storage target: a pool plus the table it addresses.

use std::future::Future;
use std::marker::PhantomData;

use sea_query::{Alias, IntoTableRef, TableRef};

use super::SqlDatabase;
use crate::storage::schema::RawRequests;
use crate::storage::Result;
use crate::utils::retry::LockRetry;

/// SQL-backed storage target.
///
/// This generic type works with any SQL database that implements the
/// `SqlDatabase` trait. When a [`LockRetry`] is attached, every statement
/// runs under it; otherwise statements run exactly once.
pub struct SqlTarget<DB: SqlDatabase> {
    pub(crate) pool: DB::Pool,
    schema: Option<String>,
    retry: Option<LockRetry>,
    _marker: PhantomData<DB>,
}

impl<DB: SqlDatabase> SqlTarget<DB> {
    /// Create a target over the unqualified `raw_requests` table.
    pub fn new(pool: DB::Pool) -> Self {
        Self {
            pool,
            schema: None,
            retry: None,
            _marker: PhantomData,
        }
    }

    /// Address `raw_requests` inside the given schema.
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Wrap every statement in the lock retry policy.
    pub fn with_retry(mut self, retry: LockRetry) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Get the underlying pool.
    pub fn pool(&self) -> &DB::Pool {
        &self.pool
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    pub(crate) fn table(&self) -> TableRef {
        match &self.schema {
            Some(schema) => (Alias::new(schema.as_str()), RawRequests::Table).into_table_ref(),
            None => RawRequests::Table.into_table_ref(),
        }
    }

    pub(crate) async fn run<T, F, Fut>(&self, operation: &'static str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match &self.retry {
            Some(retry) => retry.run(operation, op).await,
            None => op().await,
        }
    }
}
