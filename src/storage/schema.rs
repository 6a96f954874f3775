//! Database schema definitions using sea-query.
//!
//! These define the table and column identifiers for type-safe query building.
//! Both backends share one layout; only the DDL differs per engine.

use sea_query::{Cond, Condition, Expr, Iden};

/// Table name holding buffered requests.
pub const TABLE_NAME: &str = "raw_requests";
/// Index over the batch tag. Claim and fetch both filter on it.
pub const BATCH_INDEX_NAME: &str = "raw_requests_batch_id_idx";

/// Buffered requests table schema.
#[derive(Iden)]
pub enum RawRequests {
    #[iden = "raw_requests"]
    Table,
    #[iden = "id"]
    Id,
    #[iden = "head"]
    Head,
    #[iden = "data"]
    Data,
    #[iden = "arrived_at"]
    ArrivedAt,
    #[iden = "batch_id"]
    BatchId,
}

/// Rows not yet claimed into any batch.
///
/// A zero tag counts as unset so tables created with a zero default behave
/// the same as NULL-default ones.
pub fn pending() -> Condition {
    Cond::any()
        .add(Expr::col(RawRequests::BatchId).is_null())
        .add(Expr::col(RawRequests::BatchId).eq(0i64))
}

/// Rows claimed into some batch and not yet finalized.
pub fn claimed() -> Condition {
    Cond::all()
        .add(Expr::col(RawRequests::BatchId).is_not_null())
        .add(Expr::col(RawRequests::BatchId).ne(0i64))
}
