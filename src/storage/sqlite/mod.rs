//! SQLite implementation of the batch store.
//!
//! One database file per rotation bucket, or a single in-memory database.

mod rotation;
mod store;

pub use store::RotatingFileStore;
