//! PostgreSQL implementation of the batch store.

mod store;

pub use store::SchemaStore;
