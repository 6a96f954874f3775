//! Shared storage integration tests.
//!
//! Tests the BatchStore interface against all implementations.
//! Each implementation module imports these test functions and runs them.

pub mod batch_store_tests;
