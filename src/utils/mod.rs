//! Shared utilities.
//!
//! Process bootstrap helpers and the lock retry policy.

pub mod bootstrap;
pub mod retry;
