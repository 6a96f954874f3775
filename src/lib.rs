//! reqdump - durable request buffer
//!
//! Captured HTTP requests are written to a relational store as they arrive.
//! A scheduler periodically claims every pending record into a batch, hands
//! the batch to a processor, and removes it once the processor succeeds.

pub mod capture;
pub mod config;
pub mod processor;
pub mod scheduler;
pub mod storage;
pub mod utils;
