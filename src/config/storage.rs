//! Storage configuration types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::utils::retry::{DEFAULT_LOCK_ATTEMPTS, DEFAULT_LOCK_DELAY};

/// Storage type discriminator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    /// Rotating-file store on the embedded engine.
    #[default]
    Sqlite,
    /// Schema store on a PostgreSQL server.
    Postgres,
}

/// Storage configuration (discriminated union).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Storage type discriminator.
    #[serde(rename = "type")]
    pub storage_type: StorageType,
    /// SQLite-specific configuration.
    pub sqlite: SqliteConfig,
    /// PostgreSQL-specific configuration.
    pub postgres: PostgresConfig,
}

/// Rotation granularity for the rotating-file store.
///
/// Each bucket label names one database file. `Memory` keeps a single
/// in-memory database for the lifetime of the store and never rotates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rotation {
    #[default]
    Day,
    Hour,
    Minute,
    Memory,
}

/// Label used for the single in-memory target.
pub const MEMORY_TARGET: &str = "memory";

impl Rotation {
    /// Bucket label for `now`, formatted in UTC.
    pub fn label(&self, now: DateTime<Utc>) -> String {
        match self {
            Rotation::Day => now.format("%Y-%m-%dT-UTC").to_string(),
            Rotation::Hour => now.format("%Y-%m-%dT%H-UTC").to_string(),
            Rotation::Minute => now.format("%Y-%m-%dT%H-%M-UTC").to_string(),
            Rotation::Memory => MEMORY_TARGET.to_string(),
        }
    }

    /// Whether the store ever swaps to a new target.
    pub fn rotates(&self) -> bool {
        !matches!(self, Rotation::Memory)
    }
}

impl fmt::Display for Rotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Rotation::Day => "day",
            Rotation::Hour => "hour",
            Rotation::Minute => "minute",
            Rotation::Memory => "memory",
        };
        f.write_str(name)
    }
}

impl FromStr for Rotation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "day" => Ok(Rotation::Day),
            "hour" => Ok(Rotation::Hour),
            "minute" => Ok(Rotation::Minute),
            "memory" => Ok(Rotation::Memory),
            other => Err(format!(
                "rotation must be one of (`day`, `hour`, `minute`, `memory`), not [{}]",
                other
            )),
        }
    }
}

/// SQLite-specific configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SqliteConfig {
    /// Rotation granularity, or `memory` for a non-rotating in-memory store.
    pub rotation: Rotation,
    /// Directory holding one database file per rotation bucket.
    pub path: String,
    /// Lock contention retry policy.
    pub lock_retry: LockRetryConfig,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            rotation: Rotation::Day,
            path: ".".to_string(),
            lock_retry: LockRetryConfig::default(),
        }
    }
}

/// Retry policy applied to every embedded-engine statement.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LockRetryConfig {
    /// Fixed delay between attempts, in milliseconds.
    pub delay_ms: u64,
    /// Attempts (including the first) before giving up with a fatal error.
    pub max_attempts: usize,
}

impl Default for LockRetryConfig {
    fn default() -> Self {
        Self {
            delay_ms: DEFAULT_LOCK_DELAY.as_millis() as u64,
            max_attempts: DEFAULT_LOCK_ATTEMPTS,
        }
    }
}

/// PostgreSQL-specific configuration.
///
/// `uri` wins when set; otherwise the connection is assembled from the
/// individual fields.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PostgresConfig {
    /// Full connection URI.
    pub uri: Option<String>,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: Option<String>,
    pub password: Option<String>,
    /// libpq-style ssl mode (`disable`, `prefer`, `require`, ...).
    pub ssl_mode: Option<String>,
    /// Schema (namespace) holding the `raw_requests` table.
    pub schema: String,
}

/// Default schema name for the schema store.
pub const DEFAULT_SCHEMA: &str = "request_dump";

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            uri: None,
            host: "localhost".to_string(),
            port: 5432,
            database: "reqdump".to_string(),
            user: None,
            password: None,
            ssl_mode: None,
            schema: DEFAULT_SCHEMA.to_string(),
        }
    }
}
