//! Application configuration.
//!
//! Aggregates configuration from all modules into a single Config struct
//! that can be loaded from YAML files or environment variables.

mod storage;

pub use storage::{
    LockRetryConfig, PostgresConfig, Rotation, SqliteConfig, StorageConfig, StorageType,
    DEFAULT_SCHEMA, MEMORY_TARGET,
};

use std::time::Duration;

use serde::Deserialize;

use crate::processor::HttpProcessorConfig;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "REQDUMP_CONFIG";
/// Prefix for configuration environment variables (`REQDUMP__SECTION__KEY`).
pub const CONFIG_ENV_PREFIX: &str = "REQDUMP";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "REQDUMP_LOG";

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Batch scheduler configuration.
    pub scheduler: SchedulerConfig,
    /// Downstream processor configuration.
    pub processor: ProcessorConfig,
}

/// Batch scheduler configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Seconds between claim/fetch/process/finalize cycles.
    pub interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { interval_secs: 10 }
    }
}

impl SchedulerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

/// Processor type discriminator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessorType {
    /// Log every record through tracing.
    #[default]
    Log,
    /// POST records in bulk to an HTTP endpoint.
    Http,
}

/// Processor configuration (discriminated union).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    #[serde(rename = "type")]
    pub processor_type: ProcessorType,
    /// Bulk HTTP forwarder configuration.
    pub http: HttpProcessorConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `config.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    pub fn load(path: Option<&str>) -> Result<Self, Box<dyn std::error::Error>> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        Ok(config)
    }

    /// Create config for testing: in-memory storage, log processor.
    pub fn for_test() -> Self {
        let mut config = Self::default();
        config.storage.sqlite.rotation = Rotation::Memory;
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.scheduler.interval_secs, 10);
        assert_eq!(config.scheduler.interval(), Duration::from_secs(10));
        assert_eq!(config.processor.processor_type, ProcessorType::Log);
        assert_eq!(config.storage.storage_type, StorageType::Sqlite);
    }

    #[test]
    fn test_config_for_test() {
        let config = Config::for_test();
        assert_eq!(config.storage.sqlite.rotation, Rotation::Memory);
    }

    #[test]
    fn test_zero_interval_clamped() {
        let scheduler = SchedulerConfig { interval_secs: 0 };
        assert_eq!(scheduler.interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_load_from_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reqdump.yaml");
        std::fs::write(
            &path,
            "storage:\n  type: postgres\n  postgres:\n    schema: buffered\nscheduler:\n  interval_secs: 3\nprocessor:\n  type: http\n  http:\n    endpoint: https://logs.example.com/bulk\n",
        )
        .unwrap();

        let config = Config::load(path.to_str()).unwrap();
        assert_eq!(config.storage.storage_type, StorageType::Postgres);
        assert_eq!(config.storage.postgres.schema, "buffered");
        assert_eq!(config.scheduler.interval_secs, 3);
        assert_eq!(config.processor.processor_type, ProcessorType::Http);
        assert_eq!(config.processor.http.endpoint, "https://logs.example.com/bulk");
        assert_eq!(config.storage.sqlite.rotation, Rotation::Day);
    }
}
