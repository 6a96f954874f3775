//! Schema store.
//!
//! One always-open pool and one schema holding every record. The server
//! serializes writers itself, so statements run without a retry policy.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::PgPool;
use tracing::info;

use crate::config::PostgresConfig;
use crate::storage::protocol::{self, BatchStatements};
use crate::storage::schema::{BATCH_INDEX_NAME, TABLE_NAME};
use crate::storage::sql::postgres::PostgresTarget;
use crate::storage::{BatchStore, Record, Result, StorageError, Watermark};

/// Longest identifier the server keeps without truncation.
const MAX_IDENTIFIER_LEN: usize = 63;

/// PostgreSQL batch store rooted in one schema.
///
/// Watermarks it hands out carry the schema name as their target.
pub struct SchemaStore {
    target: PostgresTarget,
    schema: String,
}

impl SchemaStore {
    /// Connect using the configured URI or connection fields, then ensure the schema.
    pub async fn connect(config: &PostgresConfig) -> Result<Self> {
        let options = connect_options(config)?;
        info!(
            host = %options.get_host(),
            port = options.get_port(),
            schema = %config.schema,
            "Connecting schema store"
        );
        let pool = PgPoolOptions::new().connect_with(options).await?;
        Self::new(pool, &config.schema).await
    }

    /// Wrap an existing pool, creating the schema, table and index if absent.
    pub async fn new(pool: PgPool, schema: &str) -> Result<Self> {
        validate_schema_name(schema)?;
        let store = Self {
            target: PostgresTarget::new(pool).with_schema(schema),
            schema: schema.to_string(),
        };
        store.ensure_schema().await?;
        Ok(store)
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn pool(&self) -> &PgPool {
        self.target.pool()
    }

    async fn ensure_schema(&self) -> Result<()> {
        let pool = self.target.pool();

        let schema_exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM information_schema.schemata WHERE schema_name = $1)",
        )
        .bind(&self.schema)
        .fetch_one(pool)
        .await?;

        if !schema_exists {
            info!(schema = %self.schema, "Creating schema");
            sqlx::query(&format!(r#"CREATE SCHEMA IF NOT EXISTS "{}""#, self.schema))
                .execute(pool)
                .await?;
        }

        let table_exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM information_schema.tables WHERE table_schema = $1 AND table_name = $2)",
        )
        .bind(&self.schema)
        .bind(TABLE_NAME)
        .fetch_one(pool)
        .await?;

        if table_exists {
            return Ok(());
        }

        info!(
            schema = %self.schema,
            table = TABLE_NAME,
            index = BATCH_INDEX_NAME,
            "Initializing schema"
        );

        let create_table = format!(
            r#"
            CREATE TABLE IF NOT EXISTS "{schema}".{table} (
                id BIGSERIAL PRIMARY KEY,
                head BYTEA NOT NULL,
                data BYTEA NOT NULL,
                arrived_at TEXT NOT NULL,
                batch_id BIGINT
            )
            "#,
            schema = self.schema,
            table = TABLE_NAME,
        );
        sqlx::query(&create_table).execute(pool).await?;

        let create_index = format!(
            r#"CREATE INDEX IF NOT EXISTS {index} ON "{schema}".{table} (batch_id)"#,
            index = BATCH_INDEX_NAME,
            schema = self.schema,
            table = TABLE_NAME,
        );
        sqlx::query(&create_index).execute(pool).await?;

        Ok(())
    }

    fn check_target(&self, watermark: &Watermark) -> Result<()> {
        if watermark.target() != self.schema {
            return Err(StorageError::UnknownTarget(watermark.target().to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl BatchStore for SchemaStore {
    async fn write(&self, head: &[u8], body: &[u8], now: DateTime<Utc>) -> Result<i64> {
        self.target.insert(head, body, now).await
    }

    async fn claim_batch(&self) -> Result<Option<Watermark>> {
        let claimed = protocol::claim(&self.target).await?;
        Ok(claimed.map(|id| Watermark::new(id, &self.schema)))
    }

    async fn fetch_batch(&self, watermark: &Watermark) -> Result<Vec<Record>> {
        self.check_target(watermark)?;
        self.target.select_batch(watermark.id()).await
    }

    async fn finalize_batch(&self, watermark: &Watermark) -> Result<()> {
        self.check_target(watermark)?;
        self.target.delete_batch(watermark.id()).await?;
        Ok(())
    }

    async fn claimed_batches(&self) -> Result<Vec<Watermark>> {
        let ids = self.target.claimed_watermarks().await?;
        Ok(ids
            .into_iter()
            .map(|id| Watermark::new(id, &self.schema))
            .collect())
    }
}

fn connect_options(config: &PostgresConfig) -> Result<PgConnectOptions> {
    let mut options = match &config.uri {
        Some(uri) => PgConnectOptions::from_str(uri)?,
        None => PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .database(&config.database),
    };

    if let Some(user) = &config.user {
        options = options.username(user);
    }
    if let Some(password) = &config.password {
        options = options.password(password);
    }
    if let Some(mode) = &config.ssl_mode {
        let mode = PgSslMode::from_str(mode)
            .map_err(|e| StorageError::InvalidConfig(format!("ssl_mode {}: {}", mode, e)))?;
        options = options.ssl_mode(mode);
    }

    Ok(options)
}

/// Schema names are interpolated into DDL, so only plain identifiers pass.
fn validate_schema_name(schema: &str) -> Result<()> {
    let mut chars = schema.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if valid_start && valid_rest && schema.len() <= MAX_IDENTIFIER_LEN {
        Ok(())
    } else {
        Err(StorageError::InvalidConfig(format!(
            "schema must be a plain identifier: {:?}",
            schema
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_names() {
        assert!(validate_schema_name("request_dump").is_ok());
        assert!(validate_schema_name("_private2").is_ok());
        assert!(validate_schema_name("").is_err());
        assert!(validate_schema_name("2fast").is_err());
        assert!(validate_schema_name(r#"x"; DROP TABLE y; --"#).is_err());
        assert!(validate_schema_name(&"a".repeat(64)).is_err());
    }

    #[test]
    fn test_connect_options_from_fields() {
        let config = PostgresConfig {
            host: "db.internal".to_string(),
            port: 6543,
            user: Some("dumper".to_string()),
            ssl_mode: Some("require".to_string()),
            ..PostgresConfig::default()
        };
        let options = connect_options(&config).unwrap();
        assert_eq!(options.get_host(), "db.internal");
        assert_eq!(options.get_port(), 6543);
        assert_eq!(options.get_database(), Some("reqdump"));
        assert_eq!(options.get_username(), "dumper");
    }

    #[test]
    fn test_connect_options_uri_wins() {
        let config = PostgresConfig {
            uri: Some("postgres://u:p@elsewhere:5439/buffer".to_string()),
            host: "ignored".to_string(),
            ..PostgresConfig::default()
        };
        let options = connect_options(&config).unwrap();
        assert_eq!(options.get_host(), "elsewhere");
        assert_eq!(options.get_port(), 5439);
        assert_eq!(options.get_database(), Some("buffer"));
    }

    #[test]
    fn test_bad_ssl_mode_rejected() {
        let config = PostgresConfig {
            ssl_mode: Some("sometimes".to_string()),
            ..PostgresConfig::default()
        };
        assert!(matches!(
            connect_options(&config),
            Err(StorageError::InvalidConfig(_))
        ));
    }
}
