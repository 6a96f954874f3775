//! Storage error taxonomy.

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// SQLite primary result code: the database file is locked by another connection.
pub const SQLITE_BUSY: i32 = 5;
/// SQLite primary result code: a table in the database is locked.
pub const SQLITE_LOCKED: i32 = 6;

/// Errors that can occur during storage operations.
///
/// Only [`StorageError::Locked`] is transient. Everything else is fatal for
/// the operation that raised it.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Storage locked (sqlite code {code})")]
    Locked { code: i32 },

    #[error("Lock never cleared: {operation} gave up after {attempts} attempts")]
    LockNeverCleared {
        operation: &'static str,
        attempts: usize,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("Unknown storage target: {0}")]
    UnknownTarget(String),

    #[error("Invalid storage configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Classify an error raised by the embedded engine.
    ///
    /// Busy and locked result codes become [`StorageError::Locked`]; any other
    /// failure is wrapped as a fatal database error.
    pub fn from_sqlite(err: sqlx::Error) -> Self {
        match sqlite_primary_code(&err) {
            Some(code) if code == SQLITE_BUSY || code == SQLITE_LOCKED => {
                StorageError::Locked { code }
            }
            _ => StorageError::Database(err),
        }
    }

    /// Whether the lock retry policy may retry this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Locked { .. })
    }
}

/// Extract the primary result code from an SQLite error.
///
/// sqlx reports the extended code as a decimal string; the low byte is the
/// primary code.
fn sqlite_primary_code(err: &sqlx::Error) -> Option<i32> {
    let code = err.as_database_error()?.code()?;
    code.parse::<i32>().ok().map(|extended| extended & 0xff)
}
