use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

/// Failure talking to an external price or account service
///
/// Always recoverable: the poller keeps the last known value and moves on.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("not configured: {0}")]
    NotConfigured(&'static str),
}

/// Failure of the underlying storage medium
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("corrupt row: {0}")]
    CorruptRow(String),
}

impl StorageError {
    /// True for SQLite BUSY / LOCKED, i.e. lock contention worth retrying later
    pub fn is_transient(&self) -> bool {
        match self {
            StorageError::Database(sqlx::Error::Database(db_err)) => {
                matches!(db_err.code().as_deref(), Some("5") | Some("6"))
            }
            StorageError::Database(sqlx::Error::PoolTimedOut) => true,
            _ => false,
        }
    }
}

/// Malformed query arguments
#[derive(Debug, Error, PartialEq)]
pub enum QueryError {
    #[error("range start {start} is after range end {end}")]
    InvertedRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("bucket width must be positive, got {0}")]
    NonPositiveBucket(chrono::Duration),

    #[error("timestamp {0} is outside the storable range")]
    TimestampOutOfRange(DateTime<Utc>),
}

/// Everything the time-series store can return
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Query(#[from] QueryError),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Storage(StorageError::Database(e))
    }
}
