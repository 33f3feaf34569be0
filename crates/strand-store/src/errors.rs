//! Error types for the event cache.
//!
//! [`StoreError`] is returned by every store operation. Duplicate events are
//! not errors: they are absorbed by merge-by-presence in the store layer.

use thiserror::Error;

/// Errors that can occur during event cache operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// `SQLite` database error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Connection pool error.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// JSON serialization/deserialization error.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Schema migration failed.
    #[error("migration error: {message}")]
    Migration {
        /// Describes which migration failed and why.
        message: String,
    },

    /// A stored row could not be decoded.
    #[error("corrupt row in events.{column}: {detail}")]
    CorruptRow {
        /// Column that failed to decode.
        column: &'static str,
        /// Decoder message.
        detail: String,
    },

    /// An incoming event could not be normalized into a record.
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    /// Filesystem error while preparing the database location.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience type alias for store results.
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_error_display() {
        let err = StoreError::Sqlite(rusqlite::Error::QueryReturnedNoRows);
        assert!(err.to_string().contains("sqlite error"));
    }

    #[test]
    fn migration_error_display() {
        let err = StoreError::Migration {
            message: "v002 failed: duplicate column".into(),
        };
        assert_eq!(err.to_string(), "migration error: v002 failed: duplicate column");
    }

    #[test]
    fn corrupt_row_display() {
        let err = StoreError::CorruptRow {
            column: "content",
            detail: "expected value".into(),
        };
        assert_eq!(err.to_string(), "corrupt row in events.content: expected value");
    }

    #[test]
    fn from_serde_error() {
        let serde_err = serde_json::from_str::<String>("bad").unwrap_err();
        let err: StoreError = serde_err.into();
        assert!(matches!(err, StoreError::Serde(_)));
    }
}
