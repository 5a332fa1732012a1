//! Catalog errors.

use thiserror::Error;

/// Errors raised by the SQLite catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The database file cannot be opened.
    #[error("catalog unavailable at {path}: {source}")]
    Unavailable {
        path: String,
        #[source]
        source: rusqlite::Error,
    },

    /// A statement or transaction failed (constraint violation, lock, IO).
    #[error("catalog database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A stored value cannot be decoded.
    #[error("invalid value in column '{column}': {value}")]
    InvalidColumn { column: &'static str, value: String },

    #[error("catalog serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A blocking catalog task was cancelled or panicked.
    #[error("catalog task failed: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for CatalogError {
    fn from(e: tokio::task::JoinError) -> Self {
        CatalogError::Task(e.to_string())
    }
}
