//! Error types for the store and the sync pipeline.
//!
//! Startup and the binary use `anyhow`; the layers below return these typed
//! errors so callers can tell a failed page fetch from a failed write.

use thiserror::Error;

/// Errors raised by the SQLite store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying SQLite failure.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// A unique key was already taken.
    #[error("Conflict: {0}")]
    Conflict(String),
    /// Filesystem failure while preparing the database location.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// A stored value could not be decoded.
    #[error("Invalid stored value: {0}")]
    Corrupt(String),
    /// The blocking worker running the query panicked or was cancelled.
    #[error("Database worker failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl StoreError {
    /// Translate unique-constraint violations into [`StoreError::Conflict`].
    pub(crate) fn from_write(err: rusqlite::Error, what: &str) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(code, _)
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Self::Conflict(format!("{what} already exists"))
            }
            _ => Self::Sqlite(err),
        }
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that end a sync run or fail a page fetch.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The HTTP client could not be constructed.
    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    /// Connection, timeout or body read failure.
    #[error("Request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    /// The API answered with a non-success status.
    #[error("{url} returned HTTP {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
    /// The body was not a valid page document.
    #[error("Could not decode page from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    /// Writing run bookkeeping failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}
