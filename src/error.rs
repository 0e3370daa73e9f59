//! Error types for the search core.

use thiserror::Error;

/// Errors returned by the index, store and engine operations.
#[derive(Debug, Error)]
pub enum SearchError {
    /// Creating tables, triggers or the initial backfill failed.
    #[error("Search setup failed: {0}")]
    SetupFailed(String),

    /// Vector is empty or contains NaN/Inf. Retrying the same vector will fail again.
    #[error("Invalid vector: {0}")]
    InvalidVector(String),

    /// SQLite statement failed.
    #[error("Store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// Connection pool could not be built.
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// No connection could be checked out of the pool.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Configuration values that cannot produce results.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Index bookkeeping in `meta` could not be encoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A sub-search task panicked or was aborted by the runtime.
    #[error("Search task failed: {0}")]
    Task(String),

    /// The query was superseded before both sub-searches completed.
    #[error("Search cancelled")]
    Cancelled,
}

impl SearchError {
    pub fn setup(message: impl Into<String>) -> Self {
        Self::SetupFailed(message.into())
    }

    pub fn invalid_vector(message: impl Into<String>) -> Self {
        Self::InvalidVector(message.into())
    }
}

impl From<tokio::task::JoinError> for SearchError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Task(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SearchError>;
