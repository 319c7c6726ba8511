use thiserror::Error;

/// Errors produced by the store layer.
///
/// The first four variants are the tagged failure classes callers are
/// expected to match on; the rest are implementation plumbing.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Transport-level failure reaching the backing store.
    #[error("Network error: {0}")]
    Network(String),

    /// The caller is not allowed to perform the operation.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// A query expected a row but found none.
    #[error("Record not found")]
    NotFound,

    /// A uniqueness or concurrency constraint was violated.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// SQLite error from the local mirror.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// UUID parsing error.
    #[error("UUID error: {0}")]
    Uuid(#[from] uuid::Error),

    /// Reactions column could not be decoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Chrono parsing error.
    #[error("Timestamp parse error: {0}")]
    ChronoParse(#[from] chrono::ParseError),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
