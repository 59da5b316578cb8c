/// Errors that can occur within the storage layer.
///
/// Validation failures (an unrecognized `op_type`) are not errors: they are
/// reported as [`WriteOutcome::Rejected`](crate::WriteOutcome::Rejected).
/// An attribute that was never written is `Ok(None)`, never an error.
///
/// # Examples
///
/// ```rust
/// use vigil_storage::error::StorageError;
///
/// let err = StorageError::UnknownBackend("mongo".to_string());
/// assert!(err.to_string().contains("mongo"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The `database` config key is unset or names no registered engine.
    #[error("Storage: '{0}' is not a valid database type")]
    UnknownBackend(String),

    /// The engine could not be reached or opened.
    #[error("Storage: {backend} backend unavailable: {reason}")]
    Unavailable { backend: String, reason: String },

    /// The backend answered but refused the request.
    #[error("Storage: backend rejected request (status {status}): {body}")]
    Rejected { status: u16, body: String },

    /// Transport-level HTTP failure.
    #[error("Storage: HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// An underlying SQLite error.
    #[error("Storage: SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON serialization or deserialization failure.
    #[error("Storage: JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Storage: I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A series or attribute name that cannot be embedded in a query.
    #[error("Storage: invalid identifier '{0}'")]
    InvalidIdentifier(String),

    /// The backend returned a payload of an unexpected shape.
    #[error("Storage: malformed response: {0}")]
    Malformed(String),
}

/// Convenience `Result` alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
