/// Errors surfaced by the storage layer.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// An underlying SQLite error.
    #[error("storage: SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Serialization or deserialization of a stored record failed.
    #[error("storage: JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A key did not match the expected encoding.
    #[error("storage: malformed key '{key}'")]
    MalformedKey { key: String },

    /// Generic storage error for cases not covered by other variants.
    #[error("storage: {0}")]
    Other(String),
}

/// Convenience `Result` alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
