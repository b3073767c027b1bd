//! Store error types.

/// Result alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in the checkpoint and history stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Conditional write lost: another writer advanced the session.
    #[error("checkpoint version conflict for {session_id}: expected {expected}, stored {stored}")]
    VersionConflict {
        /// Session whose write was rejected.
        session_id: String,
        /// Version the caller expected.
        expected: u64,
        /// Version actually stored.
        stored: u64,
    },

    /// No checkpoint exists for the session.
    #[error("session not found: {0}")]
    NotFound(String),

    /// A record with this id already exists (records are insert-once).
    #[error("record already exists: {0}")]
    AlreadyExists(String),

    /// SQLite error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Connection pool error.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// Blob (de)serialization error.
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
