//! Storage error types.

/// Errors from backend and index operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Key not present in the store.
    #[error("not found")]
    NotFound,

    /// Malformed key or value encountered while decoding.
    #[error("invalid data: {0}")]
    Invalid(&'static str),

    /// Underlying database error.
    #[error("database error: {0}")]
    Database(String),

    /// The store has been closed.
    #[error("store closed")]
    Closed,
}

impl From<redb::DatabaseError> for StorageError {
    fn from(err: redb::DatabaseError) -> Self {
        StorageError::Database(err.to_string())
    }
}

impl From<redb::TransactionError> for StorageError {
    fn from(err: redb::TransactionError) -> Self {
        StorageError::Database(err.to_string())
    }
}

impl From<redb::TableError> for StorageError {
    fn from(err: redb::TableError) -> Self {
        StorageError::Database(err.to_string())
    }
}

impl From<redb::StorageError> for StorageError {
    fn from(err: redb::StorageError) -> Self {
        StorageError::Database(err.to_string())
    }
}

impl From<redb::CommitError> for StorageError {
    fn from(err: redb::CommitError) -> Self {
        StorageError::Database(err.to_string())
    }
}

impl From<redb::CompactionError> for StorageError {
    fn from(err: redb::CompactionError) -> Self {
        StorageError::Database(err.to_string())
    }
}
