//! Chunk store error types.

use apiary_storage::StorageError;

/// Errors from chunk store operations.
#[derive(Debug, thiserror::Error)]
pub enum LocalStoreError {
    /// Chunk not present in the store.
    #[error("chunk not found")]
    NotFound,

    /// Malformed input chunk or stamp.
    #[error("invalid input: {0}")]
    Invalid(&'static str),

    /// The stamp's bucket has no free slots left.
    #[error("postage bucket full")]
    BucketFull,

    /// The persisted base address disagrees with the configured one.
    #[error("overlay address changed")]
    OverlayChanged,

    /// The store has been closed.
    #[error("store closed")]
    Closed,

    /// Underlying keyed backend error.
    #[error("storage error: {0}")]
    Storage(StorageError),

    /// An injected callback failed.
    #[error("callback error: {0}")]
    Callback(String),
}

impl From<StorageError> for LocalStoreError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound => LocalStoreError::NotFound,
            StorageError::Closed => LocalStoreError::Closed,
            err => LocalStoreError::Storage(err),
        }
    }
}
