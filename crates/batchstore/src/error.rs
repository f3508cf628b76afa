//! Batch store error types.

use apiary_primitives::postage::PostageError;
use apiary_storage::StorageError;

/// Errors from batch store operations.
#[derive(Debug, thiserror::Error)]
pub enum BatchStoreError {
    /// Batch not present in the store.
    #[error("batch not found")]
    NotFound,

    /// Malformed persisted record.
    #[error("invalid record: {0}")]
    Invalid(&'static str),

    /// Underlying keyed backend error.
    #[error("storage error: {0}")]
    Storage(StorageError),

    /// A persisted postage record failed to decode.
    #[error("decode error: {0}")]
    Decode(#[from] PostageError),

    /// An injected callback failed.
    #[error("callback error: {0}")]
    Callback(String),
}

impl From<StorageError> for BatchStoreError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound => BatchStoreError::NotFound,
            err => BatchStoreError::Storage(err),
        }
    }
}
