//! Keyed backend contract and typed index abstraction.
//!
//! This crate provides the storage substrate for the chunk store:
//! - [`KeyStore`] - ordered key/value backend trait with atomic batch writes
//! - [`MemoryStore`] - BTreeMap-backed implementation for tests and tooling
//! - [`RedbStore`] - redb-based persistent implementation
//! - [`Index`] - typed index over the backend, parameterised by
//!   encode/decode functions over [`Item`]
//! - [`U64Field`] / [`U64Vector`] - persisted scalar counters
//!
//! # Architecture
//!
//! ```text
//! DB (chunk store)
//! ├── Index (retrieval, access, push, pull, gc, postage…)
//! │     └── KeyStore (shared backend)
//! └── U64Field / U64Vector (sizes, per-bin counters)
//!       └── KeyStore (same backend)
//! ```
//!
//! All mutations of one logical operation are collected into a single
//! [`WriteBatch`] and committed atomically.

mod error;
mod fields;
mod index;
mod memory;
mod redb_store;

pub use error::StorageError;
pub use fields::{BytesField, U64Field, U64Vector};
pub use index::{Index, IndexFuncs, Item, IterateOptions};
pub use memory::MemoryStore;
pub use redb_store::RedbStore;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// A single operation inside a [`WriteBatch`].
#[derive(Debug, Clone)]
enum BatchOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

/// An ordered collection of writes applied atomically by
/// [`KeyStore::write_batch`].
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    /// Creates an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a put of `key` to `value`.
    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.ops.push(BatchOp::Put { key, value });
    }

    /// Queues a deletion of `key`.
    pub fn delete(&mut self, key: Vec<u8>) {
        self.ops.push(BatchOp::Delete { key });
    }

    /// Returns the number of queued operations.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether the batch holds no operations.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }
}

/// Ordered key/value backend trait.
///
/// Implementations must be thread-safe and iterate keys in lexicographic
/// order. [`KeyStore::write_batch`] applies all queued operations
/// atomically: either every operation is visible or none is.
pub trait KeyStore: Send + Sync {
    /// Get the value stored under `key`.
    ///
    /// Returns [`StorageError::NotFound`] if the key is absent.
    fn get(&self, key: &[u8]) -> StorageResult<Vec<u8>>;

    /// Check whether `key` is present.
    fn has(&self, key: &[u8]) -> StorageResult<bool>;

    /// Store `value` under `key`, overwriting any previous value.
    fn put(&self, key: &[u8], value: &[u8]) -> StorageResult<()>;

    /// Remove `key`. Removing an absent key is not an error.
    fn delete(&self, key: &[u8]) -> StorageResult<()>;

    /// Iterate entries with keys `>= start` in lexicographic order.
    ///
    /// The callback returns `true` to stop iteration early.
    fn iterate(
        &self,
        start: &[u8],
        cb: &mut dyn FnMut(&[u8], &[u8]) -> StorageResult<bool>,
    ) -> StorageResult<()>;

    /// Apply all operations in `batch` atomically.
    fn write_batch(&self, batch: WriteBatch) -> StorageResult<()>;

    /// Reclaim space from deleted entries, when the backend supports it.
    fn compact(&self) -> StorageResult<()> {
        Ok(())
    }

    /// Release backend resources. Operations after close fail with
    /// [`StorageError::Closed`].
    fn close(&self) -> StorageResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn stores() -> (Vec<(&'static str, Arc<dyn KeyStore>)>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let redb = RedbStore::open(dir.path().join("test.redb")).unwrap();
        (vec![("memory", Arc::new(MemoryStore::new())), ("redb", Arc::new(redb))], dir)
    }

    #[test]
    fn test_put_get_delete() {
        let (stores, _dir) = stores();
        for (name, store) in stores {
            store.put(b"alpha", b"1").unwrap();
            assert_eq!(store.get(b"alpha").unwrap(), b"1", "{name}");
            assert!(store.has(b"alpha").unwrap(), "{name}");

            store.delete(b"alpha").unwrap();
            assert!(matches!(store.get(b"alpha"), Err(StorageError::NotFound)), "{name}");
            // deleting again is not an error
            store.delete(b"alpha").unwrap();
        }
    }

    #[test]
    fn test_iterate_is_ordered() {
        let (stores, _dir) = stores();
        for (name, store) in stores {
            for key in [b"b".to_vec(), b"a".to_vec(), b"c".to_vec()] {
                store.put(&key, b"v").unwrap();
            }
            let mut seen = Vec::new();
            store
                .iterate(b"", &mut |key, _| {
                    seen.push(key.to_vec());
                    Ok(false)
                })
                .unwrap();
            assert_eq!(seen, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()], "{name}");
        }
    }

    #[test]
    fn test_iterate_start_and_stop() {
        let (stores, _dir) = stores();
        for (name, store) in stores {
            for key in [&b"a"[..], b"b", b"c", b"d"] {
                store.put(key, b"v").unwrap();
            }
            let mut seen = Vec::new();
            store
                .iterate(b"b", &mut |key, _| {
                    seen.push(key.to_vec());
                    Ok(key == b"c")
                })
                .unwrap();
            assert_eq!(seen, vec![b"b".to_vec(), b"c".to_vec()], "{name}");
        }
    }

    #[test]
    fn test_write_batch_applies_all() {
        let (stores, _dir) = stores();
        for (name, store) in stores {
            store.put(b"stale", b"x").unwrap();

            let mut batch = WriteBatch::new();
            batch.put(b"one".to_vec(), b"1".to_vec());
            batch.put(b"two".to_vec(), b"2".to_vec());
            batch.delete(b"stale".to_vec());
            store.write_batch(batch).unwrap();

            assert_eq!(store.get(b"one").unwrap(), b"1", "{name}");
            assert_eq!(store.get(b"two").unwrap(), b"2", "{name}");
            assert!(!store.has(b"stale").unwrap(), "{name}");
        }
    }

    #[test]
    fn test_closed_store_errors() {
        let (stores, _dir) = stores();
        for (name, store) in stores {
            store.close().unwrap();
            assert!(matches!(store.get(b"k"), Err(StorageError::Closed)), "{name}");
            assert!(matches!(store.put(b"k", b"v"), Err(StorageError::Closed)), "{name}");
        }
    }
}
