//! In-memory backend for tests and light-weight deployments.

use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::{BatchOp, KeyStore, StorageError, StorageResult, WriteBatch};

/// BTreeMap-backed [`KeyStore`].
///
/// Keys iterate in lexicographic order; batch writes apply under a single
/// write lock, so readers observe either none or all of a batch.
pub struct MemoryStore {
    entries: RwLock<Option<BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl MemoryStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self { entries: RwLock::new(Some(BTreeMap::new())) }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyStore for MemoryStore {
    fn get(&self, key: &[u8]) -> StorageResult<Vec<u8>> {
        let guard = self.entries.read();
        let entries = guard.as_ref().ok_or(StorageError::Closed)?;
        entries.get(key).cloned().ok_or(StorageError::NotFound)
    }

    fn has(&self, key: &[u8]) -> StorageResult<bool> {
        let guard = self.entries.read();
        let entries = guard.as_ref().ok_or(StorageError::Closed)?;
        Ok(entries.contains_key(key))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> StorageResult<()> {
        let mut guard = self.entries.write();
        let entries = guard.as_mut().ok_or(StorageError::Closed)?;
        entries.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> StorageResult<()> {
        let mut guard = self.entries.write();
        let entries = guard.as_mut().ok_or(StorageError::Closed)?;
        entries.remove(key);
        Ok(())
    }

    fn iterate(
        &self,
        start: &[u8],
        cb: &mut dyn FnMut(&[u8], &[u8]) -> StorageResult<bool>,
    ) -> StorageResult<()> {
        let guard = self.entries.read();
        let entries = guard.as_ref().ok_or(StorageError::Closed)?;
        for (key, value) in entries.range(start.to_vec()..) {
            if cb(key, value)? {
                break;
            }
        }
        Ok(())
    }

    fn write_batch(&self, batch: WriteBatch) -> StorageResult<()> {
        let mut guard = self.entries.write();
        let entries = guard.as_mut().ok_or(StorageError::Closed)?;
        for op in batch.into_ops() {
            match op {
                BatchOp::Put { key, value } => {
                    entries.insert(key, value);
                }
                BatchOp::Delete { key } => {
                    entries.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn close(&self) -> StorageResult<()> {
        let _ = self.entries.write().take();
        Ok(())
    }
}
