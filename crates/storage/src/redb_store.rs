//! redb-based keyed backend.
//!
//! A single `&[u8]`-keyed table holds every index; one redb write
//! transaction backs one [`WriteBatch`], which provides the atomicity the
//! multi-index updates rely on.

use std::path::Path;

use parking_lot::RwLock;
use redb::{Database, ReadableTable, TableDefinition};
use tracing::debug;

use crate::{BatchOp, KeyStore, StorageError, StorageResult, WriteBatch};

/// Table definition for all keyed entries.
const ENTRIES_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("entries");

/// redb-backed [`KeyStore`].
///
/// Thread-safe; uses ACID transactions for batch writes.
pub struct RedbStore {
    db: RwLock<Option<Database>>,
}

impl RedbStore {
    /// Open or create a store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        let db = Database::create(path)?;

        // ensure the table exists so empty-store reads succeed
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(ENTRIES_TABLE)?;
        }
        write_txn.commit()?;

        debug!("opened redb key store");
        Ok(Self { db: RwLock::new(Some(db)) })
    }
}

impl KeyStore for RedbStore {
    fn get(&self, key: &[u8]) -> StorageResult<Vec<u8>> {
        let guard = self.db.read();
        let db = guard.as_ref().ok_or(StorageError::Closed)?;
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(ENTRIES_TABLE)?;
        match table.get(key)? {
            Some(value) => Ok(value.value().to_vec()),
            None => Err(StorageError::NotFound),
        }
    }

    fn has(&self, key: &[u8]) -> StorageResult<bool> {
        let guard = self.db.read();
        let db = guard.as_ref().ok_or(StorageError::Closed)?;
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(ENTRIES_TABLE)?;
        Ok(table.get(key)?.is_some())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> StorageResult<()> {
        let guard = self.db.read();
        let db = guard.as_ref().ok_or(StorageError::Closed)?;
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(ENTRIES_TABLE)?;
            table.insert(key, value)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> StorageResult<()> {
        let guard = self.db.read();
        let db = guard.as_ref().ok_or(StorageError::Closed)?;
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(ENTRIES_TABLE)?;
            table.remove(key)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn iterate(
        &self,
        start: &[u8],
        cb: &mut dyn FnMut(&[u8], &[u8]) -> StorageResult<bool>,
    ) -> StorageResult<()> {
        let guard = self.db.read();
        let db = guard.as_ref().ok_or(StorageError::Closed)?;
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(ENTRIES_TABLE)?;
        for entry in table.range(start..)? {
            let (key, value) = entry?;
            if cb(key.value(), value.value())? {
                break;
            }
        }
        Ok(())
    }

    fn write_batch(&self, batch: WriteBatch) -> StorageResult<()> {
        let guard = self.db.read();
        let db = guard.as_ref().ok_or(StorageError::Closed)?;
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(ENTRIES_TABLE)?;
            for op in batch.into_ops() {
                match op {
                    BatchOp::Put { key, value } => {
                        table.insert(key.as_slice(), value.as_slice())?;
                    }
                    BatchOp::Delete { key } => {
                        table.remove(key.as_slice())?;
                    }
                }
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    fn compact(&self) -> StorageResult<()> {
        let mut guard = self.db.write();
        let db = guard.as_mut().ok_or(StorageError::Closed)?;
        let reclaimed = db.compact()?;
        debug!(reclaimed, "compacted redb key store");
        Ok(())
    }

    fn close(&self) -> StorageResult<()> {
        let _ = self.db.write().take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.redb");

        let store = RedbStore::open(&path).unwrap();
        store.put(b"key", b"value").unwrap();
        store.close().unwrap();

        let store = RedbStore::open(&path).unwrap();
        assert_eq!(store.get(b"key").unwrap(), b"value");
    }

    #[test]
    fn test_compact_runs() {
        let dir = tempdir().unwrap();
        let store = RedbStore::open(dir.path().join("test.redb")).unwrap();
        for i in 0u32..64 {
            store.put(&i.to_be_bytes(), &[0u8; 256]).unwrap();
        }
        for i in 0u32..64 {
            store.delete(&i.to_be_bytes()).unwrap();
        }
        store.compact().unwrap();
        assert!(!store.has(&0u32.to_be_bytes()).unwrap());
    }
}
