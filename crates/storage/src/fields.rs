//! Persisted scalar fields on the keyed backend.
//!
//! Fields live under prefix byte `0`, keyed by name, and hold counters the
//! chunk store must survive restarts with (gc size, reserve size, per-bin
//! sequence numbers).

use std::sync::Arc;

use crate::{index::read_u64, KeyStore, StorageError, StorageResult, WriteBatch};

/// Key prefix reserved for fields.
const FIELDS_PREFIX: u8 = 0;

fn field_key(name: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + name.len());
    key.push(FIELDS_PREFIX);
    key.extend_from_slice(name.as_bytes());
    key
}

/// A persisted u64 counter. Absent reads as zero.
#[derive(Clone)]
pub struct U64Field {
    store: Arc<dyn KeyStore>,
    key: Vec<u8>,
}

impl U64Field {
    /// Creates a field stored under `name`.
    pub fn new(store: Arc<dyn KeyStore>, name: &str) -> Self {
        Self { store, key: field_key(name) }
    }

    /// Reads the current value.
    pub fn get(&self) -> StorageResult<u64> {
        match self.store.get(&self.key) {
            Ok(value) => read_u64(&value),
            Err(StorageError::NotFound) => Ok(0),
            Err(err) => Err(err),
        }
    }

    /// Writes `value` directly.
    pub fn put(&self, value: u64) -> StorageResult<()> {
        self.store.put(&self.key, &value.to_be_bytes())
    }

    /// Queues a write of `value` into `batch`.
    pub fn put_in_batch(&self, batch: &mut WriteBatch, value: u64) {
        batch.put(self.key.clone(), value.to_be_bytes().to_vec());
    }
}

/// A persisted vector of u64 counters indexed by a one-byte subscript.
#[derive(Clone)]
pub struct U64Vector {
    store: Arc<dyn KeyStore>,
    name: String,
}

impl U64Vector {
    /// Creates a vector stored under `name`.
    pub fn new(store: Arc<dyn KeyStore>, name: &str) -> Self {
        Self { store, name: name.to_string() }
    }

    fn key(&self, index: u8) -> Vec<u8> {
        let mut key = field_key(&self.name);
        key.push(index);
        key
    }

    /// Reads the value at `index`. Absent reads as zero.
    pub fn get(&self, index: u8) -> StorageResult<u64> {
        match self.store.get(&self.key(index)) {
            Ok(value) => read_u64(&value),
            Err(StorageError::NotFound) => Ok(0),
            Err(err) => Err(err),
        }
    }

    /// Queues a write of `value` at `index` into `batch`.
    pub fn put_in_batch(&self, batch: &mut WriteBatch, index: u8, value: u64) {
        batch.put(self.key(index), value.to_be_bytes().to_vec());
    }
}

/// A persisted raw-bytes field. Used for configuration-integrity keys.
#[derive(Clone)]
pub struct BytesField {
    store: Arc<dyn KeyStore>,
    key: Vec<u8>,
}

impl BytesField {
    /// Creates a field stored under `name`.
    pub fn new(store: Arc<dyn KeyStore>, name: &str) -> Self {
        Self { store, key: field_key(name) }
    }

    /// Reads the stored bytes, or `None` when the field was never written.
    pub fn get(&self) -> StorageResult<Option<Vec<u8>>> {
        match self.store.get(&self.key) {
            Ok(value) => Ok(Some(value)),
            Err(StorageError::NotFound) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Writes `value` directly.
    pub fn put(&self, value: &[u8]) -> StorageResult<()> {
        self.store.put(&self.key, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;

    #[test]
    fn test_u64_field_defaults_to_zero() {
        let store: Arc<dyn KeyStore> = Arc::new(MemoryStore::new());
        let field = U64Field::new(store, "gc-size");
        assert_eq!(field.get().unwrap(), 0);
    }

    #[test]
    fn test_u64_field_roundtrip() {
        let store: Arc<dyn KeyStore> = Arc::new(MemoryStore::new());
        let field = U64Field::new(store.clone(), "gc-size");
        field.put(42).unwrap();
        assert_eq!(field.get().unwrap(), 42);

        let mut batch = WriteBatch::new();
        field.put_in_batch(&mut batch, 99);
        store.write_batch(batch).unwrap();
        assert_eq!(field.get().unwrap(), 99);
    }

    #[test]
    fn test_u64_vector_is_per_index() {
        let store: Arc<dyn KeyStore> = Arc::new(MemoryStore::new());
        let vector = U64Vector::new(store.clone(), "bin-id");

        let mut batch = WriteBatch::new();
        vector.put_in_batch(&mut batch, 3, 7);
        vector.put_in_batch(&mut batch, 4, 11);
        store.write_batch(batch).unwrap();

        assert_eq!(vector.get(3).unwrap(), 7);
        assert_eq!(vector.get(4).unwrap(), 11);
        assert_eq!(vector.get(5).unwrap(), 0);
    }

    #[test]
    fn test_bytes_field() {
        let store: Arc<dyn KeyStore> = Arc::new(MemoryStore::new());
        let field = BytesField::new(store, "base-address");
        assert_eq!(field.get().unwrap(), None);
        field.put(b"overlay").unwrap();
        assert_eq!(field.get().unwrap(), Some(b"overlay".to_vec()));
    }
}
