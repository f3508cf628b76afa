//! Typed index over the keyed backend.
//!
//! An [`Index`] gives a typed view over one key prefix of the shared
//! backend. Each index is parameterised by four functions translating an
//! [`Item`] to and from its key and value encodings, so the chunk store can
//! compose many orderings (by address, by store time, by access time, by
//! batch) over the same data.

use std::sync::Arc;

use crate::{KeyStore, StorageError, StorageResult, WriteBatch};

/// Internal record threaded through every index.
///
/// Each index uses only a subset of the fields; unused fields stay at
/// their default values. `bin` is the proximity order of `address`
/// relative to the node base address, computed by the chunk store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Item {
    /// Chunk address bytes.
    pub address: Vec<u8>,
    /// Chunk payload.
    pub data: Vec<u8>,
    /// Last access time, unix nanoseconds.
    pub access_timestamp: i64,
    /// Store time, unix nanoseconds.
    pub store_timestamp: i64,
    /// Per-bin sequence number.
    pub bin_id: u64,
    /// Proximity order of `address` to the node base.
    pub bin: u8,
    /// Postage batch identifier.
    pub batch_id: Vec<u8>,
    /// 8-byte within-batch stamp index.
    pub index: Vec<u8>,
    /// 8-byte stamp timestamp.
    pub timestamp: Vec<u8>,
    /// 65-byte stamp signature.
    pub sig: Vec<u8>,
    /// Batch reserve radius attached at put time.
    pub radius: u8,
    /// Pin reference count.
    pub pin_counter: u64,
}

impl Item {
    /// Creates an item carrying only an address.
    pub fn with_address(address: impl Into<Vec<u8>>) -> Self {
        Self { address: address.into(), ..Default::default() }
    }
}

/// Encoding and decoding functions defining one index.
///
/// `decode_value` receives the item decoded from the key so it can merge
/// key and value fields into one record.
#[derive(Clone, Copy)]
pub struct IndexFuncs {
    /// Encodes the index key (without the index prefix byte).
    pub encode_key: fn(&Item) -> StorageResult<Vec<u8>>,
    /// Decodes an index key back into its item fields.
    pub decode_key: fn(&[u8]) -> StorageResult<Item>,
    /// Encodes the index value.
    pub encode_value: fn(&Item) -> StorageResult<Vec<u8>>,
    /// Decodes an index value, merging into the key item.
    pub decode_value: fn(&Item, &[u8]) -> StorageResult<Item>,
}

/// Options for [`Index::iterate`].
#[derive(Debug, Clone, Default)]
pub struct IterateOptions {
    /// Restrict iteration to keys beginning with this prefix.
    pub prefix: Vec<u8>,
    /// Start iteration at this item instead of the first key.
    pub start_from: Option<Item>,
    /// Skip the `start_from` item itself.
    pub skip_start: bool,
}

impl IterateOptions {
    /// Iterate only keys beginning with `prefix`.
    pub fn with_prefix(prefix: impl Into<Vec<u8>>) -> Self {
        Self { prefix: prefix.into(), ..Default::default() }
    }
}

/// One typed index over the shared backend.
#[derive(Clone)]
pub struct Index {
    store: Arc<dyn KeyStore>,
    prefix: u8,
    funcs: IndexFuncs,
}

impl Index {
    /// Creates an index under the given one-byte key prefix.
    pub fn new(store: Arc<dyn KeyStore>, prefix: u8, funcs: IndexFuncs) -> Self {
        Self { store, prefix, funcs }
    }

    fn key(&self, item: &Item) -> StorageResult<Vec<u8>> {
        let encoded = (self.funcs.encode_key)(item)?;
        let mut key = Vec::with_capacity(1 + encoded.len());
        key.push(self.prefix);
        key.extend_from_slice(&encoded);
        Ok(key)
    }

    /// Returns the full item stored under the key fields of `item`.
    pub fn get(&self, item: &Item) -> StorageResult<Item> {
        let value = self.store.get(&self.key(item)?)?;
        (self.funcs.decode_value)(item, &value)
    }

    /// Whether an entry exists under the key fields of `item`.
    pub fn has(&self, item: &Item) -> StorageResult<bool> {
        self.store.has(&self.key(item)?)
    }

    /// Stores `item` directly.
    pub fn put(&self, item: &Item) -> StorageResult<()> {
        let value = (self.funcs.encode_value)(item)?;
        self.store.put(&self.key(item)?, &value)
    }

    /// Queues a put of `item` into `batch`.
    pub fn put_in_batch(&self, batch: &mut WriteBatch, item: &Item) -> StorageResult<()> {
        let value = (self.funcs.encode_value)(item)?;
        batch.put(self.key(item)?, value);
        Ok(())
    }

    /// Deletes the entry under the key fields of `item`.
    pub fn delete(&self, item: &Item) -> StorageResult<()> {
        self.store.delete(&self.key(item)?)
    }

    /// Queues a deletion of `item` into `batch`.
    pub fn delete_in_batch(&self, batch: &mut WriteBatch, item: &Item) -> StorageResult<()> {
        batch.delete(self.key(item)?);
        Ok(())
    }

    /// Iterates items in key order.
    ///
    /// The callback returns `true` to stop early.
    pub fn iterate(
        &self,
        opts: &IterateOptions,
        cb: &mut dyn FnMut(Item) -> StorageResult<bool>,
    ) -> StorageResult<()> {
        let mut scope = Vec::with_capacity(1 + opts.prefix.len());
        scope.push(self.prefix);
        scope.extend_from_slice(&opts.prefix);

        let start = match &opts.start_from {
            Some(item) => self.key(item)?,
            None => scope.clone(),
        };
        let skip_key = opts.skip_start.then(|| start.clone());

        let funcs = self.funcs;
        self.store.iterate(&start, &mut |key, value| {
            if !key.starts_with(&scope) {
                return Ok(true);
            }
            if skip_key.as_deref() == Some(key) {
                return Ok(false);
            }
            let key_item = (funcs.decode_key)(&key[1..])?;
            let item = (funcs.decode_value)(&key_item, value)?;
            cb(item)
        })
    }

    /// Number of entries in the index. Iterates; intended for tests and
    /// startup reconciliation, not hot paths.
    pub fn count(&self) -> StorageResult<u64> {
        let mut count = 0u64;
        self.iterate(&IterateOptions::default(), &mut |_| {
            count += 1;
            Ok(false)
        })?;
        Ok(count)
    }
}

/// Big-endian u64 key/value segment helpers shared by index codecs.
pub(crate) fn read_u64(buf: &[u8]) -> StorageResult<u64> {
    let arr: [u8; 8] = buf.try_into().map_err(|_| StorageError::Invalid("u64 segment"))?;
    Ok(u64::from_be_bytes(arr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;

    // a minimal "by address" index: key = address, value = data
    fn retrieval_funcs() -> IndexFuncs {
        IndexFuncs {
            encode_key: |item| Ok(item.address.clone()),
            decode_key: |key| Ok(Item::with_address(key)),
            encode_value: |item| Ok(item.data.clone()),
            decode_value: |key_item, value| {
                let mut item = key_item.clone();
                item.data = value.to_vec();
                Ok(item)
            },
        }
    }

    fn test_index() -> Index {
        Index::new(Arc::new(MemoryStore::new()), 1, retrieval_funcs())
    }

    fn test_item(n: u8) -> Item {
        let mut item = Item::with_address(vec![n; 4]);
        item.data = vec![n, n];
        item
    }

    #[test]
    fn test_put_get_has_delete() {
        let index = test_index();
        let item = test_item(1);

        index.put(&item).unwrap();
        assert!(index.has(&item).unwrap());
        assert_eq!(index.get(&item).unwrap(), item);

        index.delete(&item).unwrap();
        assert!(!index.has(&item).unwrap());
        assert!(matches!(index.get(&item), Err(StorageError::NotFound)));
    }

    #[test]
    fn test_batch_participation() {
        let index = test_index();
        let store = index.store.clone();

        let mut batch = WriteBatch::new();
        index.put_in_batch(&mut batch, &test_item(1)).unwrap();
        index.put_in_batch(&mut batch, &test_item(2)).unwrap();
        store.write_batch(batch).unwrap();

        assert!(index.has(&test_item(1)).unwrap());
        assert!(index.has(&test_item(2)).unwrap());
        assert_eq!(index.count().unwrap(), 2);
    }

    #[test]
    fn test_iterate_in_key_order() {
        let index = test_index();
        for n in [3u8, 1, 2] {
            index.put(&test_item(n)).unwrap();
        }
        let mut seen = Vec::new();
        index
            .iterate(&IterateOptions::default(), &mut |item| {
                seen.push(item.address[0]);
                Ok(false)
            })
            .unwrap();
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[test]
    fn test_iterate_respects_prefix_boundary() {
        let index = test_index();
        let other = Index::new(index.store.clone(), 2, retrieval_funcs());

        index.put(&test_item(9)).unwrap();
        other.put(&test_item(1)).unwrap();

        let mut seen = 0;
        index
            .iterate(&IterateOptions::default(), &mut |_| {
                seen += 1;
                Ok(false)
            })
            .unwrap();
        assert_eq!(seen, 1);
    }

    #[test]
    fn test_iterate_start_from_and_skip() {
        let index = test_index();
        for n in 1u8..=4 {
            index.put(&test_item(n)).unwrap();
        }

        let opts = IterateOptions {
            start_from: Some(test_item(2)),
            skip_start: true,
            ..Default::default()
        };
        let mut seen = Vec::new();
        index
            .iterate(&opts, &mut |item| {
                seen.push(item.address[0]);
                Ok(false)
            })
            .unwrap();
        assert_eq!(seen, vec![3, 4]);
    }
}
