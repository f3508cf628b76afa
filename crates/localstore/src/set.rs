//! State transitions on stored chunks across the set modes.

use apiary_primitives::ChunkAddress;
use apiary_storage::{Item, StorageError, WriteBatch};
use tracing::trace;

use crate::{
    db::{now, DB},
    LocalStoreError, Result,
};

/// Modes of updating chunk state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeSet {
    /// Refresh the access timestamp, re-keying any gc entry.
    Access,
    /// Mark an upload chunk as push-synced.
    Sync,
    /// Remove the chunk from every index.
    Remove,
    /// Increment the pin counter, withdrawing the chunk from gc.
    Pin,
    /// Decrement the pin counter, reinstating gc eligibility on zero.
    Unpin,
}

impl DB {
    /// Applies `mode` to each address, committing all index updates in
    /// one atomic write.
    pub fn set(&self, mode: ModeSet, addresses: &[ChunkAddress]) -> Result<()> {
        let mut guard = self.batch_mu.lock();
        let mut batch = WriteBatch::new();
        let mut gc_change = 0i64;
        let mut reserve_change = 0i64;

        for address in addresses {
            if guard.gc_running {
                guard.dirty.push(*address);
            }
            let (gc, reserve) = match mode {
                ModeSet::Access => self.set_access(&mut batch, address)?,
                ModeSet::Sync => self.set_sync(&mut batch, address)?,
                ModeSet::Remove => self.set_remove(&mut batch, address)?,
                ModeSet::Pin => self.set_pin(&mut batch, address)?,
                ModeSet::Unpin => self.set_unpin(&mut batch, address)?,
            };
            trace!(%address, ?mode, "set chunk");
            gc_change += gc;
            reserve_change += reserve;
        }

        self.inc_gc_size_in_batch(&mut batch, gc_change)?;
        self.inc_reserve_size_in_batch(&mut batch, reserve_change)?;
        self.backend.write_batch(batch)?;
        Ok(())
    }

    fn set_access(&self, batch: &mut WriteBatch, address: &ChunkAddress) -> Result<(i64, i64)> {
        let mut item =
            self.retrieval_data_index.get(&Item::with_address(address.as_bytes().to_vec()))?;
        item.bin = self.po(address);
        self.set_access_in_batch(batch, &mut item)?;
        Ok((0, 0))
    }

    /// Refreshes the access timestamp of a full item and re-keys its gc
    /// entry when the chunk is a gc candidate. Must run under the batch
    /// mutex.
    pub(crate) fn set_access_in_batch(&self, batch: &mut WriteBatch, item: &mut Item) -> Result<()> {
        match self.retrieval_access_index.get(item) {
            Ok(access) => {
                let mut old = item.clone();
                old.access_timestamp = access.access_timestamp;
                item.access_timestamp = now();
                if self.gc_index.has(&old)? {
                    self.gc_index.delete_in_batch(batch, &old)?;
                    self.gc_index.put_in_batch(batch, item)?;
                }
                self.retrieval_access_index.put_in_batch(batch, item)?;
            }
            Err(StorageError::NotFound) => {
                // first touch of a reserved chunk
                item.access_timestamp = now();
                self.retrieval_access_index.put_in_batch(batch, item)?;
            }
            Err(err) => return Err(err.into()),
        }
        Ok(())
    }

    /// Marks an upload chunk as synced: the push entry goes away and a
    /// cache-class chunk becomes a gc candidate.
    fn set_sync(&self, batch: &mut WriteBatch, address: &ChunkAddress) -> Result<(i64, i64)> {
        let mut item =
            match self.retrieval_data_index.get(&Item::with_address(address.as_bytes().to_vec())) {
                Ok(item) => item,
                // the chunk was garbage collected before the sync completed
                Err(StorageError::NotFound) => return Ok((0, 0)),
                Err(err) => return Err(err.into()),
            };
        item.bin = self.po(address);

        self.push_index.delete_in_batch(batch, &item)?;

        if self.is_reserved(&item)? || self.is_pinned(&item)? {
            return Ok((0, 0));
        }
        match self.retrieval_access_index.get(&item) {
            Ok(access) => {
                item.access_timestamp = access.access_timestamp;
                if self.gc_index.has(&item)? {
                    return Ok((0, 0));
                }
            }
            Err(StorageError::NotFound) => {
                item.access_timestamp = now();
                self.retrieval_access_index.put_in_batch(batch, &item)?;
            }
            Err(err) => return Err(err.into()),
        }
        self.gc_index.put_in_batch(batch, &item)?;
        Ok((1, 0))
    }

    fn set_remove(&self, batch: &mut WriteBatch, address: &ChunkAddress) -> Result<(i64, i64)> {
        let mut item =
            self.retrieval_data_index.get(&Item::with_address(address.as_bytes().to_vec()))?;
        item.bin = self.po(address);
        self.remove_chunk_in_batch(batch, &item)
    }

    /// Deletes a chunk from every index. `item` must be the full
    /// retrieval record with `bin` set. Returns the gc and reserve size
    /// changes.
    pub(crate) fn remove_chunk_in_batch(
        &self,
        batch: &mut WriteBatch,
        item: &Item,
    ) -> Result<(i64, i64)> {
        let mut gc_change = 0i64;
        let mut reserve_change = 0i64;

        match self.retrieval_access_index.get(item) {
            Ok(access) => {
                let mut gc_item = item.clone();
                gc_item.access_timestamp = access.access_timestamp;
                if self.gc_index.has(&gc_item)? {
                    self.gc_index.delete_in_batch(batch, &gc_item)?;
                    gc_change -= 1;
                }
                self.retrieval_access_index.delete_in_batch(batch, item)?;
            }
            Err(StorageError::NotFound) => {}
            Err(err) => return Err(err.into()),
        }
        if self.postage_chunks_index.has(item)? {
            self.postage_chunks_index.delete_in_batch(batch, item)?;
            reserve_change -= 1;
        }
        if self.pin_index.has(item)? {
            self.pin_index.delete_in_batch(batch, item)?;
        }
        self.retrieval_data_index.delete_in_batch(batch, item)?;
        self.push_index.delete_in_batch(batch, item)?;
        self.pull_index.delete_in_batch(batch, item)?;
        self.postage_index_index.delete_in_batch(batch, item)?;

        Ok((gc_change, reserve_change))
    }

    fn set_pin(&self, batch: &mut WriteBatch, address: &ChunkAddress) -> Result<(i64, i64)> {
        let mut item =
            self.retrieval_data_index.get(&Item::with_address(address.as_bytes().to_vec()))?;
        item.bin = self.po(address);

        let counter = self.pin_counter(&item)?;
        let mut gc_change = 0i64;
        if counter == 0 {
            match self.retrieval_access_index.get(&item) {
                Ok(access) => {
                    let mut gc_item = item.clone();
                    gc_item.access_timestamp = access.access_timestamp;
                    if self.gc_index.has(&gc_item)? {
                        self.gc_index.delete_in_batch(batch, &gc_item)?;
                        gc_change -= 1;
                    }
                }
                Err(StorageError::NotFound) => {}
                Err(err) => return Err(err.into()),
            }
        }
        item.pin_counter = counter + 1;
        self.pin_index.put_in_batch(batch, &item)?;
        Ok((gc_change, 0))
    }

    fn set_unpin(&self, batch: &mut WriteBatch, address: &ChunkAddress) -> Result<(i64, i64)> {
        let pin_key = Item::with_address(address.as_bytes().to_vec());
        let counter = match self.pin_index.get(&pin_key) {
            Ok(item) => item.pin_counter,
            Err(StorageError::NotFound) => return Err(LocalStoreError::NotFound),
            Err(err) => return Err(err.into()),
        };

        if counter > 1 {
            let mut item = pin_key;
            item.pin_counter = counter - 1;
            self.pin_index.put_in_batch(batch, &item)?;
            return Ok((0, 0));
        }
        self.pin_index.delete_in_batch(batch, &pin_key)?;

        // last pin released: the chunk rejoins the cache unless reserved
        let mut item = match self.retrieval_data_index.get(&pin_key) {
            Ok(item) => item,
            Err(StorageError::NotFound) => return Ok((0, 0)),
            Err(err) => return Err(err.into()),
        };
        item.bin = self.po(address);
        if self.is_reserved(&item)? {
            return Ok((0, 0));
        }
        match self.retrieval_access_index.get(&item) {
            Ok(access) => item.access_timestamp = access.access_timestamp,
            Err(StorageError::NotFound) => {
                item.access_timestamp = now();
                self.retrieval_access_index.put_in_batch(batch, &item)?;
            }
            Err(err) => return Err(err.into()),
        }
        if self.gc_index.has(&item)? {
            return Ok((0, 0));
        }
        self.gc_index.put_in_batch(batch, &item)?;
        Ok((1, 0))
    }

    /// Current pin reference count for an item, zero when unpinned.
    pub(crate) fn pin_counter(&self, item: &Item) -> Result<u64> {
        match self.pin_index.get(item) {
            Ok(pinned) => Ok(pinned.pin_counter),
            Err(StorageError::NotFound) => Ok(0),
            Err(err) => Err(err.into()),
        }
    }
}
