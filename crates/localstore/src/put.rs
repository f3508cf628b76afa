//! Chunk ingestion across the put modes.

use std::collections::{hash_map::Entry, HashMap, HashSet};

use apiary_primitives::{
    chunk::{CHUNK_SIZE, SPAN_SIZE},
    Chunk,
};
use apiary_storage::{Item, StorageError, WriteBatch};
use tracing::trace;

use crate::{
    db::{now, DB},
    LocalStoreError, Result,
};

/// Modes of putting chunks into the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModePut {
    /// Chunk retrieved on behalf of a download.
    Request,
    /// Chunk received through pull synchronisation.
    Sync,
    /// Chunk produced by a local upload.
    Upload,
    /// Chunk produced by a local upload, pinned on ingest.
    UploadPin,
}

#[derive(Debug, Default)]
pub(crate) struct PutOutcome {
    pub(crate) exists: bool,
    pub(crate) gc_change: i64,
    pub(crate) reserve_change: i64,
}

impl DB {
    /// Stores chunks under `mode`, maintaining every secondary index in
    /// one atomic write. Returns, per chunk, whether it was already
    /// present.
    pub fn put(&self, mode: ModePut, chunks: &[Chunk]) -> Result<Vec<bool>> {
        for chunk in chunks {
            validate_chunk(chunk)?;
        }

        let mut guard = self.batch_mu.lock();
        let mut batch = WriteBatch::new();
        let mut bin_ids: HashMap<u8, u64> = HashMap::new();
        let mut gc_change = 0i64;
        let mut reserve_change = 0i64;
        let mut exists = Vec::with_capacity(chunks.len());
        let mut bins_touched: HashSet<u8> = HashSet::new();

        for chunk in chunks {
            if guard.gc_running {
                guard.dirty.push(*chunk.address());
            }
            let item = self.chunk_to_item(chunk)?;
            let bin = item.bin;
            let outcome = match mode {
                ModePut::Upload | ModePut::UploadPin => {
                    self.put_upload(&mut batch, &mut bin_ids, item, mode == ModePut::UploadPin)?
                }
                ModePut::Request => self.put_request(&mut batch, &mut bin_ids, item)?,
                ModePut::Sync => self.put_sync(&mut batch, &mut bin_ids, item)?,
            };
            if !outcome.exists {
                bins_touched.insert(bin);
            }
            trace!(address = %chunk.address(), ?mode, exists = outcome.exists, "put chunk");
            exists.push(outcome.exists);
            gc_change += outcome.gc_change;
            reserve_change += outcome.reserve_change;
        }

        for (bin, id) in &bin_ids {
            self.bin_ids.put_in_batch(&mut batch, *bin, *id);
        }
        self.inc_gc_size_in_batch(&mut batch, gc_change)?;
        self.inc_reserve_size_in_batch(&mut batch, reserve_change)?;
        self.backend.write_batch(batch)?;
        drop(guard);

        if matches!(mode, ModePut::Upload | ModePut::UploadPin) && exists.contains(&false) {
            self.trigger_push_subscriptions();
        }
        for bin in bins_touched {
            self.trigger_pull_subscriptions(bin);
        }
        Ok(exists)
    }

    /// Upload-mode insert: retrieval, push, pull and postage indexes. The
    /// chunk does not become a gc candidate until it is push-synced.
    fn put_upload(
        &self,
        batch: &mut WriteBatch,
        bin_ids: &mut HashMap<u8, u64>,
        mut item: Item,
        pin: bool,
    ) -> Result<PutOutcome> {
        if self.retrieval_data_index.has(&item)? {
            return Ok(PutOutcome { exists: true, ..Default::default() });
        }

        let (gc_change, mut reserve_change) = self.replace_stamp_in_batch(batch, &item)?;

        item.store_timestamp = now();
        item.bin_id = self.next_bin_id(bin_ids, item.bin)?;

        self.retrieval_data_index.put_in_batch(batch, &item)?;
        self.push_index.put_in_batch(batch, &item)?;
        self.pull_index.put_in_batch(batch, &item)?;
        self.postage_index_index.put_in_batch(batch, &item)?;
        if item.bin >= item.radius {
            self.postage_chunks_index.put_in_batch(batch, &item)?;
            reserve_change += 1;
        }
        if pin {
            // fresh insert; there is no gc entry to withdraw
            item.pin_counter = self.pin_counter(&item)? + 1;
            self.pin_index.put_in_batch(batch, &item)?;
        }
        Ok(PutOutcome { exists: false, gc_change, reserve_change })
    }

    /// Request-mode insert: an existing chunk only has its recency
    /// refreshed; a new chunk lands in the reserve or straight in the
    /// cache as a gc candidate.
    fn put_request(
        &self,
        batch: &mut WriteBatch,
        bin_ids: &mut HashMap<u8, u64>,
        mut item: Item,
    ) -> Result<PutOutcome> {
        match self.retrieval_data_index.get(&item) {
            Ok(stored) => {
                let mut full = stored;
                full.bin = item.bin;
                self.set_access_in_batch(batch, &mut full)?;
                Ok(PutOutcome { exists: true, ..Default::default() })
            }
            Err(StorageError::NotFound) => {
                let (gc, reserve) = self.replace_stamp_in_batch(batch, &item)?;
                let mut gc_change = gc;
                let mut reserve_change = reserve;

                item.store_timestamp = now();
                item.bin_id = self.next_bin_id(bin_ids, item.bin)?;

                self.retrieval_data_index.put_in_batch(batch, &item)?;
                self.pull_index.put_in_batch(batch, &item)?;
                self.postage_index_index.put_in_batch(batch, &item)?;
                if item.bin >= item.radius {
                    self.postage_chunks_index.put_in_batch(batch, &item)?;
                    reserve_change += 1;
                } else {
                    item.access_timestamp = now();
                    self.retrieval_access_index.put_in_batch(batch, &item)?;
                    self.gc_index.put_in_batch(batch, &item)?;
                    gc_change += 1;
                }
                Ok(PutOutcome { exists: false, gc_change, reserve_change })
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Sync-mode insert: like request, except an existing chunk is left
    /// untouched.
    fn put_sync(
        &self,
        batch: &mut WriteBatch,
        bin_ids: &mut HashMap<u8, u64>,
        mut item: Item,
    ) -> Result<PutOutcome> {
        if self.retrieval_data_index.has(&item)? {
            return Ok(PutOutcome { exists: true, ..Default::default() });
        }

        let (mut gc_change, mut reserve_change) = self.replace_stamp_in_batch(batch, &item)?;

        item.store_timestamp = now();
        item.bin_id = self.next_bin_id(bin_ids, item.bin)?;

        self.retrieval_data_index.put_in_batch(batch, &item)?;
        self.pull_index.put_in_batch(batch, &item)?;
        self.postage_index_index.put_in_batch(batch, &item)?;
        if item.bin >= item.radius {
            self.postage_chunks_index.put_in_batch(batch, &item)?;
            reserve_change += 1;
        } else {
            item.access_timestamp = now();
            self.retrieval_access_index.put_in_batch(batch, &item)?;
            self.gc_index.put_in_batch(batch, &item)?;
            gc_change += 1;
        }
        Ok(PutOutcome { exists: false, gc_change, reserve_change })
    }

    /// Evicts the chunk a previous stamp with the same `(batch, index)`
    /// was issued for. A stamp reissued for a different address replaces
    /// the old chunk.
    fn replace_stamp_in_batch(&self, batch: &mut WriteBatch, item: &Item) -> Result<(i64, i64)> {
        match self.postage_index_index.get(item) {
            Ok(previous) if previous.address != item.address => {
                let prev_key = Item::with_address(previous.address.clone());
                match self.retrieval_data_index.get(&prev_key) {
                    Ok(mut prev_item) => {
                        prev_item.bin = self.po_of(&prev_item);
                        self.remove_chunk_in_batch(batch, &prev_item)
                    }
                    // record pointed at an already collected chunk
                    Err(StorageError::NotFound) => Ok((0, 0)),
                    Err(err) => Err(err.into()),
                }
            }
            Ok(_) => Ok((0, 0)),
            Err(StorageError::NotFound) => Ok((0, 0)),
            Err(err) => Err(err.into()),
        }
    }

    /// Assigns the next per-bin sequence number, reading the persisted
    /// counter once per bin and advancing it locally for the batch.
    fn next_bin_id(&self, bin_ids: &mut HashMap<u8, u64>, bin: u8) -> Result<u64> {
        let id = match bin_ids.entry(bin) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(self.bin_ids.get(bin)?),
        };
        *id += 1;
        Ok(*id)
    }
}

fn validate_chunk(chunk: &Chunk) -> Result<()> {
    if chunk.data().len() > CHUNK_SIZE + SPAN_SIZE {
        return Err(LocalStoreError::Invalid("chunk data exceeds maximum size"));
    }
    let stamp = chunk.stamp().ok_or(LocalStoreError::Invalid("missing stamp"))?;
    if let Some(meta) = chunk.batch() {
        if meta.bucket_depth > meta.depth {
            return Err(LocalStoreError::Invalid("bucket depth exceeds batch depth"));
        }
        if u64::from(stamp.bucket_index()) >= 1u64 << meta.bucket_depth.min(63) {
            return Err(LocalStoreError::Invalid("bucket index out of range"));
        }
        if u64::from(stamp.bucket_slot()) >= 1u64 << (meta.depth - meta.bucket_depth).min(63) {
            return Err(LocalStoreError::BucketFull);
        }
    }
    Ok(())
}
