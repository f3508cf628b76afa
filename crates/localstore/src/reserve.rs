//! Reserve-to-cache migration of postage batches.

use apiary_primitives::{postage::BatchId, MAX_BINS};
use apiary_storage::{IterateOptions, StorageError, WriteBatch};
use tracing::debug;

use crate::{
    db::{now, DirtyTracker, DB},
    Result,
};

impl DB {
    /// Withdraws reserve protection from chunks of `batch_id` in bins
    /// below `radius`: unpinned chunks become gc candidates and the batch
    /// membership entries are dropped. Idempotent. Returns the number of
    /// chunks that transitioned from reserve to cache.
    pub fn unreserve_batch(&self, batch_id: &BatchId, radius: u8) -> Result<u64> {
        let mut guard = self.batch_mu.lock();
        self.unreserve_batch_locked(&mut guard, batch_id, radius)
    }

    /// Lock-free variant for callers already holding the batch mutex.
    pub(crate) fn unreserve_batch_locked(
        &self,
        _guard: &mut DirtyTracker,
        batch_id: &BatchId,
        radius: u8,
    ) -> Result<u64> {
        let mut batch = WriteBatch::new();
        let mut evicted = 0u64;
        let mut gc_change = 0i64;
        let mut reserve_change = 0i64;

        for bin in 0..radius.min(MAX_BINS) {
            let mut prefix = batch_id.to_vec();
            prefix.push(bin);

            let mut entries = Vec::new();
            self.postage_chunks_index.iterate(
                &IterateOptions::with_prefix(prefix),
                &mut |item| {
                    entries.push(item);
                    Ok(false)
                },
            )?;

            for pc_item in entries {
                let mut item = match self.pull_index.get(&pc_item) {
                    Ok(item) => item,
                    // membership without a pull record is stale; drop it
                    Err(StorageError::NotFound) => {
                        self.postage_chunks_index.delete_in_batch(&mut batch, &pc_item)?;
                        reserve_change -= 1;
                        continue;
                    }
                    Err(err) => return Err(err.into()),
                };

                if self.is_pinned(&item)? {
                    self.postage_chunks_index.delete_in_batch(&mut batch, &pc_item)?;
                    reserve_change -= 1;
                    continue;
                }

                match self.retrieval_access_index.get(&item) {
                    Ok(access) => item.access_timestamp = access.access_timestamp,
                    Err(StorageError::NotFound) => {
                        item.access_timestamp = now();
                        self.retrieval_access_index.put_in_batch(&mut batch, &item)?;
                    }
                    Err(err) => return Err(err.into()),
                }
                if !self.gc_index.has(&item)? {
                    self.gc_index.put_in_batch(&mut batch, &item)?;
                    gc_change += 1;
                    evicted += 1;
                }
                self.postage_chunks_index.delete_in_batch(&mut batch, &pc_item)?;
                reserve_change -= 1;
            }
        }

        self.inc_gc_size_in_batch(&mut batch, gc_change)?;
        self.inc_reserve_size_in_batch(&mut batch, reserve_change)?;
        self.backend.write_batch(batch)?;

        if evicted > 0 {
            debug!(%batch_id, radius, evicted, "unreserved batch");
        }
        Ok(evicted)
    }
}
