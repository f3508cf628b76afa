//! Garbage collection and reserve eviction workers.
//!
//! Both workers are singletons owned by the [`DB`], driven by capacity-1
//! trigger channels: a non-blocking send coalesces duplicate signals, so
//! a pending trigger absorbs any number of later ones.

use std::sync::Arc;

use apiary_primitives::{postage::CallbackError, ChunkAddress};
use apiary_storage::{IterateOptions, StorageError, WriteBatch};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error};

use crate::{db::DB, LocalStoreError, Result};

/// Fraction of the cache capacity left in the gc index after a
/// collection run.
const GC_TARGET_RATIO: f64 = 0.9;

/// Maximum number of chunks removed in one garbage collection run.
const GC_BATCH_SIZE: u64 = 2000;

/// Fraction of the cache capacity evicted from the reserve when it hits
/// its limit.
const RESERVE_COLLECTION_RATIO: f64 = 0.5;

/// Maximum number of chunks migrated in one reserve eviction run.
const RESERVE_EVICTION_BATCH: u64 = 200;

/// Ceiling on the share of the reserve purged in one eviction run.
const MAX_PURGEABLE_RESERVE_RATIO: f64 = 0.1;

impl DB {
    /// Absolute garbage collection target derived from the cache
    /// capacity.
    pub(crate) fn gc_target(&self) -> u64 {
        (self.cache_capacity as f64 * GC_TARGET_RATIO) as u64
    }

    /// Absolute reserve size targeted by an eviction run.
    pub(crate) fn reserve_eviction_target(&self) -> u64 {
        let target_cache = self
            .reserve_capacity
            .saturating_sub((self.cache_capacity as f64 * RESERVE_COLLECTION_RATIO) as u64);
        let target_ceiling = self
            .reserve_capacity
            .saturating_sub((self.reserve_capacity as f64 * MAX_PURGEABLE_RESERVE_RATIO) as u64);
        target_ceiling.max(target_cache)
    }

    /// Runs one garbage collection pass. Returns the number of removed
    /// chunks and whether the gc size reached the target; `done == false`
    /// means another run is needed.
    pub(crate) fn collect_garbage(&self) -> Result<(u64, bool)> {
        self.metrics.gc_runs_total.increment(1);

        // start logging dirty addresses
        self.batch_mu.lock().gc_running = true;

        let result = self.collect_garbage_inner();

        let mut guard = self.batch_mu.lock();
        guard.gc_running = false;
        guard.dirty.clear();
        drop(guard);

        result
    }

    fn collect_garbage_inner(&self) -> Result<(u64, bool)> {
        let target = self.gc_target();
        let gc_size = self.gc_size.get()?;
        if gc_size == target {
            return Ok((0, true));
        }

        // collect candidates, oldest access first, without holding the
        // batch mutex
        let mut collected = 0u64;
        let mut candidates = Vec::new();
        self.gc_index.iterate(&IterateOptions::default(), &mut |item| {
            if gc_size - collected <= target {
                return Ok(true);
            }
            candidates.push(item);
            collected += 1;
            // batch size limit reached; whether another run is needed is
            // decided after the dirty entries are weeded out below
            Ok(collected >= GC_BATCH_SIZE)
        })?;

        // protect the indexes and gc size from concurrent writers
        let guard = self.batch_mu.lock();
        let gc_size = self.gc_size.get()?;

        let mut batch = WriteBatch::new();
        for item in &candidates {
            let address = match ChunkAddress::from_slice(&item.address) {
                Some(address) => address,
                None => return Err(StorageError::Invalid("gc candidate address").into()),
            };
            if guard.dirty.contains(&address) {
                collected -= 1;
                continue;
            }

            // fetch the full record for the pull and postage index keys
            let mut full = match self.retrieval_data_index.get(item) {
                Ok(full) => full,
                Err(StorageError::NotFound) => {
                    // stale candidate without a backing chunk; drop it
                    self.gc_index.delete_in_batch(&mut batch, item)?;
                    continue;
                }
                Err(err) => return Err(err.into()),
            };
            full.bin = self.po(&address);
            full.access_timestamp = item.access_timestamp;

            self.retrieval_data_index.delete_in_batch(&mut batch, &full)?;
            self.retrieval_access_index.delete_in_batch(&mut batch, &full)?;
            self.push_index.delete_in_batch(&mut batch, &full)?;
            self.pull_index.delete_in_batch(&mut batch, &full)?;
            self.gc_index.delete_in_batch(&mut batch, &full)?;
            self.postage_chunks_index.delete_in_batch(&mut batch, &full)?;
            self.postage_index_index.delete_in_batch(&mut batch, &full)?;
        }

        let done = gc_size.saturating_sub(collected) <= target;
        let new_size = gc_size.saturating_sub(collected);
        self.gc_size.put_in_batch(&mut batch, new_size);
        self.metrics.gc_size.set(new_size as f64);

        self.backend.write_batch(batch)?;
        drop(guard);

        self.metrics.gc_collected_total.increment(collected);
        Ok((collected, done))
    }

    /// Runs one reserve eviction pass, draining the unreserve queue until
    /// the reserve size target or the per-run batch limit is reached.
    pub(crate) fn evict_reserve(&self) -> Result<(u64, bool)> {
        self.metrics.evict_reserve_runs_total.increment(1);
        let target = self.reserve_eviction_target();

        let mut guard = self.batch_mu.lock();
        let reserve_size_start = self.reserve_size.get()?;
        if reserve_size_start == target {
            return Ok((0, true));
        }

        let unreserve_fn = self.unreserve_fn.read();
        let Some(drain) = unreserve_fn.as_ref() else {
            // nothing wired up yet; nothing to dequeue
            return Ok((0, true));
        };

        let mut total_evicted = 0u64;
        let mut total_callbacks = 0u64;
        let mut done = false;

        drain(&mut |batch_id, radius| {
            total_callbacks += 1;
            let evicted = self
                .unreserve_batch_locked(&mut guard, batch_id, radius)
                .map_err(|err| Box::new(err) as CallbackError)?;
            total_evicted += evicted;
            if reserve_size_start.saturating_sub(total_evicted) <= target {
                done = true;
                return Ok(true);
            }
            // stop collecting at the eviction batch size
            Ok(total_evicted >= RESERVE_EVICTION_BATCH)
        })
        .map_err(|err| LocalStoreError::Callback(err.to_string()))?;

        if total_callbacks == 0 {
            // the queue is empty
            done = true;
        }

        self.metrics.evict_reserve_collected_total.increment(total_evicted);
        Ok((total_evicted, done))
    }
}

/// Long-running garbage collection worker. One trigger runs one pass; a
/// pass that hits the batch limit re-triggers itself.
pub(crate) async fn collect_garbage_worker(
    db: Arc<DB>,
    mut trigger: mpsc::Receiver<()>,
    mut close: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = trigger.recv() => {
                match db.collect_garbage() {
                    Ok((collected, done)) => {
                        if collected > 0 {
                            debug!(collected, "garbage collection run");
                        }
                        if !done {
                            db.trigger_garbage_collection();
                        }
                    }
                    Err(LocalStoreError::Closed) => return,
                    Err(err) => {
                        db.metrics.gc_errors_total.increment(1);
                        error!(%err, "collect garbage");
                        db.trigger_garbage_collection();
                    }
                }
            }
            _ = close.changed() => return,
        }
    }
}

/// Long-running reserve eviction worker.
pub(crate) async fn reserve_eviction_worker(
    db: Arc<DB>,
    mut trigger: mpsc::Receiver<()>,
    mut close: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = trigger.recv() => {
                match db.evict_reserve() {
                    Ok((evicted, done)) => {
                        if evicted > 0 {
                            debug!(evicted, "reserve eviction run");
                        }
                        if !done {
                            db.trigger_reserve_eviction();
                        }
                    }
                    Err(LocalStoreError::Closed) => return,
                    Err(err) => {
                        db.metrics.evict_reserve_errors_total.increment(1);
                        error!(%err, "evict reserve");
                        db.trigger_reserve_eviction();
                    }
                }
            }
            _ = close.changed() => return,
        }
    }
}
