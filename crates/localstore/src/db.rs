//! The chunk store database: index wiring, construction and lifecycle.

use std::{collections::HashMap, sync::Arc, time::SystemTime};

use apiary_primitives::{
    postage::{Stamp, UnreserveFn, STAMP_SIZE},
    proximity, Chunk, ChunkAddress,
};
use apiary_storage::{
    BytesField, Index, IndexFuncs, Item, KeyStore, StorageError, U64Field, U64Vector, WriteBatch,
};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, watch};
use tracing::warn;

use crate::{gc, metrics::LocalStoreMetrics, LocalStoreError, Result};

// Index key prefixes on the shared backend. Prefix 0 is reserved for
// persisted fields.
const RETRIEVAL_DATA_PREFIX: u8 = 1;
const RETRIEVAL_ACCESS_PREFIX: u8 = 2;
const PUSH_PREFIX: u8 = 3;
const PULL_PREFIX: u8 = 4;
const GC_PREFIX: u8 = 5;
const POSTAGE_CHUNKS_PREFIX: u8 = 6;
const POSTAGE_INDEX_PREFIX: u8 = 7;
const PIN_PREFIX: u8 = 8;

const ADDRESS_SIZE: usize = 32;
const BATCH_ID_SIZE: usize = 32;

/// Chunk store configuration.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Options {
    /// Maximum number of cache-class chunks before garbage collection runs.
    pub cache_capacity: u64,
    /// Maximum number of reserved chunks before reserve eviction runs.
    pub reserve_capacity: u64,
}

impl Default for Options {
    fn default() -> Self {
        Self { cache_capacity: 1_000_000, reserve_capacity: 1 << 22 }
    }
}

/// Dirty-address tracking guarded by the batch mutex.
///
/// While a garbage collection run is collecting candidates, every mutating
/// operation records the addresses it touched so the run can skip them.
#[derive(Default)]
pub(crate) struct DirtyTracker {
    pub(crate) gc_running: bool,
    pub(crate) dirty: Vec<ChunkAddress>,
}

/// The chunk store.
///
/// Persists chunks addressed by hash and maintains the secondary indexes
/// driving garbage collection, push/pull synchronisation and the postage
/// reserve. All multi-index mutations are serialised by one batch mutex
/// and committed as a single atomic write.
pub struct DB {
    pub(crate) backend: Arc<dyn KeyStore>,
    base: ChunkAddress,
    pub(crate) cache_capacity: u64,
    pub(crate) reserve_capacity: u64,

    pub(crate) retrieval_data_index: Index,
    pub(crate) retrieval_access_index: Index,
    pub(crate) push_index: Index,
    pub(crate) pull_index: Index,
    pub(crate) gc_index: Index,
    pub(crate) postage_chunks_index: Index,
    pub(crate) postage_index_index: Index,
    pub(crate) pin_index: Index,

    pub(crate) gc_size: U64Field,
    pub(crate) reserve_size: U64Field,
    pub(crate) bin_ids: U64Vector,

    pub(crate) batch_mu: Mutex<DirtyTracker>,
    pub(crate) unreserve_fn: RwLock<Option<UnreserveFn>>,

    pub(crate) gc_trigger: mpsc::Sender<()>,
    pub(crate) reserve_trigger: mpsc::Sender<()>,
    pub(crate) close_tx: watch::Sender<bool>,
    workers: Mutex<Vec<tokio::task::JoinHandle<()>>>,

    pub(crate) push_triggers: Mutex<Vec<mpsc::Sender<()>>>,
    pub(crate) pull_triggers: Mutex<HashMap<u8, Vec<mpsc::Sender<()>>>>,

    pub(crate) metrics: LocalStoreMetrics,
}

impl std::fmt::Debug for DB {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DB").finish_non_exhaustive()
    }
}

impl DB {
    /// Opens the chunk store over `backend` for a node at `base`.
    ///
    /// Fails with [`LocalStoreError::OverlayChanged`] when the backend was
    /// previously opened with a different base address. Spawns the garbage
    /// collection and reserve eviction workers; must run inside a tokio
    /// runtime.
    pub fn open(
        backend: Arc<dyn KeyStore>,
        base: ChunkAddress,
        opts: Options,
    ) -> Result<Arc<Self>> {
        let base_field = BytesField::new(backend.clone(), "base-address");
        match base_field.get()? {
            Some(stored) if stored.as_slice() != &base.as_bytes()[..] => {
                return Err(LocalStoreError::OverlayChanged)
            }
            Some(_) => {}
            None => base_field.put(base.as_bytes())?,
        }

        let (gc_trigger, gc_rx) = mpsc::channel(1);
        let (reserve_trigger, reserve_rx) = mpsc::channel(1);
        let (close_tx, _) = watch::channel(false);

        let db = Arc::new(Self {
            retrieval_data_index: Index::new(
                backend.clone(),
                RETRIEVAL_DATA_PREFIX,
                retrieval_data_funcs(),
            ),
            retrieval_access_index: Index::new(
                backend.clone(),
                RETRIEVAL_ACCESS_PREFIX,
                retrieval_access_funcs(),
            ),
            push_index: Index::new(backend.clone(), PUSH_PREFIX, push_funcs()),
            pull_index: Index::new(backend.clone(), PULL_PREFIX, pull_funcs()),
            gc_index: Index::new(backend.clone(), GC_PREFIX, gc_funcs()),
            postage_chunks_index: Index::new(
                backend.clone(),
                POSTAGE_CHUNKS_PREFIX,
                postage_chunks_funcs(),
            ),
            postage_index_index: Index::new(
                backend.clone(),
                POSTAGE_INDEX_PREFIX,
                postage_index_funcs(),
            ),
            pin_index: Index::new(backend.clone(), PIN_PREFIX, pin_funcs()),
            gc_size: U64Field::new(backend.clone(), "gc-size"),
            reserve_size: U64Field::new(backend.clone(), "reserve-size"),
            bin_ids: U64Vector::new(backend.clone(), "bin-ids"),
            backend,
            base,
            cache_capacity: opts.cache_capacity,
            reserve_capacity: opts.reserve_capacity,
            batch_mu: Mutex::new(DirtyTracker::default()),
            unreserve_fn: RwLock::new(None),
            gc_trigger,
            reserve_trigger,
            close_tx,
            workers: Mutex::new(Vec::new()),
            push_triggers: Mutex::new(Vec::new()),
            pull_triggers: Mutex::new(HashMap::new()),
            metrics: LocalStoreMetrics::default(),
        });

        let mut workers = db.workers.lock();
        workers.push(tokio::spawn(gc::collect_garbage_worker(
            db.clone(),
            gc_rx,
            db.close_tx.subscribe(),
        )));
        workers.push(tokio::spawn(gc::reserve_eviction_worker(
            db.clone(),
            reserve_rx,
            db.close_tx.subscribe(),
        )));
        drop(workers);

        Ok(db)
    }

    /// Injects the unreserve-queue drain consumed by the reserve eviction
    /// worker. Until set, eviction runs are no-ops.
    pub fn set_unreserve_fn(&self, f: UnreserveFn) {
        *self.unreserve_fn.write() = Some(f);
    }

    /// Signals shutdown, waits for the workers to finish their in-flight
    /// runs, compacts if the backend supports it, and closes the backend.
    pub async fn close(&self) -> Result<()> {
        let _ = self.close_tx.send(true);
        let handles: Vec<_> = self.workers.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
        if let Err(err) = self.backend.compact() {
            warn!(%err, "compaction on close failed");
        }
        self.backend.close()?;
        Ok(())
    }

    /// Proximity order of `address` relative to the node base.
    pub(crate) fn po(&self, address: &ChunkAddress) -> u8 {
        proximity(self.base.as_bytes(), address.as_bytes())
    }

    /// Proximity order of an item's address relative to the node base.
    pub(crate) fn po_of(&self, item: &Item) -> u8 {
        proximity(self.base.as_bytes(), &item.address)
    }

    /// Current number of garbage collection candidates.
    pub fn gc_size(&self) -> Result<u64> {
        Ok(self.gc_size.get()?)
    }

    /// Current number of reserved chunks.
    pub fn reserve_size(&self) -> Result<u64> {
        Ok(self.reserve_size.get()?)
    }

    /// Signals the garbage collection worker; coalesces pending signals.
    pub(crate) fn trigger_garbage_collection(&self) {
        let _ = self.gc_trigger.try_send(());
    }

    /// Signals the reserve eviction worker; coalesces pending signals.
    pub(crate) fn trigger_reserve_eviction(&self) {
        let _ = self.reserve_trigger.try_send(());
    }

    /// Wakes push subscribers, pruning ones that went away.
    pub(crate) fn trigger_push_subscriptions(&self) {
        let mut triggers = self.push_triggers.lock();
        triggers.retain(|t| !t.is_closed());
        for trigger in triggers.iter() {
            let _ = trigger.try_send(());
        }
    }

    /// Wakes pull subscribers on `bin`, pruning ones that went away.
    pub(crate) fn trigger_pull_subscriptions(&self, bin: u8) {
        let mut triggers = self.pull_triggers.lock();
        if let Some(bin_triggers) = triggers.get_mut(&bin) {
            bin_triggers.retain(|t| !t.is_closed());
            for trigger in bin_triggers.iter() {
                let _ = trigger.try_send(());
            }
            if bin_triggers.is_empty() {
                triggers.remove(&bin);
            }
        }
    }

    /// Adjusts the persisted gc size by `change` inside `batch` and
    /// triggers garbage collection when the cache capacity is reached.
    /// Must be called under the batch mutex.
    pub(crate) fn inc_gc_size_in_batch(&self, batch: &mut WriteBatch, change: i64) -> Result<()> {
        if change == 0 {
            return Ok(());
        }
        let size = self.gc_size.get()?;
        let new_size = if change > 0 {
            size + change as u64
        } else {
            match size.checked_sub(change.unsigned_abs()) {
                Some(new_size) => new_size,
                // underflow means a double-counted delete; keep the size
                None => return Ok(()),
            }
        };
        self.gc_size.put_in_batch(batch, new_size);
        self.metrics.gc_size.set(new_size as f64);

        if new_size >= self.cache_capacity {
            self.trigger_garbage_collection();
        }
        Ok(())
    }

    /// Adjusts the persisted reserve size by `change` inside `batch` and
    /// triggers reserve eviction when the reserve capacity is reached.
    /// Must be called under the batch mutex.
    pub(crate) fn inc_reserve_size_in_batch(
        &self,
        batch: &mut WriteBatch,
        change: i64,
    ) -> Result<()> {
        if change == 0 {
            return Ok(());
        }
        let size = self.reserve_size.get()?;
        let new_size = if change > 0 {
            size + change as u64
        } else {
            match size.checked_sub(change.unsigned_abs()) {
                Some(new_size) => new_size,
                None => return Ok(()),
            }
        };
        self.reserve_size.put_in_batch(batch, new_size);
        self.metrics.reserve_size.set(new_size as f64);

        if new_size >= self.reserve_capacity {
            self.trigger_reserve_eviction();
        }
        Ok(())
    }

    /// Builds the internal index record for a chunk.
    pub(crate) fn chunk_to_item(&self, chunk: &Chunk) -> Result<Item> {
        let stamp = chunk.stamp().ok_or(LocalStoreError::Invalid("missing stamp"))?;
        let mut item = Item::with_address(chunk.address().as_bytes().to_vec());
        item.data = chunk.data().to_vec();
        item.bin = self.po(chunk.address());
        item.radius = chunk.radius();
        item.batch_id = stamp.batch_id().to_vec();
        item.index = stamp.index_bytes().to_vec();
        item.timestamp = stamp.timestamp().to_be_bytes().to_vec();
        item.sig = stamp.signature().to_vec();
        Ok(item)
    }

    /// Reconstructs a chunk, stamp included, from a full retrieval record.
    pub(crate) fn item_to_chunk(&self, item: &Item) -> Result<Chunk> {
        let address =
            ChunkAddress::from_slice(&item.address).ok_or(StorageError::Invalid("address"))?;
        let mut stamp_bytes = Vec::with_capacity(STAMP_SIZE);
        stamp_bytes.extend_from_slice(&item.batch_id);
        stamp_bytes.extend_from_slice(&item.index);
        stamp_bytes.extend_from_slice(&item.timestamp);
        stamp_bytes.extend_from_slice(&item.sig);
        let stamp = Stamp::try_from(stamp_bytes.as_slice())
            .map_err(|_| StorageError::Invalid("stamp record"))?;
        Ok(Chunk::new(address, item.data.clone()).with_stamp(stamp))
    }

    /// Whether the chunk of `item` is currently held for the reserve.
    pub(crate) fn is_reserved(&self, item: &Item) -> Result<bool> {
        Ok(self.postage_chunks_index.has(item)?)
    }

    /// Whether the chunk of `item` is pinned.
    pub(crate) fn is_pinned(&self, item: &Item) -> Result<bool> {
        Ok(self.pin_index.has(item)?)
    }
}

/// Current time as unix nanoseconds.
pub(crate) fn now() -> i64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or_default()
}

fn read_u64(buf: &[u8]) -> std::result::Result<u64, StorageError> {
    let arr: [u8; 8] = buf.try_into().map_err(|_| StorageError::Invalid("u64 segment"))?;
    Ok(u64::from_be_bytes(arr))
}

// retrievalData: address -> storeTs ‖ binID ‖ batchID ‖ index ‖ timestamp ‖ sig ‖ data
fn retrieval_data_funcs() -> IndexFuncs {
    IndexFuncs {
        encode_key: |item| Ok(item.address.clone()),
        decode_key: |key| Ok(Item::with_address(key)),
        encode_value: |item| {
            let mut value = Vec::with_capacity(16 + STAMP_SIZE + item.data.len());
            value.extend_from_slice(&(item.store_timestamp as u64).to_be_bytes());
            value.extend_from_slice(&item.bin_id.to_be_bytes());
            value.extend_from_slice(&item.batch_id);
            value.extend_from_slice(&item.index);
            value.extend_from_slice(&item.timestamp);
            value.extend_from_slice(&item.sig);
            value.extend_from_slice(&item.data);
            Ok(value)
        },
        decode_value: |key_item, value| {
            if value.len() < 16 + STAMP_SIZE {
                return Err(StorageError::Invalid("retrieval record"));
            }
            let mut item = key_item.clone();
            item.store_timestamp = read_u64(&value[..8])? as i64;
            item.bin_id = read_u64(&value[8..16])?;
            item.batch_id = value[16..48].to_vec();
            item.index = value[48..56].to_vec();
            item.timestamp = value[56..64].to_vec();
            item.sig = value[64..129].to_vec();
            item.data = value[129..].to_vec();
            Ok(item)
        },
    }
}

// retrievalAccess: address -> accessTs
fn retrieval_access_funcs() -> IndexFuncs {
    IndexFuncs {
        encode_key: |item| Ok(item.address.clone()),
        decode_key: |key| Ok(Item::with_address(key)),
        encode_value: |item| Ok((item.access_timestamp as u64).to_be_bytes().to_vec()),
        decode_value: |key_item, value| {
            let mut item = key_item.clone();
            item.access_timestamp = read_u64(value)? as i64;
            Ok(item)
        },
    }
}

// push: storeTs ‖ address -> ∅
fn push_funcs() -> IndexFuncs {
    IndexFuncs {
        encode_key: |item| {
            let mut key = Vec::with_capacity(8 + item.address.len());
            key.extend_from_slice(&(item.store_timestamp as u64).to_be_bytes());
            key.extend_from_slice(&item.address);
            Ok(key)
        },
        decode_key: |key| {
            if key.len() != 8 + ADDRESS_SIZE {
                return Err(StorageError::Invalid("push key"));
            }
            let mut item = Item::with_address(&key[8..]);
            item.store_timestamp = read_u64(&key[..8])? as i64;
            Ok(item)
        },
        encode_value: |_| Ok(Vec::new()),
        decode_value: |key_item, _| Ok(key_item.clone()),
    }
}

// pull: bin ‖ binID -> address ‖ batchID
fn pull_funcs() -> IndexFuncs {
    IndexFuncs {
        encode_key: |item| {
            let mut key = Vec::with_capacity(9);
            key.push(item.bin);
            key.extend_from_slice(&item.bin_id.to_be_bytes());
            Ok(key)
        },
        decode_key: |key| {
            if key.len() != 9 {
                return Err(StorageError::Invalid("pull key"));
            }
            let mut item = Item::default();
            item.bin = key[0];
            item.bin_id = read_u64(&key[1..])?;
            Ok(item)
        },
        encode_value: |item| {
            let mut value = Vec::with_capacity(ADDRESS_SIZE + BATCH_ID_SIZE);
            value.extend_from_slice(&item.address);
            value.extend_from_slice(&item.batch_id);
            Ok(value)
        },
        decode_value: |key_item, value| {
            if value.len() != ADDRESS_SIZE + BATCH_ID_SIZE {
                return Err(StorageError::Invalid("pull record"));
            }
            let mut item = key_item.clone();
            item.address = value[..ADDRESS_SIZE].to_vec();
            item.batch_id = value[ADDRESS_SIZE..].to_vec();
            Ok(item)
        },
    }
}

// gc: accessTs ‖ binID ‖ address -> ∅
fn gc_funcs() -> IndexFuncs {
    IndexFuncs {
        encode_key: |item| {
            let mut key = Vec::with_capacity(16 + item.address.len());
            key.extend_from_slice(&(item.access_timestamp as u64).to_be_bytes());
            key.extend_from_slice(&item.bin_id.to_be_bytes());
            key.extend_from_slice(&item.address);
            Ok(key)
        },
        decode_key: |key| {
            if key.len() != 16 + ADDRESS_SIZE {
                return Err(StorageError::Invalid("gc key"));
            }
            let mut item = Item::with_address(&key[16..]);
            item.access_timestamp = read_u64(&key[..8])? as i64;
            item.bin_id = read_u64(&key[8..16])?;
            Ok(item)
        },
        encode_value: |_| Ok(Vec::new()),
        decode_value: |key_item, _| Ok(key_item.clone()),
    }
}

// postageChunks: batchID ‖ bin ‖ binID -> ∅
fn postage_chunks_funcs() -> IndexFuncs {
    IndexFuncs {
        encode_key: |item| {
            let mut key = Vec::with_capacity(BATCH_ID_SIZE + 9);
            key.extend_from_slice(&item.batch_id);
            key.push(item.bin);
            key.extend_from_slice(&item.bin_id.to_be_bytes());
            Ok(key)
        },
        decode_key: |key| {
            if key.len() != BATCH_ID_SIZE + 9 {
                return Err(StorageError::Invalid("postage chunks key"));
            }
            let mut item = Item::default();
            item.batch_id = key[..BATCH_ID_SIZE].to_vec();
            item.bin = key[BATCH_ID_SIZE];
            item.bin_id = read_u64(&key[BATCH_ID_SIZE + 1..])?;
            Ok(item)
        },
        encode_value: |_| Ok(Vec::new()),
        decode_value: |key_item, _| Ok(key_item.clone()),
    }
}

// postageIndex: batchID ‖ index -> storeTs ‖ address
fn postage_index_funcs() -> IndexFuncs {
    IndexFuncs {
        encode_key: |item| {
            let mut key = Vec::with_capacity(BATCH_ID_SIZE + 8);
            key.extend_from_slice(&item.batch_id);
            key.extend_from_slice(&item.index);
            Ok(key)
        },
        decode_key: |key| {
            if key.len() != BATCH_ID_SIZE + 8 {
                return Err(StorageError::Invalid("postage index key"));
            }
            let mut item = Item::default();
            item.batch_id = key[..BATCH_ID_SIZE].to_vec();
            item.index = key[BATCH_ID_SIZE..].to_vec();
            Ok(item)
        },
        encode_value: |item| {
            let mut value = Vec::with_capacity(8 + ADDRESS_SIZE);
            value.extend_from_slice(&(item.store_timestamp as u64).to_be_bytes());
            value.extend_from_slice(&item.address);
            Ok(value)
        },
        decode_value: |key_item, value| {
            if value.len() != 8 + ADDRESS_SIZE {
                return Err(StorageError::Invalid("postage index record"));
            }
            let mut item = key_item.clone();
            item.store_timestamp = read_u64(&value[..8])? as i64;
            item.address = value[8..].to_vec();
            Ok(item)
        },
    }
}

// pin: address -> counter
fn pin_funcs() -> IndexFuncs {
    IndexFuncs {
        encode_key: |item| Ok(item.address.clone()),
        decode_key: |key| Ok(Item::with_address(key)),
        encode_value: |item| Ok(item.pin_counter.to_be_bytes().to_vec()),
        decode_value: |key_item, value| {
            let mut item = key_item.clone();
            item.pin_counter = read_u64(value)?;
            Ok(item)
        },
    }
}
