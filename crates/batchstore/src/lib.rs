//! Postage batch registry and value-ordered reserve.
//!
//! The [`BatchStore`] keeps every known postage batch together with a
//! value-sorted index and decides, per batch, whether its chunks are
//! reserved or evictable. Decisions are communicated to the chunk store
//! through a persisted unreserve queue; the chunk store drains the queue
//! when its reserve fills up. Expired batches are purged when a new chain
//! state arrives.
//!
//! The two stores are wired with injected callbacks (never object
//! references): the batch store receives `evict_fn` at construction and
//! the chunk store receives this store's [`BatchStore::unreserve`] drain.

#![warn(missing_docs)]

use std::sync::Arc;

use alloy_primitives::U256;
use apiary_primitives::{
    postage::{Batch, BatchId, ChainState, EvictFn, RadiusSetter, UnreserveIterFn},
    MAX_PO,
};
use apiary_storage::KeyStore;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

mod error;
mod metrics;
mod reserve;

pub use error::BatchStoreError;
pub use reserve::{ReserveState, UnreserveItem};

use metrics::BatchStoreMetrics;
use reserve::exp2;

/// Result type for batch store operations.
pub type Result<T> = std::result::Result<T, BatchStoreError>;

const BATCH_KEY_PREFIX: &[u8] = b"batchstore_batch_";
const VALUE_KEY_PREFIX: &[u8] = b"batchstore_value_";
const CHAIN_STATE_KEY: &[u8] = b"batchstore_chainstate";
const RESERVE_STATE_KEY: &[u8] = b"batchstore_reservestate";
const UNRESERVE_QUEUE_PREFIX: &[u8] = b"batchstore_unreserve_queue_";
const QUEUE_CARDINALITY_KEY: &[u8] = b"batchstore_queue_cardinality";
const STORE_PREFIX: &[u8] = b"batchstore_";

/// Batch reserve configuration.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ReserveConfig {
    /// Number of chunks the reserve may hold.
    pub capacity: i64,
    /// Initial radius of responsibility.
    pub default_radius: u8,
}

impl Default for ReserveConfig {
    fn default() -> Self {
        Self { capacity: 1 << 22, default_radius: 12 }
    }
}

/// The postage batch store.
pub struct BatchStore {
    store: Arc<dyn KeyStore>,
    config: ReserveConfig,

    /// Serialises the mutating operations (`put`, `put_chain_state`,
    /// `reset`) against each other.
    op_mu: Mutex<()>,
    cs: Mutex<ChainState>,
    rs: Mutex<ReserveState>,
    queue_idx: Mutex<u64>,

    evict_fn: EvictFn,
    radius_setter: RwLock<Option<Box<dyn RadiusSetter>>>,
    metrics: BatchStoreMetrics,
}

impl BatchStore {
    /// Constructs the batch store, initialising chain and reserve state
    /// from the backend. `evict_fn` is invoked with the ID of every
    /// expired batch so the chunk store can release its chunks.
    pub fn new(
        store: Arc<dyn KeyStore>,
        config: ReserveConfig,
        evict_fn: EvictFn,
    ) -> Result<Self> {
        let cs = match store.get(CHAIN_STATE_KEY) {
            Ok(value) => ChainState::try_from(value.as_slice())?,
            Err(apiary_storage::StorageError::NotFound) => ChainState::default(),
            Err(err) => return Err(err.into()),
        };
        let rs = match store.get(RESERVE_STATE_KEY) {
            Ok(value) => ReserveState::try_from(value.as_slice())?,
            Err(apiary_storage::StorageError::NotFound) => {
                ReserveState::initial(config.default_radius, config.capacity)
            }
            Err(err) => return Err(err.into()),
        };
        let queue_idx = match store.get(QUEUE_CARDINALITY_KEY) {
            Ok(value) => {
                let arr: [u8; 8] = value
                    .as_slice()
                    .try_into()
                    .map_err(|_| BatchStoreError::Invalid("queue cardinality record"))?;
                u64::from_be_bytes(arr)
            }
            Err(apiary_storage::StorageError::NotFound) => 0,
            Err(err) => return Err(err.into()),
        };

        Ok(Self {
            store,
            config,
            op_mu: Mutex::new(()),
            cs: Mutex::new(cs),
            rs: Mutex::new(rs),
            queue_idx: Mutex::new(queue_idx),
            evict_fn,
            radius_setter: RwLock::new(None),
            metrics: BatchStoreMetrics::default(),
        })
    }

    /// Registers the radius-change listener.
    pub fn set_radius_setter(&self, setter: Box<dyn RadiusSetter>) {
        *self.radius_setter.write() = Some(setter);
    }

    /// Returns the batch with the given ID, its `radius` fixed to the
    /// effective reserve radius at this moment. Used by stamp validation
    /// at ingest.
    pub fn get(&self, id: &BatchId) -> Result<Batch> {
        let mut batch = self.read_batch(id)?;
        let rs = self.rs.lock();
        batch.radius = rs.storage_radius.min(rs.radius_of(rs.tier(&batch.value)));
        Ok(batch)
    }

    /// Whether a batch with the given ID is known.
    pub fn exists(&self, id: &BatchId) -> Result<bool> {
        Ok(self.store.has(&batch_key(id))?)
    }

    /// Stores `batch` under new value and depth, rebalancing the reserve.
    ///
    /// `batch` carries the previous value and depth; for a batch seen for
    /// the first time both are the creation values (a zero value puts the
    /// old state out of the reserve).
    pub fn put(&self, mut batch: Batch, new_value: U256, new_depth: u8) -> Result<()> {
        let _op = self.op_mu.lock();

        let old_value = batch.value;
        let old_depth = batch.depth;

        self.store.delete(&value_key(&old_value, &batch.id))?;
        batch.value = new_value;
        batch.depth = new_depth;
        self.store.put(&value_key(&new_value, &batch.id), &[])?;

        let reserve_radius = {
            let mut rs = self.rs.lock();
            let (capacity_change, reserve_radius) =
                rs.change(&old_value, &new_value, old_depth, new_depth);
            rs.available += capacity_change;
            reserve_radius
        };
        self.enqueue_unreserve(&batch.id, reserve_radius)?;
        self.evict_outer(&batch)?;

        {
            let rs = self.rs.lock();
            self.store.put(RESERVE_STATE_KEY, &rs.to_bytes())?;
            self.publish_reserve_metrics(&rs);
            self.notify_radius(rs.radius);
        }

        trace!(batch_id = %batch.id, %new_value, new_depth, "stored batch");
        self.store.put(&batch_key(&batch.id), &batch.to_bytes())?;
        Ok(())
    }

    /// Applies a new chain state: expired batches are evicted from the
    /// chunk store and fully drained ones deleted, then the state is
    /// persisted.
    pub fn put_chain_state(&self, cs: ChainState) -> Result<()> {
        let _op = self.op_mu.lock();

        *self.cs.lock() = cs.clone();
        self.evict_expired()?;

        {
            let rs = self.rs.lock();
            self.publish_reserve_metrics(&rs);
            self.notify_radius(rs.radius);
        }

        debug!(block = cs.block, total = %cs.total_amount, "applied chain state");
        self.store.put(CHAIN_STATE_KEY, &cs.to_bytes())?;
        Ok(())
    }

    /// Returns the stored chain state.
    pub fn chain_state(&self) -> ChainState {
        self.cs.lock().clone()
    }

    /// Returns a snapshot of the reserve state.
    pub fn reserve_state(&self) -> ReserveState {
        self.rs.lock().clone()
    }

    /// Drains the unreserve queue in insertion order.
    ///
    /// Each entry is handed to `cb`; entries are deleted once their
    /// callback succeeded, and the storage radius rises as dequeued radii
    /// overtake it. `cb` returns `true` to stop the drain.
    pub fn unreserve(&self, cb: UnreserveIterFn<'_>) -> Result<()> {
        let mut entries = Vec::new();
        self.store.iterate(UNRESERVE_QUEUE_PREFIX, &mut |key, value| {
            if !key.starts_with(UNRESERVE_QUEUE_PREFIX) {
                return Ok(true);
            }
            entries.push((key.to_vec(), value.to_vec()));
            Ok(false)
        })?;

        for (key, value) in entries {
            let item = UnreserveItem::try_from(value.as_slice())?;
            let stop = cb(&item.batch_id, item.radius)
                .map_err(|err| BatchStoreError::Callback(err.to_string()))?;

            {
                let mut rs = self.rs.lock();
                if rs.storage_radius + 1 < item.radius {
                    rs.storage_radius = item.radius - 1;
                    self.metrics.storage_radius.set(rs.storage_radius as f64);
                    self.store.put(RESERVE_STATE_KEY, &rs.to_bytes())?;
                }
            }
            self.store.delete(&key)?;
            if stop {
                break;
            }
        }
        Ok(())
    }

    /// Deletes every persisted batch store key and reinitialises the
    /// chain and reserve state.
    pub fn reset(&self) -> Result<()> {
        let _op = self.op_mu.lock();

        let mut keys = Vec::new();
        self.store.iterate(STORE_PREFIX, &mut |key, _| {
            if !key.starts_with(STORE_PREFIX) {
                return Ok(true);
            }
            keys.push(key.to_vec());
            Ok(false)
        })?;
        for key in keys {
            self.store.delete(&key)?;
        }

        *self.cs.lock() = ChainState::default();
        *self.rs.lock() =
            ReserveState::initial(self.config.default_radius, self.config.capacity);
        *self.queue_idx.lock() = 0;
        Ok(())
    }

    /// Appends an unreserve event for `id` at `radius` to the persisted
    /// queue. The key suffix is the fixed-width big-endian cardinality so
    /// lexicographic iteration preserves insertion order.
    pub(crate) fn enqueue_unreserve(&self, id: &BatchId, radius: u8) -> Result<()> {
        let mut queue_idx = self.queue_idx.lock();
        let cardinality = *queue_idx + 1;

        let mut key = UNRESERVE_QUEUE_PREFIX.to_vec();
        key.extend_from_slice(&cardinality.to_be_bytes());
        let item = UnreserveItem { batch_id: *id, radius };
        self.store.put(&key, &item.to_bytes())?;
        self.store.put(QUEUE_CARDINALITY_KEY, &cardinality.to_be_bytes())?;

        *queue_idx = cardinality;
        Ok(())
    }

    /// Restores a non-negative available capacity by unreserving the
    /// lowest-value batches at the current radius. When a whole radius
    /// ring is consumed the radius itself grows and the scan restarts
    /// from the inner limit.
    fn evict_outer(&self, last: &Batch) -> Result<()> {
        if self.rs.lock().available >= 0 {
            return Ok(());
        }
        let entries = self.value_entries()?;

        let mut rs = self.rs.lock();
        for (value, id) in &entries {
            // below the outer limit means already unreserved at this tier
            if *value < rs.outer {
                continue;
            }
            // stop only past the value band that lifted capacity back up
            if rs.available >= 0 && rs.outer != *value {
                break;
            }
            let depth =
                if *id == last.id { last.depth } else { self.read_batch(id)?.depth };
            rs.available += exp2(depth.saturating_sub(rs.radius.saturating_add(1)));
            rs.outer = *value;
            self.enqueue_unreserve(id, rs.radius)?;
        }
        // step past the last consumed value so the next scan does not
        // revisit the same batch
        rs.outer += U256::from(1u64);

        if rs.available < 0 && rs.radius < MAX_PO {
            rs.radius += 1;
            let inner = rs.inner;
            rs.outer = inner;
            drop(rs);
            return self.evict_outer(last);
        }
        self.store.put(RESERVE_STATE_KEY, &rs.to_bytes())?;
        Ok(())
    }

    /// Purges batches whose value the chain has already settled: their
    /// chunks are evicted from the chunk store, capacity is recovered,
    /// and fully drained batches are deleted.
    fn evict_expired(&self) -> Result<()> {
        let (until, inner, outer, radius) = {
            let rs = self.rs.lock();
            let cs = self.cs.lock();
            let until = if rs.inner > U256::ZERO && cs.total_amount >= rs.inner {
                cs.total_amount + U256::from(1u64)
            } else {
                rs.inner
            };
            (until, rs.inner, rs.outer, rs.radius)
        };
        let total_amount = self.cs.lock().total_amount;

        let mut multiplier: i64 = 0;
        let mut to_delete = Vec::new();
        for (value, id) in self.value_entries()? {
            // the index is value-ascending; everything from `until` on stays
            if value >= until {
                break;
            }
            // crossing the tier limits doubles the eviction yield: outer
            // tier batches occupied twice the inner tier share
            if multiplier == 0 && value >= inner {
                multiplier = 1;
            }
            if multiplier == 1 && value >= outer {
                multiplier = 2;
            }

            let batch = self.read_batch(&id)?;
            (self.evict_fn)(&id)
                .map_err(|err| BatchStoreError::Callback(err.to_string()))?;

            {
                let mut rs = self.rs.lock();
                rs.available +=
                    multiplier * exp2(batch.depth.saturating_sub(radius.saturating_add(1)));
            }
            if value <= total_amount {
                to_delete.push(id);
            }
        }

        {
            let mut rs = self.rs.lock();
            rs.inner = until;
            if rs.outer < until {
                rs.outer = until;
            }
            self.store.put(RESERVE_STATE_KEY, &rs.to_bytes())?;
        }
        self.delete_batches(&to_delete)
    }

    fn delete_batches(&self, ids: &[BatchId]) -> Result<()> {
        for id in ids {
            let batch = self.read_batch(id)?;
            self.store.delete(&value_key(&batch.value, id))?;
            self.store.delete(&batch_key(id))?;
            debug!(batch_id = %id, "deleted expired batch");
        }
        Ok(())
    }

    /// Raw batch record, without the per-get radius fixup.
    fn read_batch(&self, id: &BatchId) -> Result<Batch> {
        let value = self.store.get(&batch_key(id))?;
        Ok(Batch::try_from(value.as_slice())?)
    }

    /// Snapshot of the value index, ascending by value.
    fn value_entries(&self) -> Result<Vec<(U256, BatchId)>> {
        let mut entries = Vec::new();
        self.store.iterate(VALUE_KEY_PREFIX, &mut |key, _| {
            if !key.starts_with(VALUE_KEY_PREFIX) {
                return Ok(true);
            }
            let suffix = &key[VALUE_KEY_PREFIX.len()..];
            if suffix.len() != 64 {
                return Err(apiary_storage::StorageError::Invalid("value index key"));
            }
            let value = U256::from_be_slice(&suffix[..32]);
            let id = BatchId::from_slice(&suffix[32..]);
            entries.push((value, id));
            Ok(false)
        })?;
        Ok(entries)
    }

    fn notify_radius(&self, radius: u8) {
        if let Some(setter) = self.radius_setter.read().as_ref() {
            setter.set_radius(radius);
        }
    }

    fn publish_reserve_metrics(&self, rs: &ReserveState) {
        self.metrics.radius.set(rs.radius as f64);
        self.metrics.available.set(rs.available as f64);
        self.metrics.inner.set(f64::from(rs.inner.saturating_to::<u32>()));
        self.metrics.outer.set(f64::from(rs.outer.saturating_to::<u32>()));
    }

    #[cfg(test)]
    pub(crate) fn set_reserve_state(&self, rs: ReserveState) {
        *self.rs.lock() = rs;
    }
}

fn batch_key(id: &BatchId) -> Vec<u8> {
    let mut key = BATCH_KEY_PREFIX.to_vec();
    key.extend_from_slice(id.as_ref());
    key
}

/// Index key sorting batches by value: the 32-byte big-endian value makes
/// lexicographic key order equal numeric order.
fn value_key(value: &U256, id: &BatchId) -> Vec<u8> {
    let mut key = VALUE_KEY_PREFIX.to_vec();
    key.extend_from_slice(&value.to_be_bytes::<32>());
    key.extend_from_slice(id.as_ref());
    key
}

#[cfg(test)]
mod tests {
    use alloy_primitives::Address;
    use apiary_storage::MemoryStore;
    use parking_lot::Mutex as PlMutex;

    use super::*;

    type EvictLog = Arc<PlMutex<Vec<BatchId>>>;

    fn test_store(capacity: i64, default_radius: u8) -> (BatchStore, EvictLog) {
        let log: EvictLog = Arc::new(PlMutex::new(Vec::new()));
        let log_clone = log.clone();
        let evict_fn: EvictFn = Box::new(move |id| {
            log_clone.lock().push(*id);
            Ok(())
        });
        let store = BatchStore::new(
            Arc::new(MemoryStore::new()),
            ReserveConfig { capacity, default_radius },
            evict_fn,
        )
        .unwrap();
        (store, log)
    }

    fn test_batch(n: u8, value: u64, depth: u8) -> Batch {
        Batch {
            id: BatchId::repeat_byte(n),
            value: U256::from(value),
            start: 0,
            owner: Address::repeat_byte(n),
            depth,
            bucket_depth: 16,
            immutable: false,
            radius: 0,
        }
    }

    fn drain(store: &BatchStore) -> Vec<UnreserveItem> {
        let mut items = Vec::new();
        store
            .unreserve(&mut |id, radius| {
                items.push(UnreserveItem { batch_id: *id, radius });
                Ok(false)
            })
            .unwrap();
        items
    }

    #[test]
    fn test_new_initialises_reserve_state() {
        let (store, _) = test_store(100, 12);
        let rs = store.reserve_state();
        assert_eq!(rs.radius, 12);
        assert_eq!(rs.storage_radius, 0);
        assert_eq!(rs.available, 100);
        assert_eq!(rs.inner, U256::ZERO);
        assert_eq!(rs.outer, U256::ZERO);
    }

    #[test]
    fn test_put_persists_and_exists() {
        let (store, _) = test_store(1_000, 4);
        let batch = test_batch(1, 0, 8);

        assert!(!store.exists(&batch.id).unwrap());
        store.put(batch.clone(), U256::from(10u64), 8).unwrap();
        assert!(store.exists(&batch.id).unwrap());

        let stored = store.get(&batch.id).unwrap();
        assert_eq!(stored.value, U256::from(10u64));
        assert_eq!(stored.depth, 8);
    }

    #[test]
    fn test_get_missing_batch() {
        let (store, _) = test_store(1_000, 4);
        let err = store.get(&BatchId::repeat_byte(9)).unwrap_err();
        assert!(matches!(err, BatchStoreError::NotFound));
    }

    #[test]
    fn test_get_radius_is_capped_by_storage_radius() {
        let (store, _) = test_store(1_000, 4);
        let batch = test_batch(1, 0, 8);
        store.put(batch.clone(), U256::from(10u64), 8).unwrap();

        // storage radius starts at zero, so the effective radius is zero
        assert_eq!(store.get(&batch.id).unwrap().radius, 0);

        // raise the storage radius past the tier radius
        store.set_reserve_state(ReserveState {
            storage_radius: 30,
            ..store.reserve_state()
        });
        let tier_radius = {
            let rs = store.reserve_state();
            rs.radius_of(rs.tier(&U256::from(10u64)))
        };
        assert_eq!(store.get(&batch.id).unwrap().radius, tier_radius);
    }

    #[test]
    fn test_first_batch_sets_limits() {
        let (store, _) = test_store(1_000, 4);
        store.put(test_batch(1, 0, 8), U256::from(50u64), 8).unwrap();

        let rs = store.reserve_state();
        assert_eq!(rs.inner, U256::from(50u64));
        // evict_outer did not run, so outer keeps the collapsed limit
        assert_eq!(rs.outer, U256::from(50u64));
        // an outer tier batch of depth 8 occupies 2 * 2^(8-4-1) chunks
        assert_eq!(rs.available, 1_000 - 16);
    }

    #[test]
    fn test_evict_outer_restores_capacity() {
        // capacity of 4 with depth-8 batches (outer share 16) forces
        // immediate eviction of the lowest value
        let (store, _) = test_store(4, 4);
        store.put(test_batch(1, 0, 8), U256::from(10u64), 8).unwrap();

        let rs = store.reserve_state();
        assert!(rs.available >= 0, "available = {}", rs.available);
        assert!(rs.radius > 4, "radius should have grown, got {}", rs.radius);

        // the eviction trail is queued for the chunk store, radii
        // non-decreasing per batch
        let items = drain(&store);
        assert!(!items.is_empty());
        for pair in items.windows(2) {
            assert!(pair[0].radius <= pair[1].radius);
        }
    }

    #[test]
    fn test_unreserve_queue_is_fifo() {
        let (store, _) = test_store(1_000, 4);
        for (n, radius) in [(1u8, 3u8), (2, 5), (3, 4)] {
            store.enqueue_unreserve(&BatchId::repeat_byte(n), radius).unwrap();
        }
        let items = drain(&store);
        assert_eq!(
            items,
            vec![
                UnreserveItem { batch_id: BatchId::repeat_byte(1), radius: 3 },
                UnreserveItem { batch_id: BatchId::repeat_byte(2), radius: 5 },
                UnreserveItem { batch_id: BatchId::repeat_byte(3), radius: 4 },
            ]
        );
        // drained entries are gone
        assert!(drain(&store).is_empty());
    }

    #[test]
    fn test_unreserve_raises_storage_radius() {
        let (store, _) = test_store(1_000, 4);
        for (n, radius) in [(1u8, 3u8), (2, 5), (3, 4), (4, 6), (5, 5)] {
            store.enqueue_unreserve(&BatchId::repeat_byte(n), radius).unwrap();
        }
        drain(&store);
        // the storage radius follows the maximum dequeued radius minus one
        assert_eq!(store.reserve_state().storage_radius, 5);
    }

    #[test]
    fn test_unreserve_stop_leaves_remainder_queued() {
        let (store, _) = test_store(1_000, 4);
        for n in 1u8..=3 {
            store.enqueue_unreserve(&BatchId::repeat_byte(n), 2).unwrap();
        }

        let mut seen = 0;
        store
            .unreserve(&mut |_, _| {
                seen += 1;
                Ok(seen == 2)
            })
            .unwrap();
        assert_eq!(seen, 2);

        // the stopped drain kept the third entry
        let rest = drain(&store);
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].batch_id, BatchId::repeat_byte(3));
    }

    #[test]
    fn test_evict_expired_reclaims_capacity() {
        let (store, log) = test_store(1_000, 12);
        store.put(test_batch(1, 0, 5), U256::from(50u64), 5).unwrap();
        store.put(test_batch(2, 0, 5), U256::from(120u64), 5).unwrap();
        store.put(test_batch(3, 0, 5), U256::from(200u64), 5).unwrap();
        log.lock().clear();

        store.set_reserve_state(ReserveState {
            radius: 12,
            storage_radius: 0,
            available: 0,
            inner: U256::from(100u64),
            outer: U256::from(100u64),
        });

        store
            .put_chain_state(ChainState {
                block: 10,
                total_amount: U256::from(150u64),
                current_price: U256::from(1u64),
            })
            .unwrap();

        // batches below the settlement are evicted and deleted
        assert_eq!(
            log.lock().clone(),
            vec![BatchId::repeat_byte(1), BatchId::repeat_byte(2)]
        );
        assert!(!store.exists(&BatchId::repeat_byte(1)).unwrap());
        assert!(!store.exists(&BatchId::repeat_byte(2)).unwrap());
        assert!(store.exists(&BatchId::repeat_byte(3)).unwrap());

        let rs = store.reserve_state();
        assert_eq!(rs.inner, U256::from(151u64));
        assert_eq!(rs.outer, U256::from(151u64));
        // value 50 lies below inner (multiplier 0), value 120 beyond both
        // limits (multiplier 2, depth-5 share of one chunk)
        assert_eq!(rs.available, 2);
    }

    #[test]
    fn test_chain_state_roundtrip() {
        let (store, _) = test_store(1_000, 4);
        let cs = ChainState {
            block: 42,
            total_amount: U256::from(7u64),
            current_price: U256::from(3u64),
        };
        store.put_chain_state(cs.clone()).unwrap();
        assert_eq!(store.chain_state(), cs);
    }

    #[test]
    fn test_radius_setter_is_notified() {
        struct Recorder(EvictLog);
        impl RadiusSetter for Recorder {
            fn set_radius(&self, radius: u8) {
                self.0.lock().push(BatchId::repeat_byte(radius));
            }
        }

        let (store, _) = test_store(1_000, 4);
        let radii: EvictLog = Arc::new(PlMutex::new(Vec::new()));
        store.set_radius_setter(Box::new(Recorder(radii.clone())));

        store.put(test_batch(1, 0, 8), U256::from(10u64), 8).unwrap();
        assert!(!radii.lock().is_empty());
    }

    #[test]
    fn test_reset_restores_initial_state() {
        let (store, _) = test_store(1_000, 4);
        store.put(test_batch(1, 0, 8), U256::from(10u64), 8).unwrap();
        store
            .put_chain_state(ChainState {
                block: 5,
                total_amount: U256::from(1u64),
                current_price: U256::from(1u64),
            })
            .unwrap();

        store.reset().unwrap();

        assert!(!store.exists(&BatchId::repeat_byte(1)).unwrap());
        assert_eq!(store.chain_state(), ChainState::default());
        let rs = store.reserve_state();
        assert_eq!(rs.available, 1_000);
        assert_eq!(rs.radius, 4);
        assert!(drain(&store).is_empty());
    }
}
