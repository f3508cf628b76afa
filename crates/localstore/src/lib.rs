//! Chunk store with cache garbage collection and reserve eviction.
//!
//! This crate provides the storage core of the node:
//! - [`DB`] - chunk persistence over seven secondary indexes sharing one
//!   keyed backend
//! - garbage collection of cache-class chunks, oldest access first
//! - reserve eviction driven by the postage batch reserve's unreserve
//!   queue
//! - push and pull synchronisation subscriptions
//!
//! # Architecture
//!
//! ```text
//! DB
//! ├── retrievalData   address -> record            (primary store)
//! ├── retrievalAccess address -> accessTs          (recency)
//! ├── push            storeTs ‖ address            (push sync feed)
//! ├── pull            bin ‖ binID -> descriptor    (pull sync feed)
//! ├── gc              accessTs ‖ binID ‖ address   (eviction candidates)
//! ├── postageChunks   batchID ‖ bin ‖ binID        (reserve membership)
//! ├── postageIndex    batchID ‖ index -> address   (stamp replacement)
//! └── pin             address -> counter
//! ```
//!
//! All multi-index writes are serialised by one batch mutex and committed
//! as a single atomic backend write, so no partial update is ever
//! visible.

mod db;
mod error;
mod gc;
mod get;
mod metrics;
mod pull;
mod push;
mod put;
mod reserve;
mod set;

pub use db::{Options, DB};
pub use error::LocalStoreError;
pub use get::ModeGet;
pub use pull::{PullItem, PullSubscription};
pub use push::PushSubscription;
pub use put::ModePut;
pub use set::ModeSet;

/// Result type for chunk store operations.
pub type Result<T> = std::result::Result<T, LocalStoreError>;

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use apiary_primitives::{
        postage::{BatchId, Stamp},
        Chunk, ChunkAddress, MAX_BINS,
    };
    use apiary_storage::{KeyStore, MemoryStore};

    use super::*;

    fn test_db(cache_capacity: u64, reserve_capacity: u64) -> Arc<DB> {
        let backend: Arc<dyn KeyStore> = Arc::new(MemoryStore::new());
        DB::open(
            backend,
            ChunkAddress::new([0u8; 32]),
            Options { cache_capacity, reserve_capacity },
        )
        .unwrap()
    }

    fn random_stamp(batch_id: BatchId) -> Stamp {
        Stamp::new(batch_id, rand::random::<u16>() as u32, rand::random::<u16>() as u32, 0, [
            0x5a; 65
        ])
    }

    /// A random chunk without batch metadata; never within any radius,
    /// so it is always cache-class.
    fn random_chunk() -> Chunk {
        let address = ChunkAddress::new(rand::random());
        let data = rand::random::<[u8; 16]>().to_vec();
        Chunk::new(address, data).with_stamp(random_stamp(BatchId::from(rand::random::<[u8; 32]>())))
    }

    /// A random chunk of `batch_id` with radius zero, so it is reserved
    /// in every bin.
    fn reserved_chunk(batch_id: BatchId) -> Chunk {
        let address = ChunkAddress::new(rand::random());
        let data = rand::random::<[u8; 16]>().to_vec();
        Chunk::new(address, data)
            .with_stamp(random_stamp(batch_id))
            .with_batch(0, 32, 16, false)
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let db = test_db(100, 100);
        let chunk = random_chunk();

        let exists = db.put(ModePut::Upload, std::slice::from_ref(&chunk)).unwrap();
        assert_eq!(exists, vec![false]);
        assert!(db.has(chunk.address()).unwrap());

        let got = db.get(ModeGet::Lookup, chunk.address()).unwrap();
        assert_eq!(got.address(), chunk.address());
        assert_eq!(got.data(), chunk.data());
        assert_eq!(got.stamp(), chunk.stamp());
    }

    #[tokio::test]
    async fn test_put_is_idempotent() {
        let db = test_db(100, 100);
        let chunk = random_chunk();

        assert_eq!(db.put(ModePut::Upload, std::slice::from_ref(&chunk)).unwrap(), vec![false]);
        assert_eq!(db.put(ModePut::Upload, std::slice::from_ref(&chunk)).unwrap(), vec![true]);
    }

    #[tokio::test]
    async fn test_get_missing_chunk() {
        let db = test_db(100, 100);
        let err = db.get(ModeGet::Lookup, &ChunkAddress::new([7u8; 32])).unwrap_err();
        assert!(matches!(err, LocalStoreError::NotFound));
    }

    #[tokio::test]
    async fn test_request_put_is_gc_candidate() {
        let db = test_db(100, 100);
        let chunk = random_chunk();

        db.put(ModePut::Request, std::slice::from_ref(&chunk)).unwrap();
        assert_eq!(db.gc_size().unwrap(), 1);

        // refreshing recency re-keys the entry without growing the index
        db.get(ModeGet::Request, chunk.address()).unwrap();
        assert_eq!(db.gc_size().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_upload_enters_gc_on_sync() {
        let db = test_db(100, 100);
        let chunk = random_chunk();

        db.put(ModePut::Upload, std::slice::from_ref(&chunk)).unwrap();
        assert_eq!(db.gc_size().unwrap(), 0);

        db.set(ModeSet::Sync, &[*chunk.address()]).unwrap();
        assert_eq!(db.gc_size().unwrap(), 1);

        // a second sync is a no-op
        db.set(ModeSet::Sync, &[*chunk.address()]).unwrap();
        assert_eq!(db.gc_size().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_remove_clears_all_state() {
        let db = test_db(100, 100);
        let chunk = random_chunk();

        db.put(ModePut::Request, std::slice::from_ref(&chunk)).unwrap();
        db.set(ModeSet::Remove, &[*chunk.address()]).unwrap();

        assert!(!db.has(chunk.address()).unwrap());
        assert_eq!(db.gc_size().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_pin_withdraws_from_gc() {
        let db = test_db(100, 100);
        let chunk = random_chunk();

        db.put(ModePut::Request, std::slice::from_ref(&chunk)).unwrap();
        assert_eq!(db.gc_size().unwrap(), 1);

        db.set(ModeSet::Pin, &[*chunk.address()]).unwrap();
        assert_eq!(db.gc_size().unwrap(), 0);

        // pin twice, unpin once: still pinned
        db.set(ModeSet::Pin, &[*chunk.address()]).unwrap();
        db.set(ModeSet::Unpin, &[*chunk.address()]).unwrap();
        assert_eq!(db.gc_size().unwrap(), 0);

        // last unpin reinstates gc eligibility
        db.set(ModeSet::Unpin, &[*chunk.address()]).unwrap();
        assert_eq!(db.gc_size().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unpin_without_pin_fails() {
        let db = test_db(100, 100);
        let chunk = random_chunk();
        db.put(ModePut::Request, std::slice::from_ref(&chunk)).unwrap();

        let err = db.set(ModeSet::Unpin, &[*chunk.address()]).unwrap_err();
        assert!(matches!(err, LocalStoreError::NotFound));
    }

    #[tokio::test]
    async fn test_stamp_replacement_evicts_prior_chunk() {
        let db = test_db(100, 100);
        let batch_id = BatchId::from(rand::random::<[u8; 32]>());
        let stamp = random_stamp(batch_id);

        let first = Chunk::new(ChunkAddress::new(rand::random()), b"one".to_vec())
            .with_stamp(stamp.clone());
        let second = Chunk::new(ChunkAddress::new(rand::random()), b"two".to_vec())
            .with_stamp(stamp);

        db.put(ModePut::Upload, std::slice::from_ref(&first)).unwrap();
        db.put(ModePut::Upload, std::slice::from_ref(&second)).unwrap();

        assert!(!db.has(first.address()).unwrap());
        assert!(db.has(second.address()).unwrap());
    }

    #[tokio::test]
    async fn test_reserved_chunk_skips_gc() {
        let db = test_db(100, 100);
        let batch_id = BatchId::from(rand::random::<[u8; 32]>());
        let chunk = reserved_chunk(batch_id);

        db.put(ModePut::Request, std::slice::from_ref(&chunk)).unwrap();
        assert_eq!(db.gc_size().unwrap(), 0);
        assert_eq!(db.reserve_size().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unreserve_batch_moves_reserve_to_cache() {
        let db = test_db(100, 100);
        let batch_id = BatchId::from(rand::random::<[u8; 32]>());

        let chunks: Vec<_> = (0..4).map(|_| reserved_chunk(batch_id)).collect();
        db.put(ModePut::Request, &chunks).unwrap();
        assert_eq!(db.reserve_size().unwrap(), 4);
        assert_eq!(db.gc_size().unwrap(), 0);

        let evicted = db.unreserve_batch(&batch_id, MAX_BINS).unwrap();
        assert_eq!(evicted, 4);
        assert_eq!(db.reserve_size().unwrap(), 0);
        assert_eq!(db.gc_size().unwrap(), 4);

        // unreserving again finds nothing
        assert_eq!(db.unreserve_batch(&batch_id, MAX_BINS).unwrap(), 0);

        // the chunks survive as cache entries
        for chunk in &chunks {
            assert!(db.has(chunk.address()).unwrap());
        }
    }

    #[tokio::test]
    async fn test_unreserve_batch_spares_pinned_chunks() {
        let db = test_db(100, 100);
        let batch_id = BatchId::from(rand::random::<[u8; 32]>());
        let chunk = reserved_chunk(batch_id);

        db.put(ModePut::Request, std::slice::from_ref(&chunk)).unwrap();
        db.set(ModeSet::Pin, &[*chunk.address()]).unwrap();

        let evicted = db.unreserve_batch(&batch_id, MAX_BINS).unwrap();
        assert_eq!(evicted, 0);
        assert_eq!(db.reserve_size().unwrap(), 0);
        assert_eq!(db.gc_size().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_bucket_full_is_rejected() {
        let db = test_db(100, 100);
        let batch_id = BatchId::from(rand::random::<[u8; 32]>());
        // depth == bucket depth leaves exactly one slot per bucket
        let chunk = Chunk::new(ChunkAddress::new(rand::random()), b"data".to_vec())
            .with_stamp(Stamp::new(batch_id, 0, 1, 0, [0x5a; 65]))
            .with_batch(0, 16, 16, false);

        let err = db.put(ModePut::Upload, std::slice::from_ref(&chunk)).unwrap_err();
        assert!(matches!(err, LocalStoreError::BucketFull));
    }

    #[tokio::test]
    async fn test_missing_stamp_is_rejected() {
        let db = test_db(100, 100);
        let chunk = Chunk::new(ChunkAddress::new(rand::random()), b"data".to_vec());
        let err = db.put(ModePut::Upload, std::slice::from_ref(&chunk)).unwrap_err();
        assert!(matches!(err, LocalStoreError::Invalid(_)));
    }

    #[tokio::test]
    async fn test_overlay_change_is_rejected() {
        let backend: Arc<dyn KeyStore> = Arc::new(MemoryStore::new());
        let db = DB::open(backend.clone(), ChunkAddress::new([1u8; 32]), Options::default())
            .unwrap();
        drop(db);

        let err = DB::open(backend, ChunkAddress::new([2u8; 32]), Options::default()).unwrap_err();
        assert!(matches!(err, LocalStoreError::OverlayChanged));
    }

    #[tokio::test]
    async fn test_last_pull_subscription_bin_id_advances() {
        let db = test_db(100, 100);
        let chunk = random_chunk();
        let bin = {
            // the test base address is all zeros
            let base = ChunkAddress::new([0u8; 32]);
            base.proximity(chunk.address())
        };

        assert_eq!(db.last_pull_subscription_bin_id(bin).unwrap(), 0);
        db.put(ModePut::Upload, std::slice::from_ref(&chunk)).unwrap();
        assert_eq!(db.last_pull_subscription_bin_id(bin).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_close_is_terminal() {
        let db = test_db(100, 100);
        db.close().await.unwrap();

        let err = db.put(ModePut::Upload, &[random_chunk()]).unwrap_err();
        assert!(matches!(err, LocalStoreError::Closed));
    }
}
