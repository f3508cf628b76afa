//! Chunk retrieval across the get modes.

use apiary_primitives::{Chunk, ChunkAddress};
use apiary_storage::{Item, WriteBatch};

use crate::{db::DB, Result};

/// Modes of getting chunks from the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeGet {
    /// Retrieval on behalf of a download; refreshes the chunk's recency.
    Request,
    /// Plain lookup with no side effects.
    Lookup,
    /// Lookup during pinning traversal; no side effects.
    Pin,
}

impl DB {
    /// Returns the chunk stored under `address`.
    ///
    /// [`ModeGet::Request`] additionally refreshes the access timestamp
    /// and re-keys the gc entry so recently served chunks survive garbage
    /// collection longest.
    pub fn get(&self, mode: ModeGet, address: &ChunkAddress) -> Result<Chunk> {
        let mut item =
            self.retrieval_data_index.get(&Item::with_address(address.as_bytes().to_vec()))?;
        item.bin = self.po(address);

        if mode == ModeGet::Request {
            let mut guard = self.batch_mu.lock();
            if guard.gc_running {
                guard.dirty.push(*address);
            }
            let mut batch = WriteBatch::new();
            self.set_access_in_batch(&mut batch, &mut item)?;
            self.backend.write_batch(batch)?;
            drop(guard);
        }

        self.item_to_chunk(&item)
    }

    /// Whether a chunk is stored under `address`.
    pub fn has(&self, address: &ChunkAddress) -> Result<bool> {
        Ok(self.retrieval_data_index.has(&Item::with_address(address.as_bytes().to_vec()))?)
    }
}
