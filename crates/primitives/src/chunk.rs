//! The chunk carrier type threaded through the storage layers.

use bytes::Bytes;

use crate::{postage::Stamp, ChunkAddress};

/// Maximum chunk payload size in bytes.
pub const CHUNK_SIZE: usize = 4096;

/// Size of the span prefix carried by content chunks.
pub const SPAN_SIZE: usize = 8;

/// Batch metadata attached to a chunk by the stamp-validation layer.
///
/// The values are a snapshot of the batch record at validation time; the
/// chunk store uses `radius` to decide whether the chunk belongs to the
/// reserve and `depth`/`bucket_depth` to police stamp bucket occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchMeta {
    /// Reserve radius of the batch.
    pub radius: u8,
    /// `2^depth` is the number of chunks the batch may stamp.
    pub depth: u8,
    /// Number of leading address bits selecting the stamp bucket.
    pub bucket_depth: u8,
    /// Whether the batch is immutable.
    pub immutable: bool,
}

/// An addressable unit of content with an optional postage stamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    address: ChunkAddress,
    data: Bytes,
    stamp: Option<Stamp>,
    batch: Option<BatchMeta>,
}

impl Chunk {
    /// Creates a new chunk from an address and payload.
    pub fn new(address: ChunkAddress, data: impl Into<Bytes>) -> Self {
        Self { address, data: data.into(), stamp: None, batch: None }
    }

    /// Attaches a postage stamp.
    pub fn with_stamp(mut self, stamp: Stamp) -> Self {
        self.stamp = Some(stamp);
        self
    }

    /// Attaches batch metadata from stamp validation.
    pub fn with_batch(mut self, radius: u8, depth: u8, bucket_depth: u8, immutable: bool) -> Self {
        self.batch = Some(BatchMeta { radius, depth, bucket_depth, immutable });
        self
    }

    /// Returns the chunk address.
    pub const fn address(&self) -> &ChunkAddress {
        &self.address
    }

    /// Returns the chunk payload.
    pub const fn data(&self) -> &Bytes {
        &self.data
    }

    /// Returns the attached stamp, if any.
    pub const fn stamp(&self) -> Option<&Stamp> {
        self.stamp.as_ref()
    }

    /// Returns the attached batch metadata, if any.
    pub const fn batch(&self) -> Option<&BatchMeta> {
        self.batch.as_ref()
    }

    /// Reserve radius of the chunk's batch. Chunks without batch metadata
    /// can never fall within a node's radius of responsibility.
    pub fn radius(&self) -> u8 {
        self.batch.map(|b| b.radius).unwrap_or(u8::MAX)
    }
}
