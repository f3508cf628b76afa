//! Core primitive types for the apiary chunk store
//!
//! This crate defines the basic types shared by the storage layers: chunk
//! addresses and proximity order, the chunk carrier type, and the postage
//! stamp / batch records.

#![warn(missing_docs)]

use core::fmt::{self, Debug, Display, Formatter};

/// Chunk carrier type
pub mod chunk;
pub use chunk::{Chunk, CHUNK_SIZE, SPAN_SIZE};

/// Postage stamps, batches and the callback seams between the stores
pub mod postage;
pub use postage::{Batch, BatchId, ChainState, Stamp};

/// Proximity-order calculation
pub mod proximity;
pub use proximity::{proximity, MAX_BINS, MAX_PO};

/// Re-exports from alloy-primitives to ensure consistent usage
pub use alloy_primitives::{Address, FixedBytes, B256, U256};

/// A 32-byte address for chunks in the network
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChunkAddress(pub [u8; 32]);

impl ChunkAddress {
    /// Creates a new ChunkAddress from raw bytes
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Creates a ChunkAddress from a slice, returning `None` when the
    /// slice is not exactly 32 bytes
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    /// Returns the underlying bytes
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Calculate the proximity order (0..=MAX_PO) between two addresses
    pub fn proximity(&self, other: &Self) -> u8 {
        proximity(&self.0, &other.0)
    }
}

impl From<[u8; 32]> for ChunkAddress {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for ChunkAddress {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Debug for ChunkAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkAddress({})", hex::encode(&self.0[..4]))
    }
}

impl Display for ChunkAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..4]))
    }
}
