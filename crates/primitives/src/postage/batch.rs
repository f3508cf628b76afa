//! Postage batch and chain-state records.
//!
//! A batch represents a funded bucket of storage capacity: `2^depth` chunks
//! may be stamped against it, and its accrued `value` determines its
//! priority in the reserve. Records are persisted with a fixed big-endian
//! layout so the value index sorts lexicographically.

use alloy_primitives::{Address, FixedBytes, U256};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unique identifier of a batch, generally `H(nonce|owner)`.
pub type BatchId = FixedBytes<32>;

// Wire sizes of the persisted records.
const BATCH_SIZE: usize = 32 + 32 + 8 + 20 + 1 + 1 + 1 + 1;
const CHAIN_STATE_SIZE: usize = 8 + 32 + 32;

/// Captures errors while decoding persisted postage records.
#[derive(Debug, Error)]
pub enum PostageError {
    /// Input length differs from the record's fixed layout.
    #[error("incorrect size, received {0} bytes, expected {1} bytes")]
    IncorrectSize(usize, usize),
}

/// A postage batch record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    /// The unique identifier of the batch.
    pub id: BatchId,
    /// The accrued balance of the batch, its reservation priority.
    pub value: U256,
    /// Block number the batch was created at.
    pub start: u64,
    /// The address that owns the batch and signs its stamps.
    pub owner: Address,
    /// `2^depth` is the number of chunks the batch may stamp.
    pub depth: u8,
    /// Number of leading address bits selecting the stamp bucket.
    pub bucket_depth: u8,
    /// Whether the batch is immutable.
    pub immutable: bool,
    /// Reserve radius, fixed per-get by the batch reserve.
    pub radius: u8,
}

impl Batch {
    /// Returns the number of chunks coverable by a batch of `depth`.
    pub const fn chunks(depth: u8) -> u64 {
        1u64 << depth
    }

    /// Serializes the batch into its persisted layout.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(BATCH_SIZE);
        buf.put_slice(self.id.as_ref());
        buf.put_slice(&self.value.to_be_bytes::<32>());
        buf.put_u64(self.start);
        buf.put_slice(self.owner.as_ref());
        buf.put_u8(self.depth);
        buf.put_u8(self.bucket_depth);
        buf.put_u8(self.immutable as u8);
        buf.put_u8(self.radius);
        buf.freeze()
    }
}

impl TryFrom<&[u8]> for Batch {
    type Error = PostageError;

    fn try_from(buf: &[u8]) -> Result<Self, PostageError> {
        if buf.len() != BATCH_SIZE {
            return Err(PostageError::IncorrectSize(buf.len(), BATCH_SIZE));
        }
        let mut bytes = Bytes::copy_from_slice(buf);
        let id = BatchId::from_slice(&bytes.split_to(32));
        let value = U256::from_be_slice(&bytes.split_to(32));
        let start = bytes.get_u64();
        let owner = Address::from_slice(&bytes.split_to(20));
        let depth = bytes.get_u8();
        let bucket_depth = bytes.get_u8();
        let immutable = bytes.get_u8() != 0;
        let radius = bytes.get_u8();

        Ok(Self { id, value, start, owner, depth, bucket_depth, immutable, radius })
    }
}

/// Chain state fed to the batch reserve by the external chain listener.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainState {
    /// Block number of the last seen settlement.
    pub block: u64,
    /// Cumulative amount paid out per chunk up to `block`.
    pub total_amount: U256,
    /// Price per chunk per block.
    pub current_price: U256,
}

impl ChainState {
    /// Serializes the chain state into its persisted layout.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(CHAIN_STATE_SIZE);
        buf.put_u64(self.block);
        buf.put_slice(&self.total_amount.to_be_bytes::<32>());
        buf.put_slice(&self.current_price.to_be_bytes::<32>());
        buf.freeze()
    }
}

impl TryFrom<&[u8]> for ChainState {
    type Error = PostageError;

    fn try_from(buf: &[u8]) -> Result<Self, PostageError> {
        if buf.len() != CHAIN_STATE_SIZE {
            return Err(PostageError::IncorrectSize(buf.len(), CHAIN_STATE_SIZE));
        }
        let mut bytes = Bytes::copy_from_slice(buf);
        let block = bytes.get_u64();
        let total_amount = U256::from_be_slice(&bytes.split_to(32));
        let current_price = U256::from_be_slice(&bytes.split_to(32));

        Ok(Self { block, total_amount, current_price })
    }
}
