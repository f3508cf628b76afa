use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::BatchId;

// Size of components in a `Stamp`
const BATCH_ID_SIZE: usize = 32;
const BUCKET_INDEX_SIZE: usize = std::mem::size_of::<u32>();
const BUCKET_SLOT_SIZE: usize = std::mem::size_of::<u32>();
const TIMESTAMP_SIZE: usize = std::mem::size_of::<u64>();
const SIGNATURE_SIZE: usize = 65;

/// Total wire size of a [`Stamp`].
pub const STAMP_SIZE: usize =
    BATCH_ID_SIZE + BUCKET_INDEX_SIZE + BUCKET_SLOT_SIZE + TIMESTAMP_SIZE + SIGNATURE_SIZE;

/// Captures errors during stamp decoding.
#[derive(Debug, Error)]
pub enum StampError {
    /// Input length differs from [`STAMP_SIZE`].
    #[error("incorrect size, received {0} bytes, expected {1} bytes")]
    IncorrectSize(usize, usize),
}

/// A signed authorization binding a chunk to a paid postage batch.
///
/// The 8-byte within-batch index is split into the bucket selector and the
/// slot within the bucket, both big-endian on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stamp {
    batch_id: BatchId,
    bucket_index: u32,
    bucket_slot: u32,
    timestamp: u64,
    #[serde(with = "serde_sig")]
    signature: [u8; SIGNATURE_SIZE],
}

impl Stamp {
    /// Creates a new `Stamp`.
    pub fn new(
        batch_id: BatchId,
        bucket_index: u32,
        bucket_slot: u32,
        timestamp: u64,
        signature: [u8; SIGNATURE_SIZE],
    ) -> Self {
        Self { batch_id, bucket_index, bucket_slot, timestamp, signature }
    }

    /// Returns the `batch_id` of the stamp.
    pub fn batch_id(&self) -> &BatchId {
        &self.batch_id
    }

    /// Returns the bucket index of the stamp.
    pub fn bucket_index(&self) -> u32 {
        self.bucket_index
    }

    /// Returns the slot within the bucket.
    pub fn bucket_slot(&self) -> u32 {
        self.bucket_slot
    }

    /// Returns the stamp timestamp.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Returns the stamp signature.
    pub fn signature(&self) -> &[u8; SIGNATURE_SIZE] {
        &self.signature
    }

    /// The full 8-byte within-batch index, `bucket_index ‖ bucket_slot`.
    pub fn index_bytes(&self) -> [u8; 8] {
        let mut out = [0u8; 8];
        out[..4].copy_from_slice(&self.bucket_index.to_be_bytes());
        out[4..].copy_from_slice(&self.bucket_slot.to_be_bytes());
        out
    }
}

impl From<&Stamp> for Bytes {
    fn from(stamp: &Stamp) -> Self {
        let mut buf = BytesMut::with_capacity(STAMP_SIZE);
        buf.put_slice(stamp.batch_id.as_ref());
        buf.put_u32(stamp.bucket_index);
        buf.put_u32(stamp.bucket_slot);
        buf.put_u64(stamp.timestamp);
        buf.put_slice(&stamp.signature);
        buf.freeze()
    }
}

impl TryFrom<Bytes> for Stamp {
    type Error = StampError;

    fn try_from(mut bytes: Bytes) -> Result<Self, StampError> {
        if bytes.len() != STAMP_SIZE {
            return Err(StampError::IncorrectSize(bytes.len(), STAMP_SIZE));
        }

        let batch_id = BatchId::from_slice(&bytes.split_to(BATCH_ID_SIZE));
        let bucket_index = bytes.get_u32();
        let bucket_slot = bytes.get_u32();
        let timestamp = bytes.get_u64();
        let mut signature = [0u8; SIGNATURE_SIZE];
        signature.copy_from_slice(&bytes);

        Ok(Self { batch_id, bucket_index, bucket_slot, timestamp, signature })
    }
}

impl TryFrom<&[u8]> for Stamp {
    type Error = StampError;

    fn try_from(buf: &[u8]) -> Result<Self, StampError> {
        Self::try_from(Bytes::copy_from_slice(buf))
    }
}

mod serde_sig {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(sig: &[u8; 65], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(sig))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 65], D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(s).map_err(serde::de::Error::custom)?;
        bytes.try_into().map_err(|_| serde::de::Error::custom("signature must be 65 bytes"))
    }
}
