//! Reserve state machine.
//!
//! The reserve maintains batches in two value-ordered tiers. Chunks of
//! batches in the inner tier are kept within `Radius`, chunks of the
//! outer (higher-value) tier within `Radius - 1`. The rules:
//!
//! - if batch `a` is unreserved and `val(b) < val(a)`, then `b` is
//!   unreserved at any proximity order
//! - if a batch is unreserved at proximity order `p`, it is unreserved at
//!   any `p' < p`
//! - total reserved chunks must not exceed the capacity
//! - the reserve is maximally utilised subject to the above

use alloy_primitives::U256;
use apiary_primitives::{postage::BatchId, MAX_PO};
use serde::{Deserialize, Serialize};

use crate::BatchStoreError;

fn read_i64(buf: &[u8]) -> Result<i64, BatchStoreError> {
    let arr: [u8; 8] = buf.try_into().map_err(|_| BatchStoreError::Invalid("i64 segment"))?;
    Ok(i64::from_be_bytes(arr))
}

/// Persisted reserve state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveState {
    /// Radius of responsibility: the proximity order within which all
    /// chunks of reserved batches are guaranteed storage.
    pub radius: u8,
    /// De-facto storage radius, raised as the chunk store works through
    /// the unreserve queue.
    pub storage_radius: u8,
    /// Remaining chunk capacity; transiently negative while evictions
    /// catch up.
    pub available: i64,
    /// Lower value bound of the inner tier.
    pub inner: U256,
    /// Lower value bound of the outer tier.
    pub outer: U256,
}

const RESERVE_STATE_SIZE: usize = 1 + 1 + 8 + 32 + 32;

impl ReserveState {
    /// Initial state for a reserve of `capacity` chunks.
    pub fn initial(radius: u8, capacity: i64) -> Self {
        Self {
            radius,
            storage_radius: 0,
            available: capacity,
            inner: U256::ZERO,
            outer: U256::ZERO,
        }
    }

    /// Serializes the state into its persisted layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(RESERVE_STATE_SIZE);
        buf.push(self.radius);
        buf.push(self.storage_radius);
        buf.extend_from_slice(&self.available.to_be_bytes());
        buf.extend_from_slice(&self.inner.to_be_bytes::<32>());
        buf.extend_from_slice(&self.outer.to_be_bytes::<32>());
        buf
    }
}

impl TryFrom<&[u8]> for ReserveState {
    type Error = BatchStoreError;

    fn try_from(buf: &[u8]) -> Result<Self, BatchStoreError> {
        if buf.len() != RESERVE_STATE_SIZE {
            return Err(BatchStoreError::Invalid("reserve state record"));
        }
        Ok(Self {
            radius: buf[0],
            storage_radius: buf[1],
            available: read_i64(&buf[2..10])?,
            inner: U256::from_be_slice(&buf[10..42]),
            outer: U256::from_be_slice(&buf[42..74]),
        })
    }
}

/// The value interval a batch falls into.
///
/// `Unreserved` batches are out of the reserve, `Inner` batches are kept
/// within `Radius`, `Outer` batches within `Radius - 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Tier {
    Unreserved,
    Inner,
    Outer,
}

impl ReserveState {
    /// The tier `value` falls into.
    pub(crate) fn tier(&self, value: &U256) -> Tier {
        if *value < self.inner || self.inner == U256::ZERO {
            return Tier::Unreserved;
        }
        if *value < self.outer {
            return Tier::Inner;
        }
        Tier::Outer
    }

    /// Number of chunks the node is responsible to keep for one batch of
    /// `depth` in `tier`. Shallow batches still account for at least one
    /// chunk so the capacity arithmetic converges.
    pub(crate) fn size(&self, depth: u8, tier: Tier) -> i64 {
        let size = exp2(depth.saturating_sub(self.radius.saturating_add(1)));
        match tier {
            Tier::Inner => size,
            Tier::Outer => 2 * size,
            Tier::Unreserved => 0,
        }
    }

    /// Reserve radius of a batch in `tier`.
    pub(crate) fn radius_of(&self, tier: Tier) -> u8 {
        match tier {
            Tier::Unreserved => MAX_PO,
            Tier::Inner => self.radius,
            Tier::Outer => self.radius.saturating_sub(1),
        }
    }

    /// Lowers the tier limits when `value` undercuts them, as happens for
    /// the very first batch or one whose value was diluted. Returns the
    /// adjusted tier.
    pub(crate) fn set_limits(&mut self, value: &U256, new_tier: Tier) -> Tier {
        if new_tier != Tier::Unreserved {
            return new_tier;
        }
        let mut adjusted = new_tier;
        if self.inner == U256::ZERO || self.inner > *value {
            adjusted = Tier::Inner;
            if self.outer == self.inner {
                // the value falls below both limits
                self.outer = *value;
                adjusted = Tier::Outer;
            }
            self.inner = *value;
        }
        adjusted
    }

    /// Capacity change and reserve radius resulting from a batch moving
    /// from `(old_value, old_depth)` to `(new_value, new_depth)`.
    pub(crate) fn change(
        &mut self,
        old_value: &U256,
        new_value: &U256,
        old_depth: u8,
        new_depth: u8,
    ) -> (i64, u8) {
        let old_tier = self.tier(old_value);
        let new_tier = {
            let tier = self.tier(new_value);
            self.set_limits(new_value, tier)
        };

        let old_size = self.size(old_depth, old_tier);
        let new_size = self.size(new_depth, new_tier);

        (old_size - new_size, self.radius_of(new_tier))
    }
}

/// A queued unreserve event: batch `batch_id` loses reserve protection in
/// bins below `radius`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnreserveItem {
    /// The batch to unreserve.
    pub batch_id: BatchId,
    /// Proximity order below which the batch is unreserved.
    pub radius: u8,
}

const UNRESERVE_ITEM_SIZE: usize = 32 + 1;

impl UnreserveItem {
    /// Serializes the item into its persisted layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(UNRESERVE_ITEM_SIZE);
        buf.extend_from_slice(self.batch_id.as_ref());
        buf.push(self.radius);
        buf
    }
}

impl TryFrom<&[u8]> for UnreserveItem {
    type Error = BatchStoreError;

    fn try_from(buf: &[u8]) -> Result<Self, BatchStoreError> {
        if buf.len() != UNRESERVE_ITEM_SIZE {
            return Err(BatchStoreError::Invalid("unreserve item record"));
        }
        Ok(Self { batch_id: BatchId::from_slice(&buf[..32]), radius: buf[32] })
    }
}

/// The `e`-th power of two, clamped to avoid shift overflow.
pub(crate) fn exp2(e: u8) -> i64 {
    1i64 << e.min(62)
}
