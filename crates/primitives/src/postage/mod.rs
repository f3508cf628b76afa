//! Postage primitives: stamps, batches, chain state, and the callback
//! seams wiring the batch reserve to the chunk store.
//!
//! The two stores reference each other only through injected callbacks:
//! the chunk store consumes the reserve's unreserve queue, and the reserve
//! asks the chunk store to evict whole batches. Both seams are defined
//! here so neither crate depends on the other.

mod batch;
mod stamp;

pub use batch::{Batch, BatchId, ChainState, PostageError};
pub use stamp::{Stamp, StampError, STAMP_SIZE};

/// Error type carried across the store-to-store callback seams.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// Result type for callback invocations.
pub type CallbackResult<T> = std::result::Result<T, CallbackError>;

/// Evicts every chunk of a batch from the chunk store.
pub type EvictFn = Box<dyn Fn(&BatchId) -> CallbackResult<()> + Send + Sync>;

/// Callback invoked per dequeued unreserve item. Returns `true` to stop
/// the drain.
pub type UnreserveIterFn<'a> = &'a mut dyn FnMut(&BatchId, u8) -> CallbackResult<bool>;

/// Drains the unreserve queue, feeding each item to the iterator callback.
pub type UnreserveFn = Box<dyn Fn(UnreserveIterFn<'_>) -> CallbackResult<()> + Send + Sync>;

/// Receives notifications when the reserve radius changes.
pub trait RadiusSetter: Send + Sync {
    /// Called with the new radius of responsibility.
    fn set_radius(&self, radius: u8);
}
