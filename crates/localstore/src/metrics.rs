//! Chunk store metrics.

use metrics::{Counter, Gauge};

/// Chunk store metrics.
#[derive(Clone)]
pub(crate) struct LocalStoreMetrics {
    /// Number of garbage collection runs.
    pub(crate) gc_runs_total: Counter,
    /// Number of failed garbage collection runs.
    pub(crate) gc_errors_total: Counter,
    /// Number of chunks removed by garbage collection.
    pub(crate) gc_collected_total: Counter,
    /// Current number of garbage collection candidates.
    pub(crate) gc_size: Gauge,
    /// Number of reserve eviction runs.
    pub(crate) evict_reserve_runs_total: Counter,
    /// Number of failed reserve eviction runs.
    pub(crate) evict_reserve_errors_total: Counter,
    /// Number of chunks moved from the reserve to the cache.
    pub(crate) evict_reserve_collected_total: Counter,
    /// Current number of reserved chunks.
    pub(crate) reserve_size: Gauge,
}

impl Default for LocalStoreMetrics {
    fn default() -> Self {
        Self {
            gc_runs_total: metrics::counter!("localstore.gc.runs_total"),
            gc_errors_total: metrics::counter!("localstore.gc.errors_total"),
            gc_collected_total: metrics::counter!("localstore.gc.collected_total"),
            gc_size: metrics::gauge!("localstore.gc.size"),
            evict_reserve_runs_total: metrics::counter!("localstore.evict_reserve.runs_total"),
            evict_reserve_errors_total: metrics::counter!("localstore.evict_reserve.errors_total"),
            evict_reserve_collected_total: metrics::counter!(
                "localstore.evict_reserve.collected_total"
            ),
            reserve_size: metrics::gauge!("localstore.reserve.size"),
        }
    }
}
