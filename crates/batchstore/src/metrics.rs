//! Batch store metrics.

use metrics::Gauge;

/// Batch store metrics.
#[derive(Clone)]
pub(crate) struct BatchStoreMetrics {
    /// Radius of responsibility.
    pub(crate) radius: Gauge,
    /// Realised storage radius.
    pub(crate) storage_radius: Gauge,
    /// Remaining reserve capacity.
    pub(crate) available: Gauge,
    /// Lower value bound of the inner reservation tier.
    pub(crate) inner: Gauge,
    /// Lower value bound of the outer reservation tier.
    pub(crate) outer: Gauge,
}

impl Default for BatchStoreMetrics {
    fn default() -> Self {
        Self {
            radius: metrics::gauge!("batchstore.reserve.radius"),
            storage_radius: metrics::gauge!("batchstore.reserve.storage_radius"),
            available: metrics::gauge!("batchstore.reserve.available"),
            inner: metrics::gauge!("batchstore.reserve.inner"),
            outer: metrics::gauge!("batchstore.reserve.outer"),
        }
    }
}
