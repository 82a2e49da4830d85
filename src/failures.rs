use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::cache::{BoundedCache, Cache};
use crate::types::SubscriptionId;

/// Consecutive delivery failures per subscription.
///
/// Counts live in a TTL-bound cache, so a subscriber is forgiven once the
/// cooling-off window passes without a new failure. Counts are never
/// decremented; the whole entry expires.
pub struct FailureTracker {
    cache: Arc<dyn Cache<SubscriptionId, u32>>,
    threshold: u32,
    // get + set must not interleave between concurrent deliveries
    increment: Mutex<()>,
}

impl FailureTracker {
    pub fn new(capacity: usize, cooling_off: Duration, threshold: u32) -> Self {
        let cache = BoundedCache::new(capacity).with_ttl(cooling_off);
        Self::with_cache(Arc::new(cache), threshold)
    }

    pub fn with_cache(cache: Arc<dyn Cache<SubscriptionId, u32>>, threshold: u32) -> Self {
        Self {
            cache,
            threshold,
            increment: Mutex::new(()),
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn count(&self, id: &SubscriptionId) -> u32 {
        self.cache.get(id).unwrap_or(0)
    }

    pub fn should_discard(&self, id: &SubscriptionId) -> bool {
        let count = self.count(id);
        if count > 0 {
            tracing::debug!(subscription = %id, failures = count, "subscription failure count");
        }
        count >= self.threshold
    }

    /// Returns the new count. A cache write error is logged and the count
    /// simply is not remembered.
    pub fn record_failure(&self, id: &SubscriptionId) -> u32 {
        let _guard = self.increment.lock().unwrap_or_else(PoisonError::into_inner);
        let count = self.count(id).saturating_add(1);
        if let Err(err) = self.cache.set(id.clone(), count) {
            tracing::warn!(subscription = %id, error = %err, "failed to set failure count");
        }
        count
    }
}
