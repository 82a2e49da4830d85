//! Bounded key/value cache with LRU eviction and an optional TTL.
//!
//! Two instances with different policies back the crate: a large one with no
//! TTL memoizing upstream game metadata, and a small TTL-bound one counting
//! delivery failures per subscription. Caching is never a correctness
//! dependency; a failed `set` is logged by the caller and ignored.

use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::clock::{Clock, SystemClock};
use crate::error::CacheError;

pub trait Cache<K, V>: Send + Sync {
    /// Returns the value and refreshes its recency, or `None` when the key is
    /// absent or expired.
    fn get(&self, key: &K) -> Option<V>;

    /// Inserts or replaces a value, evicting the least recently used entry
    /// when the cache is full.
    fn set(&self, key: K, value: V) -> Result<(), CacheError>;
}

struct Slot<V> {
    value: V,
    expires_at: Option<Instant>,
}

/// In-memory [`Cache`] that never holds more than `capacity` entries.
///
/// The TTL is global to the instance and restarts on every `set` of a key.
pub struct BoundedCache<K: Hash + Eq, V> {
    entries: Mutex<lru::LruCache<K, Slot<V>>>,
    ttl: Option<Duration>,
    clock: Arc<dyn Clock>,
}

impl<K: Hash + Eq, V> BoundedCache<K, V> {
    /// A zero capacity is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(lru::LruCache::new(capacity)),
            ttl: None,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn capacity(&self) -> usize {
        self.entries
            .lock()
            .map(|entries| entries.cap().get())
            .unwrap_or(0)
    }

    /// Number of stored entries, expired ones included until they are touched
    /// or evicted.
    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Membership check that does not refresh recency.
    pub fn contains(&self, key: &K) -> bool {
        let now = self.clock.now();
        self.entries
            .lock()
            .map(|entries| {
                entries
                    .peek(key)
                    .is_some_and(|slot| !is_expired(slot, now))
            })
            .unwrap_or(false)
    }
}

impl<K, V> Cache<K, V> for BoundedCache<K, V>
where
    K: Hash + Eq + Send,
    V: Clone + Send,
{
    fn get(&self, key: &K) -> Option<V> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().ok()?;

        let expired = is_expired(entries.peek(key)?, now);
        if expired {
            entries.pop(key);
            return None;
        }

        entries.get(key).map(|slot| slot.value.clone())
    }

    fn set(&self, key: K, value: V) -> Result<(), CacheError> {
        let expires_at = self.ttl.map(|ttl| self.clock.now() + ttl);
        let mut entries = self.entries.lock().map_err(|_| CacheError::Poisoned)?;
        entries.put(key, Slot { value, expires_at });
        Ok(())
    }
}

fn is_expired<V>(slot: &Slot<V>, now: Instant) -> bool {
    slot.expires_at.is_some_and(|at| now >= at)
}
