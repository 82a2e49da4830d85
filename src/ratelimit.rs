//! Per-endpoint token buckets guarding inbound webhook calls.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::clock::{Clock, SystemClock};

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Tokens added per second.
    pub refill_per_sec: u32,
    /// Bucket capacity, and the number of calls a fresh bucket admits at once.
    pub burst: u32,
    /// Buckets untouched for this long are dropped by [`RateLimiter::sweep_idle`].
    pub idle_ttl: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            refill_per_sec: 5,
            burst: 5,
            idle_ttl: Duration::from_secs(10 * 60),
        }
    }
}

/// Token bucket rate limiter.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(capacity: u32, refill_per_sec: u32, now: Instant) -> Self {
        let cap = capacity.max(1) as f64;
        Self {
            capacity: cap,
            tokens: cap,
            refill_per_sec: refill_per_sec.max(1) as f64,
            last_refill: now,
        }
    }

    pub fn try_take(&mut self, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        let refill = elapsed * self.refill_per_sec;
        self.tokens = (self.tokens + refill).min(self.capacity);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_refill)
    }

    /// Whether the bucket would be back at capacity if refilled at `now`.
    fn is_full(&self, now: Instant) -> bool {
        let refill = self.idle_for(now).as_secs_f64() * self.refill_per_sec;
        self.tokens + refill >= self.capacity
    }
}

/// One lazily created bucket per inbound endpoint identifier.
///
/// The map lock covers both bucket creation and token consumption, so two
/// concurrent first calls for the same key share one bucket.
pub struct RateLimiter {
    buckets: Mutex<HashMap<String, TokenBucket>>,
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            config,
            clock,
        }
    }

    /// Consume one token for `key`, or deny when its bucket is empty.
    pub async fn allow(&self, key: &str) -> bool {
        let now = self.clock.now();
        let mut buckets = self.buckets.lock().await;
        match buckets.get_mut(key) {
            Some(bucket) => bucket.try_take(now),
            None => {
                let mut bucket = TokenBucket::new(self.config.burst, self.config.refill_per_sec, now);
                let allowed = bucket.try_take(now);
                buckets.insert(key.to_string(), bucket);
                allowed
            }
        }
    }

    /// Drop buckets idle for longer than the configured TTL.
    ///
    /// Only buckets that have refilled to capacity are dropped, so recreating
    /// one on the next call admits exactly what the old one would have.
    pub async fn sweep_idle(&self) -> usize {
        let now = self.clock.now();
        let ttl = self.config.idle_ttl;
        let mut buckets = self.buckets.lock().await;
        let before = buckets.len();
        buckets.retain(|_, bucket| bucket.idle_for(now) < ttl || !bucket.is_full(now));
        let removed = before - buckets.len();
        if removed > 0 {
            tracing::debug!(removed, remaining = buckets.len(), "swept idle rate limit buckets");
        }
        removed
    }

    /// Run [`RateLimiter::sweep_idle`] every `interval` until the task is aborted.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                limiter.sweep_idle().await;
            }
        })
    }

    pub async fn bucket_count(&self) -> usize {
        self.buckets.lock().await.len()
    }
}
