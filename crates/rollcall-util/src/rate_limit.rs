//! Rate limiting utilities

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

/// Token-bucket rate limiter keyed by caller identity.
///
/// Buckets refill in whole intervals: after each elapsed `interval` the
/// bucket is topped back up to `burst`.
#[derive(Debug)]
pub struct RateLimiter<K> {
    burst: u32,
    interval: Duration,
    buckets: HashMap<K, Bucket>,
}

#[derive(Debug)]
struct Bucket {
    tokens: u32,
    window_start: Instant,
}

impl<K: Hash + Eq + Clone> RateLimiter<K> {
    /// Allow `burst` requests per `interval` for each key
    pub fn new(burst: u32, interval: Duration) -> Self {
        Self {
            burst,
            interval,
            buckets: HashMap::new(),
        }
    }

    /// Consume a token for `key`; `false` means the request must be refused
    pub fn check(&mut self, key: &K) -> bool {
        self.check_at(key, Instant::now())
    }

    fn check_at(&mut self, key: &K, at: Instant) -> bool {
        let bucket = self.buckets.entry(key.clone()).or_insert(Bucket {
            tokens: self.burst,
            window_start: at,
        });

        if at.duration_since(bucket.window_start) >= self.interval {
            bucket.tokens = self.burst;
            bucket.window_start = at;
        }

        match bucket.tokens.checked_sub(1) {
            Some(left) => {
                bucket.tokens = left;
                true
            }
            None => false,
        }
    }

    /// Forget a key (e.g. when its connection closes)
    pub fn remove(&mut self, key: &K) {
        self.buckets.remove(key);
    }

    /// Drop buckets untouched for longer than `stale_after`
    pub fn cleanup(&mut self, stale_after: Duration) {
        let now = Instant::now();
        self.buckets
            .retain(|_, bucket| now.duration_since(bucket.window_start) < stale_after);
    }

    pub fn tracked(&self) -> usize {
        self.buckets.len()
    }
}
