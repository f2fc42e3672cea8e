//! Per-key cooldown gate over the external store.
//!
//! A short-TTL marker is set alongside every upstream dispatch; while it
//! lives, further upstream calls for that key are throttled. The marker is
//! never explicitly deleted; its absence is the signal that a new call is
//! allowed, so a crashed process can never wedge a key.

use std::sync::Arc;

use crate::kv_store::KvStore;

#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn KvStore>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// True while the cooldown marker for this key is alive. With the store
    /// down this degrades to `false`: never block the fetch path on cache
    /// infrastructure.
    pub async fn should_throttle(&self, marker_key: &str) -> bool {
        self.store.exists(marker_key).await
    }

    /// Open a cooldown window. Called immediately after dispatching an
    /// upstream call for the key.
    pub async fn mark(&self, marker_key: &str, window_seconds: u64) {
        self.store.set(marker_key, b"1", Some(window_seconds)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv_store::MemoryStore;
    use tokio::time::{advance, Duration};

    #[tokio::test(start_paused = true)]
    async fn window_expires_naturally() {
        let limiter = RateLimiter::new(Arc::new(MemoryStore::new()));
        assert!(!limiter.should_throttle("ratelimit:raffle:0x1").await);

        limiter.mark("ratelimit:raffle:0x1", 2).await;
        assert!(limiter.should_throttle("ratelimit:raffle:0x1").await);

        advance(Duration::from_secs(3)).await;
        assert!(!limiter.should_throttle("ratelimit:raffle:0x1").await);
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let limiter = RateLimiter::new(Arc::new(MemoryStore::new()));
        limiter.mark("ratelimit:raffle:0x1", 2).await;
        assert!(!limiter.should_throttle("ratelimit:raffle:0x2").await);
    }
}
