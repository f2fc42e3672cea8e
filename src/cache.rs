//! # Cache Facade
//!
//! Typed wrapper over the key-value store adapter. Domain values are
//! serialized as JSON (opaque to callers); corrupt payloads are treated as a
//! miss, logged, and deleted so they cannot fail repeatedly. Writes complete
//! before the call resolves, so a later read on the same request path
//! observes its own write.

use std::sync::Arc;

use log::{error, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::kv_store::KvStore;

#[derive(Clone)]
pub struct Cache {
    store: Arc<dyn KvStore>,
}

impl Cache {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    /// Typed read. Returns `None` on miss and on corrupt payloads (which are
    /// deleted), never an error.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let bytes = self.store.get(key).await?;
        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("corrupt cache entry at {key}, deleting: {e}");
                self.store.delete(key).await;
                None
            }
        }
    }

    /// Typed write. `ttl_seconds = None` stores the value permanently.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl_seconds: Option<u64>) {
        match serde_json::to_vec(value) {
            Ok(bytes) => self.store.set(key, &bytes, ttl_seconds).await,
            Err(e) => error!("failed to serialize cache value for {key}: {e}"),
        }
    }

    /// Positionally-aligned typed batch read. Corrupt entries come back as
    /// `None` and are deleted.
    pub async fn multi_get<T: DeserializeOwned>(&self, keys: &[String]) -> Vec<Option<T>> {
        let raw = self.store.multi_get(keys).await;
        let mut out = Vec::with_capacity(keys.len());
        for (key, bytes) in keys.iter().zip(raw) {
            match bytes {
                Some(bytes) => match serde_json::from_slice(&bytes) {
                    Ok(value) => out.push(Some(value)),
                    Err(e) => {
                        warn!("corrupt cache entry at {key}, deleting: {e}");
                        self.store.delete(key).await;
                        out.push(None);
                    }
                },
                None => out.push(None),
            }
        }
        out
    }

    /// Idempotent delete.
    pub async fn invalidate(&self, key: &str) {
        self.store.delete(key).await;
    }

    /// Delete every entry matching a glob pattern, returning the count.
    pub async fn invalidate_pattern(&self, pattern: &str) -> u64 {
        self.store.delete_by_pattern(pattern).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv_store::MemoryStore;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Sample {
        id: u32,
        amount: String,
    }

    fn cache() -> Cache {
        Cache::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn round_trip() {
        let cache = cache();
        let value = Sample { id: 7, amount: "1000000000000000000".into() };
        cache.set("k", &value, Some(60)).await;
        assert_eq!(cache.get::<Sample>("k").await, Some(value));
    }

    #[tokio::test]
    async fn corrupt_payload_is_a_miss_and_deleted() {
        let cache = cache();
        cache.store().set("k", b"{not json", Some(60)).await;
        assert_eq!(cache.get::<Sample>("k").await, None);
        // Entry removed so it cannot fail again.
        assert!(!cache.store().exists("k").await);
    }

    #[tokio::test]
    async fn invalidate_is_idempotent() {
        let cache = cache();
        cache.set("k", &Sample { id: 1, amount: "0".into() }, None).await;
        cache.invalidate("k").await;
        assert_eq!(cache.get::<Sample>("k").await, None);
        // Second delete of an absent key is a no-op, never an error.
        cache.invalidate("k").await;
    }

    #[tokio::test]
    async fn multi_get_skips_corrupt_entries() {
        let cache = cache();
        cache.set("a", &Sample { id: 1, amount: "1".into() }, None).await;
        cache.store().set("b", b"garbage", None).await;
        let got: Vec<Option<Sample>> =
            cache.multi_get(&["a".into(), "b".into(), "c".into()]).await;
        assert!(got[0].is_some());
        assert!(got[1].is_none());
        assert!(got[2].is_none());
        assert!(!cache.store().exists("b").await);
    }
}
