//! # Coalescing Read-Through Cache
//!
//! Central orchestrator for every cached lookup. For a given key it returns
//! the cached value when present; otherwise it guarantees at most one
//! concurrent upstream fetch per key within the process (a shared-future
//! registry) and approximates the same guarantee across processes (an
//! external dedup marker plus a bounded cache-poll loop). The fetch result
//! fans out to all waiters, and the TTL is chosen from the record's
//! finality: terminal records are stored permanently, mutable ones with the
//! configured active TTL.
//!
//! Claim ordering is marker-then-fetch, never fetch-then-marker: two
//! concurrent misses must not both reach the upstream. Markers self-expire,
//! so a process that dies mid-fetch cannot permanently wedge a key.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::cache::Cache;
use crate::errors::FetchError;
use crate::kv_store::KvStore;
use crate::rate_limiter::RateLimiter;

/// Result of a coalesced lookup, with observability flags for the caller.
#[derive(Debug, Clone)]
pub struct Lookup<T> {
    pub value: T,
    /// Value came from the cache rather than a fresh upstream fetch.
    pub cached: bool,
    /// This caller waited on a fetch owned by someone else (local waiter or
    /// cross-process poll).
    pub deduplicated: bool,
    /// Served from cache while the key's cooldown window was active.
    pub rate_limited: bool,
}

/// Cross-process dedup configuration for one key.
#[derive(Debug, Clone)]
pub struct DedupPolicy {
    /// External-store marker meaning "a fetch for this key is running".
    pub marker_key: String,
    pub marker_ttl: u64,
    /// Cache poll cadence while another process owns the fetch. The attempt
    /// bound is a tunable heuristic, not a hard guarantee under load; on
    /// exhaustion the lookup falls through to a fresh miss instead of
    /// hanging.
    pub poll_interval: Duration,
    pub poll_attempts: u32,
}

/// Per-key upstream cooldown configuration.
#[derive(Debug, Clone)]
pub struct RateLimitPolicy {
    pub marker_key: String,
    pub window_ttl: u64,
}

/// How a single key is cached, deduplicated, and throttled.
#[derive(Debug, Clone, Default)]
pub struct FetchPolicy {
    /// TTL for records that are still mutable. Terminal records always get
    /// no TTL (permanent) regardless of this value.
    pub active_ttl: Option<u64>,
    pub dedup: Option<DedupPolicy>,
    pub rate_limit: Option<RateLimitPolicy>,
}

/// What the owning fetch resolves to: the serialized payload plus whether it
/// was obtained by polling another process's work.
#[derive(Clone)]
struct InflightOutcome {
    payload: Vec<u8>,
    deduplicated: bool,
}

type SharedFetch = Shared<BoxFuture<'static, Result<InflightOutcome, String>>>;

/// Process-local registry of in-flight fetches, keyed by cache key.
///
/// Injected and explicitly owned (constructed per test, torn down
/// deterministically) rather than living in module-level global state. The
/// coalescer owns entry lifecycle: inserted when a miss claims ownership,
/// removed by a guard on every exit path.
#[derive(Default)]
pub struct InflightRegistry {
    inflight: DashMap<String, SharedFetch>,
}

impl InflightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of fetches currently in flight in this process.
    pub fn len(&self) -> usize {
        self.inflight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inflight.is_empty()
    }
}

/// Removes the registry entry when the owner finishes or is dropped
/// mid-flight, so a cancelled owner never wedges the key for the process
/// lifetime. Waiters holding clones of the shared future keep driving it.
struct InflightGuard {
    registry: Arc<InflightRegistry>,
    key: String,
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.registry.inflight.remove(&self.key);
    }
}

pub struct Coalescer {
    cache: Cache,
    store: Arc<dyn KvStore>,
    rate_limiter: RateLimiter,
    registry: Arc<InflightRegistry>,
}

impl Coalescer {
    pub fn new(cache: Cache, registry: Arc<InflightRegistry>) -> Self {
        let store = cache.store().clone();
        Self {
            rate_limiter: RateLimiter::new(store.clone()),
            cache,
            store,
            registry,
        }
    }

    /// Read-through lookup for `key`. On a miss, at most one caller per
    /// process dispatches `fetch`; everyone else shares its result.
    ///
    /// `fetch` resolves to the record plus its terminal flag; terminal
    /// records are cached permanently, others with `policy.active_ttl`.
    pub async fn get_or_fetch<T, F, Fut>(
        &self,
        key: &str,
        policy: FetchPolicy,
        fetch: F,
    ) -> Result<Lookup<T>, FetchError>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<(T, bool)>> + Send + 'static,
    {
        // 1. Cache hit: no rate limiting, no coordination.
        if let Some(value) = self.cache.get::<T>(key).await {
            return Ok(Lookup {
                value,
                cached: true,
                deduplicated: false,
                rate_limited: false,
            });
        }

        // 2. A fetch already in flight in this process takes priority over
        // the cooldown gate: joining it costs nothing upstream.
        if let Some(shared) = self.existing_fetch(key) {
            return self.await_as_waiter(key, shared).await;
        }

        // 3. Cooldown gate. Hits and joined fetches bypass this entirely.
        if let Some(rl) = &policy.rate_limit {
            if self.rate_limiter.should_throttle(&rl.marker_key).await {
                // The owning request may have populated the cache between
                // our read and the marker check.
                if let Some(value) = self.cache.get::<T>(key).await {
                    debug!("serving {key} from cache under rate limit");
                    return Ok(Lookup {
                        value,
                        cached: true,
                        deduplicated: false,
                        rate_limited: true,
                    });
                }
                // Or an owner may have claimed the key in the meantime.
                if let Some(shared) = self.existing_fetch(key) {
                    return self.await_as_waiter(key, shared).await;
                }
                debug!("rate limiting {key}, no cached value to serve");
                return Err(FetchError::RateLimited);
            }
        }

        // 4. Local singleflight: first miss becomes the owner, concurrent
        // misses await the owner's shared future.
        let (shared, guard) = match self.registry.inflight.entry(key.to_string()) {
            Entry::Occupied(entry) => (entry.get().clone(), None),
            Entry::Vacant(entry) => {
                let fut = owned_fetch(
                    self.store.clone(),
                    self.rate_limiter.clone(),
                    key.to_string(),
                    policy,
                    fetch(),
                )
                .boxed()
                .shared();
                entry.insert(fut.clone());
                let guard = InflightGuard {
                    registry: self.registry.clone(),
                    key: key.to_string(),
                };
                (fut, Some(guard))
            }
        };
        let is_owner = guard.is_some();

        let outcome = shared.await;
        drop(guard);

        match outcome {
            Ok(outcome) => {
                let value = serde_json::from_slice(&outcome.payload).map_err(|e| {
                    FetchError::Upstream(format!("undecodable coalesced payload for {key}: {e}"))
                })?;
                Ok(Lookup {
                    value,
                    cached: outcome.deduplicated,
                    deduplicated: outcome.deduplicated || !is_owner,
                    rate_limited: false,
                })
            }
            Err(reason) => Err(FetchError::Upstream(reason)),
        }
    }

    fn existing_fetch(&self, key: &str) -> Option<SharedFetch> {
        self.registry.inflight.get(key).map(|entry| entry.clone())
    }

    async fn await_as_waiter<T>(
        &self,
        key: &str,
        shared: SharedFetch,
    ) -> Result<Lookup<T>, FetchError>
    where
        T: DeserializeOwned,
    {
        match shared.await {
            Ok(outcome) => {
                let value = serde_json::from_slice(&outcome.payload).map_err(|e| {
                    FetchError::Upstream(format!("undecodable coalesced payload for {key}: {e}"))
                })?;
                Ok(Lookup {
                    value,
                    cached: outcome.deduplicated,
                    deduplicated: true,
                    rate_limited: false,
                })
            }
            Err(reason) => Err(FetchError::Upstream(reason)),
        }
    }
}

/// The owning side of a coalesced miss: cross-process dedup, claim, upstream
/// fetch, finality-based write-through, and guaranteed marker release.
async fn owned_fetch<T, Fut>(
    store: Arc<dyn KvStore>,
    rate_limiter: RateLimiter,
    key: String,
    policy: FetchPolicy,
    fetch: Fut,
) -> Result<InflightOutcome, String>
where
    T: Serialize + Send + 'static,
    Fut: Future<Output = anyhow::Result<(T, bool)>> + Send + 'static,
{
    if let Some(dedup) = &policy.dedup {
        // Another process may already own this fetch: poll the cache for its
        // result instead of issuing a second upstream call.
        if store.exists(&dedup.marker_key).await {
            debug!("fetch for {key} already in flight elsewhere, polling cache");
            for _ in 0..dedup.poll_attempts {
                tokio::time::sleep(dedup.poll_interval).await;
                if let Some(payload) = store.get(&key).await {
                    return Ok(InflightOutcome {
                        payload,
                        deduplicated: true,
                    });
                }
            }
            // The owner died or is slower than the poll budget; its marker
            // will self-expire. Treat this as a fresh miss.
            debug!("dedup wait for {key} exhausted, claiming the fetch");
        }

        // Claim before dispatching upstream.
        store
            .set(&dedup.marker_key, b"1", Some(dedup.marker_ttl))
            .await;
    }

    if let Some(rl) = &policy.rate_limit {
        rate_limiter.mark(&rl.marker_key, rl.window_ttl).await;
    }

    let result = fetch.await;

    // Release the claim on success and on error alike. A crash before this
    // point self-heals via the marker TTL.
    if let Some(dedup) = &policy.dedup {
        store.delete(&dedup.marker_key).await;
    }

    match result {
        Ok((value, terminal)) => {
            let payload = serde_json::to_vec(&value)
                .map_err(|e| format!("failed to serialize value for {key}: {e}"))?;
            let ttl = if terminal { None } else { policy.active_ttl };
            store.set(&key, &payload, ttl).await;
            if terminal {
                debug!("cached {key} permanently (terminal record)");
            }
            Ok(InflightOutcome {
                payload,
                deduplicated: false,
            })
        }
        Err(e) => {
            // Never cache the miss as a value.
            warn!("upstream fetch for {key} failed: {e:#}");
            Err(format!("{e:#}"))
        }
    }
}
