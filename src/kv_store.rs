//! # Key-Value Store Adapter
//!
//! Minimal async interface over the external cache store, with three
//! implementations:
//!
//! - **RedisStore**: production backend over a multiplexed connection manager
//! - **MemoryStore**: in-process `DashMap` backend for tests and fallback
//! - **NullStore**: every operation is a miss, used when no store is configured
//!
//! Failure policy: if the store is unreachable, every operation degrades to a
//! no-op / miss instead of raising, so callers can always fall through to the
//! upstream fetch path. Availability over freshness.

use anyhow::{Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use log::{debug, info, warn};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tokio::time::{Duration, Instant};

/// Remaining lifetime of a key, mirroring redis TTL semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    /// Key does not exist.
    Missing,
    /// Key exists with no expiration.
    Permanent,
    /// Key expires in this many seconds.
    Expires(u64),
}

/// Async key-value store contract. All operations are infallible from the
/// caller's perspective; store errors are logged and degraded to a miss.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Option<Vec<u8>>;

    /// `ttl_seconds = None` stores the value permanently. Always overwrites.
    async fn set(&self, key: &str, value: &[u8], ttl_seconds: Option<u64>);

    async fn delete(&self, key: &str);

    async fn exists(&self, key: &str) -> bool;

    /// Delete every key matching a glob pattern, returning the count deleted.
    async fn delete_by_pattern(&self, pattern: &str) -> u64;

    /// Positionally-aligned batch get: `result[i]` corresponds to `keys[i]`.
    async fn multi_get(&self, keys: &[String]) -> Vec<Option<Vec<u8>>>;

    /// Keys currently matching a glob pattern.
    async fn keys(&self, pattern: &str) -> Vec<String>;

    async fn ttl(&self, key: &str) -> KeyTtl;
}

// ==================== REDIS ====================

/// Redis-backed store over a shared `ConnectionManager` (auto-reconnecting
/// multiplexed connection, cheap to clone per operation).
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url).context("Failed to create redis client")?;
        let conn = ConnectionManager::new(client)
            .await
            .context("Failed to connect to redis")?;
        info!("Redis store connected");
        Ok(Self { conn })
    }

    pub async fn health_check(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .context("Redis health check failed")?;
        if pong == "PONG" {
            Ok(())
        } else {
            anyhow::bail!("Unexpected redis response: {pong}")
        }
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn get(&self, key: &str) -> Option<Vec<u8>> {
        let mut conn = self.conn.clone();
        match conn.get::<_, Option<Vec<u8>>>(key).await {
            Ok(value) => value,
            Err(e) => {
                warn!("redis GET {key} failed, degrading to miss: {e}");
                None
            }
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl_seconds: Option<u64>) {
        let mut conn = self.conn.clone();
        let result = match ttl_seconds {
            Some(ttl) => conn.set_ex::<_, _, ()>(key, value, ttl).await,
            None => conn.set::<_, _, ()>(key, value).await,
        };
        if let Err(e) = result {
            warn!("redis SET {key} failed, skipping cache write: {e}");
        }
    }

    async fn delete(&self, key: &str) {
        let mut conn = self.conn.clone();
        if let Err(e) = conn.del::<_, ()>(key).await {
            warn!("redis DEL {key} failed: {e}");
        }
    }

    async fn exists(&self, key: &str) -> bool {
        let mut conn = self.conn.clone();
        match conn.exists::<_, bool>(key).await {
            Ok(found) => found,
            Err(e) => {
                warn!("redis EXISTS {key} failed, degrading to miss: {e}");
                false
            }
        }
    }

    async fn delete_by_pattern(&self, pattern: &str) -> u64 {
        let keys = self.keys(pattern).await;
        if keys.is_empty() {
            return 0;
        }
        let mut conn = self.conn.clone();
        match conn.del::<_, u64>(keys).await {
            Ok(count) => {
                debug!("deleted {count} key(s) matching {pattern}");
                count
            }
            Err(e) => {
                warn!("redis DEL by pattern {pattern} failed: {e}");
                0
            }
        }
    }

    async fn multi_get(&self, keys: &[String]) -> Vec<Option<Vec<u8>>> {
        if keys.is_empty() {
            return Vec::new();
        }
        let mut conn = self.conn.clone();
        // Explicit MGET so a single-key batch keeps the list reply shape.
        match redis::cmd("MGET")
            .arg(keys)
            .query_async::<_, Vec<Option<Vec<u8>>>>(&mut conn)
            .await
        {
            Ok(values) => values,
            Err(e) => {
                warn!("redis MGET ({} keys) failed, degrading to misses: {e}", keys.len());
                vec![None; keys.len()]
            }
        }
    }

    async fn keys(&self, pattern: &str) -> Vec<String> {
        let mut conn = self.conn.clone();
        match conn.keys::<_, Vec<String>>(pattern).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!("redis KEYS {pattern} failed: {e}");
                Vec::new()
            }
        }
    }

    async fn ttl(&self, key: &str) -> KeyTtl {
        let mut conn = self.conn.clone();
        match conn.ttl::<_, i64>(key).await {
            Ok(-2) => KeyTtl::Missing,
            Ok(-1) => KeyTtl::Permanent,
            Ok(secs) if secs >= 0 => KeyTtl::Expires(secs as u64),
            Ok(other) => {
                warn!("redis TTL {key} returned unexpected value {other}");
                KeyTtl::Missing
            }
            Err(e) => {
                warn!("redis TTL {key} failed: {e}");
                KeyTtl::Missing
            }
        }
    }
}

// ==================== MEMORY ====================

/// In-process store with TTL expiry checked on access. Deadlines use the
/// tokio clock so tests can pause and advance time deterministically.
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, (Vec<u8>, Option<Instant>)>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn live_value(&self, key: &str) -> Option<Vec<u8>> {
        let expired = match self.entries.get(key) {
            Some(entry) => match entry.value().1 {
                Some(deadline) => Instant::now() >= deadline,
                None => false,
            },
            None => return None,
        };
        if expired {
            self.entries.remove(key);
            return None;
        }
        self.entries.get(key).map(|entry| entry.value().0.clone())
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.live_value(key)
    }

    async fn set(&self, key: &str, value: &[u8], ttl_seconds: Option<u64>) {
        let deadline = ttl_seconds.map(|ttl| Instant::now() + Duration::from_secs(ttl));
        self.entries.insert(key.to_string(), (value.to_vec(), deadline));
    }

    async fn delete(&self, key: &str) {
        self.entries.remove(key);
    }

    async fn exists(&self, key: &str) -> bool {
        self.live_value(key).is_some()
    }

    async fn delete_by_pattern(&self, pattern: &str) -> u64 {
        let matching = self.keys(pattern).await;
        let mut count = 0;
        for key in matching {
            if self.entries.remove(&key).is_some() {
                count += 1;
            }
        }
        count
    }

    async fn multi_get(&self, keys: &[String]) -> Vec<Option<Vec<u8>>> {
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            out.push(self.live_value(key));
        }
        out
    }

    async fn keys(&self, pattern: &str) -> Vec<String> {
        self.entries
            .iter()
            .filter(|entry| {
                let live = match entry.value().1 {
                    Some(deadline) => Instant::now() < deadline,
                    None => true,
                };
                live && glob_match(pattern, entry.key())
            })
            .map(|entry| entry.key().clone())
            .collect()
    }

    async fn ttl(&self, key: &str) -> KeyTtl {
        match self.entries.get(key) {
            Some(entry) => match entry.value().1 {
                None => KeyTtl::Permanent,
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        KeyTtl::Missing
                    } else {
                        KeyTtl::Expires((deadline - now).as_secs())
                    }
                }
            },
            None => KeyTtl::Missing,
        }
    }
}

// ==================== NULL ====================

/// Store used when no backend is configured: every read is a miss and every
/// write is dropped, so the system keeps serving (slower) correct responses.
pub struct NullStore;

#[async_trait]
impl KvStore for NullStore {
    async fn get(&self, _key: &str) -> Option<Vec<u8>> {
        None
    }

    async fn set(&self, _key: &str, _value: &[u8], _ttl_seconds: Option<u64>) {}

    async fn delete(&self, _key: &str) {}

    async fn exists(&self, _key: &str) -> bool {
        false
    }

    async fn delete_by_pattern(&self, _pattern: &str) -> u64 {
        0
    }

    async fn multi_get(&self, keys: &[String]) -> Vec<Option<Vec<u8>>> {
        vec![None; keys.len()]
    }

    async fn keys(&self, _pattern: &str) -> Vec<String> {
        Vec::new()
    }

    async fn ttl(&self, _key: &str) -> KeyTtl {
        KeyTtl::Missing
    }
}

/// Redis-style glob matching: `*` matches any run of characters, `?` matches
/// exactly one. Enough for the key patterns this layer uses.
pub(crate) fn glob_match(pattern: &str, text: &str) -> bool {
    fn inner(p: &[u8], t: &[u8]) -> bool {
        match (p.first(), t.first()) {
            (None, None) => true,
            (Some(b'*'), _) => {
                // Match zero characters, or consume one and retry.
                inner(&p[1..], t) || (!t.is_empty() && inner(p, &t[1..]))
            }
            (Some(b'?'), Some(_)) => inner(&p[1..], &t[1..]),
            (Some(pc), Some(tc)) if pc == tc => inner(&p[1..], &t[1..]),
            _ => false,
        }
    }
    inner(pattern.as_bytes(), text.as_bytes())
}
