//! # Raffle Service
//!
//! The entity-level API the HTTP surface calls into. Each operation binds a
//! cache key, a fetch policy (TTL, dedup window, cooldown) and an upstream
//! fetcher, then delegates to the coalescer.
//!
//! ## Features
//! - **Single raffle**: read-through with per-address dedup and cooldown
//! - **Full list**: one coalesced aggregation pipelining cache batch reads
//!   and bounded-concurrency contract fetches, newest first
//! - **Token metadata / cast likers**: plain read-through with long/short TTLs
//! - **Failure memory**: entities that failed to fetch are skipped by the
//!   list until their failure record expires

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use ethers::types::Address;
use futures::stream::{self, StreamExt};
use log::{debug, info, warn};

use crate::cache::Cache;
use crate::coalescer::{Coalescer, DedupPolicy, FetchPolicy, Lookup, RateLimitPolicy};
use crate::contract_reader::ContractReader;
use crate::errors::FetchError;
use crate::settings::CacheTunables;
use crate::social_api::{validate_cast_hash, SocialReader};
use crate::types::{
    format_address, keys, parse_address, FailureRecord, FarcasterUser, RaffleRecord, TokenMetadata,
};

pub struct RaffleService {
    cache: Cache,
    coalescer: Coalescer,
    reader: Arc<dyn ContractReader>,
    social: Arc<dyn SocialReader>,
    tunables: CacheTunables,
}

impl RaffleService {
    pub fn new(
        cache: Cache,
        coalescer: Coalescer,
        reader: Arc<dyn ContractReader>,
        social: Arc<dyn SocialReader>,
        tunables: CacheTunables,
    ) -> Self {
        Self {
            cache,
            coalescer,
            reader,
            social,
            tunables,
        }
    }

    fn raffle_policy(&self, address: &str) -> FetchPolicy {
        FetchPolicy {
            active_ttl: Some(self.tunables.active_raffle_ttl),
            dedup: Some(DedupPolicy {
                marker_key: keys::raffle_dedup(address),
                marker_ttl: self.tunables.dedup_ttl,
                poll_interval: Duration::from_millis(self.tunables.dedup_poll_interval_ms),
                poll_attempts: self.tunables.dedup_poll_attempts,
            }),
            rate_limit: Some(RateLimitPolicy {
                marker_key: keys::raffle_rate_limit(address),
                window_ttl: self.tunables.rate_limit_ttl,
            }),
        }
    }

    fn list_policy(&self) -> FetchPolicy {
        FetchPolicy {
            active_ttl: Some(self.tunables.list_ttl),
            dedup: Some(DedupPolicy {
                marker_key: keys::RAFFLE_LIST_DEDUP.to_string(),
                marker_ttl: self.tunables.list_dedup_ttl,
                poll_interval: Duration::from_millis(self.tunables.list_poll_interval_ms),
                poll_attempts: self.tunables.list_poll_attempts,
            }),
            rate_limit: None,
        }
    }

    /// Read-through lookup of a single raffle.
    pub async fn get_raffle(&self, address: &str) -> Result<Lookup<RaffleRecord>, FetchError> {
        let address = parse_address(address)?;
        let canonical = format_address(&address);
        let reader = self.reader.clone();
        self.coalescer
            .get_or_fetch(
                &keys::raffle(&canonical),
                self.raffle_policy(&canonical),
                move || async move {
                    let record = reader.fetch_raffle(address).await?;
                    let terminal = record.is_terminal();
                    Ok((record, terminal))
                },
            )
            .await
    }

    /// The full raffle list, newest first. The aggregation itself is
    /// coalesced under a single key, so concurrent list requests share one
    /// pipeline run.
    pub async fn list_raffles(&self) -> Result<Lookup<Vec<RaffleRecord>>, FetchError> {
        let reader = self.reader.clone();
        let cache = self.cache.clone();
        let tunables = self.tunables.clone();
        self.coalescer
            .get_or_fetch(keys::RAFFLE_LIST, self.list_policy(), move || async move {
                let records = aggregate_raffles(reader, cache, &tunables).await?;
                // The aggregate always refreshes on its own TTL.
                Ok((records, false))
            })
            .await
    }

    /// ERC-20 metadata, long-lived. No dedup or cooldown: the fetch is cheap
    /// and the TTL wide enough that stampedes do not occur in practice.
    pub async fn get_token_metadata(
        &self,
        address: &str,
    ) -> Result<Lookup<TokenMetadata>, FetchError> {
        let address = parse_address(address)?;
        let canonical = format_address(&address);
        let reader = self.reader.clone();
        self.coalescer
            .get_or_fetch(
                &keys::token_metadata(&canonical),
                FetchPolicy {
                    active_ttl: Some(self.tunables.token_metadata_ttl),
                    ..Default::default()
                },
                move || async move {
                    let metadata = reader.fetch_token_metadata(address).await?;
                    Ok((metadata, false))
                },
            )
            .await
    }

    /// Users who liked a cast, short-lived cache.
    pub async fn get_cast_likers(
        &self,
        cast_hash: &str,
    ) -> Result<Lookup<Vec<FarcasterUser>>, FetchError> {
        let hash = validate_cast_hash(cast_hash)?;
        let social = self.social.clone();
        self.coalescer
            .get_or_fetch(
                &keys::cast_likes(&hash),
                FetchPolicy {
                    active_ttl: Some(self.tunables.cast_likes_ttl),
                    ..Default::default()
                },
                move || async move {
                    let likers = social.fetch_cast_likers(&hash).await?;
                    Ok((likers, false))
                },
            )
            .await
    }
}

/// One run of the list aggregation pipeline:
///
/// 1. discover all addresses from the factory, newest first
/// 2. batch-read failure records and cached raffles for all of them
/// 3. fetch the remaining gaps from chain with bounded concurrency, writing
///    each result through with its finality-based TTL
/// 4. reassemble strictly in discovery order, skipping failed entities
///
/// A per-entity failure never aborts the run; it is recorded and the entity
/// dropped from this and subsequent runs until the record expires.
pub(crate) async fn aggregate_raffles(
    reader: Arc<dyn ContractReader>,
    cache: Cache,
    tunables: &CacheTunables,
) -> anyhow::Result<Vec<RaffleRecord>> {
    let mut addresses = reader.fetch_raffle_addresses().await?;
    addresses.reverse();
    let canonical: Vec<String> = addresses.iter().map(format_address).collect();

    let failed_keys: Vec<String> = canonical.iter().map(|a| keys::failed(a)).collect();
    let raffle_keys: Vec<String> = canonical.iter().map(|a| keys::raffle(a)).collect();
    let failures = cache.multi_get::<FailureRecord>(&failed_keys).await;
    let cached = cache.multi_get::<RaffleRecord>(&raffle_keys).await;

    let mut resolved: HashMap<String, RaffleRecord> = HashMap::new();
    let mut to_fetch: Vec<(Address, String)> = Vec::new();
    for (i, key) in canonical.iter().enumerate() {
        if let Some(failure) = &failures[i] {
            debug!("skipping {key}: failed at {} ({})", failure.timestamp, failure.reason);
            continue;
        }
        match &cached[i] {
            Some(record) => {
                resolved.insert(key.clone(), record.clone());
            }
            None => to_fetch.push((addresses[i], key.clone())),
        }
    }

    if !to_fetch.is_empty() {
        info!(
            "list aggregation: {} cached, {} to fetch",
            resolved.len(),
            to_fetch.len()
        );
    }

    let fetched: Vec<(String, Option<RaffleRecord>)> = stream::iter(to_fetch)
        .map(|(address, key)| {
            let reader = reader.clone();
            let cache = cache.clone();
            let active_ttl = tunables.active_raffle_ttl;
            let failed_ttl = tunables.failed_ttl;
            async move {
                match reader.fetch_raffle(address).await {
                    Ok(record) => {
                        let ttl = if record.is_terminal() { None } else { Some(active_ttl) };
                        cache.set(&keys::raffle(&key), &record, ttl).await;
                        (key, Some(record))
                    }
                    Err(e) => {
                        warn!("list aggregation: fetch for {key} failed: {e:#}");
                        let failure = FailureRecord {
                            reason: format!("{e:#}"),
                            timestamp: Utc::now(),
                            error_type: "upstream".to_string(),
                        };
                        cache.set(&keys::failed(&key), &failure, Some(failed_ttl)).await;
                        (key, None)
                    }
                }
            }
        })
        .buffer_unordered(tunables.fetch_concurrency)
        .collect()
        .await;

    for (key, record) in fetched {
        if let Some(record) = record {
            resolved.insert(key, record);
        }
    }

    // Discovery order is the contract of this list, regardless of which
    // source each record came from or how fetches interleaved.
    Ok(canonical
        .iter()
        .filter_map(|key| resolved.remove(key))
        .collect())
}
