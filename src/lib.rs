//! # Raffle Cache SDK
//!
//! A read-through caching and request-coalescing layer between an on-chain
//! raffle dApp and its upstreams (RPC contract reads and a social-graph
//! API). It exists to absorb request stampedes: concurrent requests for the
//! same uncached entity collapse into a single upstream fetch whose result
//! fans out to every waiter.
//!
//! ## Overview
//!
//! The layer is organized around a small set of composable parts:
//!
//! - **Store adapter**: a uniform async key-value interface over Redis, an
//!   in-memory map, or a no-op store. Store failures degrade to cache
//!   misses, never to request errors.
//! - **Cache facade**: typed JSON serialization over the store, with
//!   corrupt-entry self-healing.
//! - **Coalescer**: the read-through orchestrator. Per-process singleflight
//!   via a shared-future registry, cross-process dedup via external markers
//!   with bounded cache polling, per-key cooldown windows, and
//!   finality-aware TTL selection (terminal records are cached permanently).
//! - **Service layer**: binds cache keys, policies and upstream fetchers
//!   for each entity type, including the ordered full-list aggregation.
//! - **Invalidation hook**: event-driven key dropping so mutations become
//!   visible before TTL expiry.
//! - **HTTP surface**: an axum router exposing the lookups and the
//!   invalidation hook.

// Storage & cache core
/// Async key-value store adapter (Redis, in-memory, no-op)
pub mod kv_store;
/// Typed cache facade over the store
pub mod cache;
/// Read-through coalescing orchestrator
pub mod coalescer;
/// Upstream cooldown markers
pub mod rate_limiter;

// Upstreams
/// Contract bindings
pub mod contracts;
/// Chain entity fetchers over ethers middleware
pub mod contract_reader;
/// Social-graph API client with bounded pagination
pub mod social_api;

// Domain & surface
/// Domain records and cache key construction
pub mod types;
/// Error taxonomy surfaced to callers
pub mod errors;
/// Entity-level service API
pub mod raffle_service;
/// Event-driven cache invalidation
pub mod invalidation;
/// HTTP router and handlers
pub mod server;
/// Layered configuration
pub mod settings;

pub use cache::Cache;
pub use coalescer::{Coalescer, FetchPolicy, InflightRegistry, Lookup};
pub use errors::FetchError;
pub use invalidation::{DomainEvent, InvalidationHook};
pub use kv_store::{KvStore, MemoryStore, NullStore, RedisStore};
pub use raffle_service::RaffleService;
pub use settings::Settings;
pub use types::{FailureRecord, FarcasterUser, RaffleRecord, TokenMetadata};
