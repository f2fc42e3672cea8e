//! # Settings
//!
//! Layered configuration: `config/default.toml` when present, overridden by
//! `RAFFLE__`-prefixed environment variables (`RAFFLE__REDIS__URL`, etc.).
//! Every field has a default so the service boots with no config file at all.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Redis {
    #[serde(default = "default_redis_url")]
    pub url: String,
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

impl Default for Redis {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Rpc {
    #[serde(default = "default_rpc_url")]
    pub url: String,
    /// Raffle factory contract, the root of address discovery.
    #[serde(default = "default_factory_address")]
    pub factory_address: String,
}

fn default_rpc_url() -> String {
    "https://mainnet.base.org".to_string()
}
fn default_factory_address() -> String {
    "0x0000000000000000000000000000000000000000".to_string()
}

impl Default for Rpc {
    fn default() -> Self {
        Self {
            url: default_rpc_url(),
            factory_address: default_factory_address(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Neynar {
    #[serde(default)]
    pub api_key: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Server {
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "0.0.0.0:3001".to_string()
}

impl Default for Server {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

/// TTLs and coordination windows, in seconds unless noted. Defaults are
/// tuned for entities that mutate on the order of a block time.
#[derive(Debug, Deserialize, Clone)]
pub struct CacheTunables {
    #[serde(default = "default_active_raffle_ttl")]
    pub active_raffle_ttl: u64,
    #[serde(default = "default_list_ttl")]
    pub list_ttl: u64,
    #[serde(default = "default_token_metadata_ttl")]
    pub token_metadata_ttl: u64,
    #[serde(default = "default_cast_likes_ttl")]
    pub cast_likes_ttl: u64,
    #[serde(default = "default_failed_ttl")]
    pub failed_ttl: u64,
    #[serde(default = "default_rate_limit_ttl")]
    pub rate_limit_ttl: u64,
    #[serde(default = "default_dedup_ttl")]
    pub dedup_ttl: u64,
    #[serde(default = "default_dedup_poll_interval_ms")]
    pub dedup_poll_interval_ms: u64,
    #[serde(default = "default_dedup_poll_attempts")]
    pub dedup_poll_attempts: u32,
    #[serde(default = "default_list_dedup_ttl")]
    pub list_dedup_ttl: u64,
    #[serde(default = "default_list_poll_interval_ms")]
    pub list_poll_interval_ms: u64,
    #[serde(default = "default_list_poll_attempts")]
    pub list_poll_attempts: u32,
    /// Parallel contract reads while assembling the full list.
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,
}

fn default_active_raffle_ttl() -> u64 {
    60
}
fn default_list_ttl() -> u64 {
    30
}
fn default_token_metadata_ttl() -> u64 {
    300
}
fn default_cast_likes_ttl() -> u64 {
    30
}
fn default_failed_ttl() -> u64 {
    3600
}
fn default_rate_limit_ttl() -> u64 {
    2
}
fn default_dedup_ttl() -> u64 {
    5
}
fn default_dedup_poll_interval_ms() -> u64 {
    100
}
fn default_dedup_poll_attempts() -> u32 {
    20
}
fn default_list_dedup_ttl() -> u64 {
    10
}
fn default_list_poll_interval_ms() -> u64 {
    200
}
fn default_list_poll_attempts() -> u32 {
    15
}
fn default_fetch_concurrency() -> usize {
    8
}

impl Default for CacheTunables {
    fn default() -> Self {
        Self {
            active_raffle_ttl: default_active_raffle_ttl(),
            list_ttl: default_list_ttl(),
            token_metadata_ttl: default_token_metadata_ttl(),
            cast_likes_ttl: default_cast_likes_ttl(),
            failed_ttl: default_failed_ttl(),
            rate_limit_ttl: default_rate_limit_ttl(),
            dedup_ttl: default_dedup_ttl(),
            dedup_poll_interval_ms: default_dedup_poll_interval_ms(),
            dedup_poll_attempts: default_dedup_poll_attempts(),
            list_dedup_ttl: default_list_dedup_ttl(),
            list_poll_interval_ms: default_list_poll_interval_ms(),
            list_poll_attempts: default_list_poll_attempts(),
            fetch_concurrency: default_fetch_concurrency(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub redis: Redis,
    #[serde(default)]
    pub rpc: Rpc,
    #[serde(default)]
    pub neynar: Neynar,
    #[serde(default)]
    pub server: Server,
    #[serde(default)]
    pub cache: CacheTunables,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Self::from_file("config/default")
    }

    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(Environment::with_prefix("RAFFLE").separator("__"))
            .build()?;
        s.try_deserialize()
    }
}
