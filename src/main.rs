//! Server entrypoint: wires the store, coalescer, upstream readers and the
//! HTTP router together from configuration.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use ethers::providers::{Http, Provider};
use log::{info, warn};

use raffle_cache_sdk::cache::Cache;
use raffle_cache_sdk::coalescer::{Coalescer, InflightRegistry};
use raffle_cache_sdk::contract_reader::RpcContractReader;
use raffle_cache_sdk::invalidation::InvalidationHook;
use raffle_cache_sdk::kv_store::{KvStore, NullStore, RedisStore};
use raffle_cache_sdk::raffle_service::RaffleService;
use raffle_cache_sdk::server::{router, AppState};
use raffle_cache_sdk::settings::Settings;
use raffle_cache_sdk::social_api::SocialGraphClient;
use raffle_cache_sdk::types::parse_address;

#[derive(Parser, Debug)]
#[command(name = "raffle-cache-server", about = "Caching layer for the raffle dApp")]
struct Args {
    /// Config file path (without extension), overridable via RAFFLE__* env vars
    #[arg(long, default_value = "config/default")]
    config: String,

    /// Bind address override
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    env_logger::init();

    let args = Args::parse();
    let settings = Settings::from_file(&args.config).context("Failed to load settings")?;
    let bind = args.bind.unwrap_or_else(|| settings.server.bind.clone());

    // Unreachable redis is not fatal: the NullStore turns every lookup into
    // an upstream fetch, which is degraded but correct.
    let store: Arc<dyn KvStore> = match RedisStore::connect(&settings.redis.url).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            warn!("redis unavailable, running uncached: {e:#}");
            Arc::new(NullStore)
        }
    };

    let provider = Provider::<Http>::try_from(settings.rpc.url.as_str())
        .context("Failed to build rpc provider")?;
    let factory = parse_address(&settings.rpc.factory_address)
        .map_err(|e| anyhow::anyhow!("invalid factory address: {e}"))?;
    let reader = Arc::new(RpcContractReader::new(Arc::new(provider), factory));
    let social = Arc::new(SocialGraphClient::new(settings.neynar.api_key.clone())?);

    let cache = Cache::new(store.clone());
    let registry = Arc::new(InflightRegistry::new());
    let coalescer = Coalescer::new(cache.clone(), registry);
    let service = RaffleService::new(
        cache.clone(),
        coalescer,
        reader,
        social,
        settings.cache.clone(),
    );
    let hook = InvalidationHook::new(cache.clone());

    let state = Arc::new(AppState {
        service,
        hook,
        cache,
        store,
    });

    info!("listening on {bind}");
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind {bind}"))?;
    axum::serve(listener, router(state))
        .await
        .context("server error")?;
    Ok(())
}
