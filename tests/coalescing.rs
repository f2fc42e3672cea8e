//! End-to-end lifecycle of a raffle through the service layer: fresh fetch,
//! cache hit, TTL expiry, terminal transition, and permanent caching after.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ethers::types::Address;
use tokio::time::{advance, Duration};

use raffle_cache_sdk::cache::Cache;
use raffle_cache_sdk::coalescer::{Coalescer, InflightRegistry};
use raffle_cache_sdk::contract_reader::ContractReader;
use raffle_cache_sdk::kv_store::{KeyTtl, KvStore, MemoryStore};
use raffle_cache_sdk::raffle_service::RaffleService;
use raffle_cache_sdk::settings::CacheTunables;
use raffle_cache_sdk::social_api::SocialReader;
use raffle_cache_sdk::types::{format_address, keys, FarcasterUser, RaffleRecord, TokenMetadata};

fn addr(n: u64) -> Address {
    Address::from_low_u64_be(n)
}

fn record(address: Address, terminal: bool) -> RaffleRecord {
    RaffleRecord {
        raffle_address: format_address(&address),
        raffle_owner: format_address(&addr(0xaa)),
        raffle_token: format_address(&addr(0xbb)),
        raffle_winner: if terminal {
            format_address(&addr(0xcc))
        } else {
            format_address(&addr(0))
        },
        prize_distributed: terminal,
        last_request_id: "7".into(),
        token_decimals: 18,
        balance: "500000000000000000000".into(),
        final_prize_amount: if terminal {
            "500000000000000000000".into()
        } else {
            "0".into()
        },
    }
}

/// A mutable on-chain world the service reads from.
struct FakeChain {
    raffles: Mutex<HashMap<Address, RaffleRecord>>,
    fetches: AtomicUsize,
}

impl FakeChain {
    fn new() -> Self {
        Self {
            raffles: Mutex::new(HashMap::new()),
            fetches: AtomicUsize::new(0),
        }
    }

    fn put(&self, record: RaffleRecord) {
        let address: Address = record.raffle_address.parse().unwrap();
        self.raffles.lock().unwrap().insert(address, record);
    }

    fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContractReader for FakeChain {
    async fn fetch_raffle(&self, address: Address) -> anyhow::Result<RaffleRecord> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.raffles
            .lock()
            .unwrap()
            .get(&address)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no contract at {address:?}"))
    }

    async fn fetch_raffle_addresses(&self) -> anyhow::Result<Vec<Address>> {
        let mut addresses: Vec<Address> = self.raffles.lock().unwrap().keys().copied().collect();
        addresses.sort();
        Ok(addresses)
    }

    async fn fetch_token_metadata(&self, _address: Address) -> anyhow::Result<TokenMetadata> {
        Ok(TokenMetadata {
            name: "Prize Token".into(),
            symbol: "PRZ".into(),
            decimals: 18,
        })
    }
}

struct NoSocial;

#[async_trait]
impl SocialReader for NoSocial {
    async fn fetch_cast_likers(&self, _hash: &str) -> anyhow::Result<Vec<FarcasterUser>> {
        Ok(vec![])
    }
}

fn build(chain: Arc<FakeChain>) -> (RaffleService, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let cache = Cache::new(store.clone() as Arc<dyn KvStore>);
    let coalescer = Coalescer::new(cache.clone(), Arc::new(InflightRegistry::new()));
    let service = RaffleService::new(
        cache,
        coalescer,
        chain,
        Arc::new(NoSocial),
        CacheTunables::default(),
    );
    (service, store)
}

#[tokio::test(start_paused = true)]
async fn raffle_lifecycle_from_active_to_terminal() {
    let chain = Arc::new(FakeChain::new());
    chain.put(record(addr(1), false));
    let (service, store) = build(chain.clone());
    let address = format_address(&addr(1));

    // Fresh miss: one upstream fetch, stored with the active TTL.
    let lookup = service.get_raffle(&address).await.unwrap();
    assert!(!lookup.cached);
    assert!(!lookup.value.prize_distributed);
    assert_eq!(chain.fetches(), 1);
    assert!(matches!(
        store.ttl(&keys::raffle(&address)).await,
        KeyTtl::Expires(_)
    ));

    // Within the TTL: a hit, no upstream traffic.
    advance(Duration::from_secs(30)).await;
    let lookup = service.get_raffle(&address).await.unwrap();
    assert!(lookup.cached);
    assert_eq!(chain.fetches(), 1);

    // The raffle settles on chain, then the cached copy expires.
    chain.put(record(addr(1), true));
    advance(Duration::from_secs(31)).await;
    let lookup = service.get_raffle(&address).await.unwrap();
    assert!(!lookup.cached);
    assert!(lookup.value.prize_distributed);
    assert_eq!(chain.fetches(), 2);

    // Terminal records are stored without expiry and never re-fetched.
    assert_eq!(store.ttl(&keys::raffle(&address)).await, KeyTtl::Permanent);
    advance(Duration::from_secs(86_400)).await;
    let lookup = service.get_raffle(&address).await.unwrap();
    assert!(lookup.cached);
    assert_eq!(chain.fetches(), 2);
}

#[tokio::test(start_paused = true)]
async fn concurrent_list_requests_share_one_aggregation() {
    let chain = Arc::new(FakeChain::new());
    chain.put(record(addr(1), false));
    chain.put(record(addr(2), false));
    chain.put(record(addr(3), true));
    let (service, _) = build(chain.clone());
    let service = Arc::new(service);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let service = service.clone();
        handles.push(tokio::spawn(async move { service.list_raffles().await }));
    }
    for handle in handles {
        let lookup = handle.await.unwrap().unwrap();
        assert_eq!(lookup.value.len(), 3);
        // Newest first means the reverse of factory (ascending) order.
        assert_eq!(lookup.value[0].raffle_address, format_address(&addr(3)));
        assert_eq!(lookup.value[2].raffle_address, format_address(&addr(1)));
    }

    // One discovery pass, one fetch per raffle, across all 8 requests.
    assert_eq!(chain.fetches(), 3);
}

#[tokio::test(start_paused = true)]
async fn list_and_single_lookups_share_cached_records() {
    let chain = Arc::new(FakeChain::new());
    chain.put(record(addr(1), false));
    let (service, _) = build(chain.clone());

    // The list aggregation writes each record through under its entity key.
    service.list_raffles().await.unwrap();
    assert_eq!(chain.fetches(), 1);

    // So a single lookup right after is a pure cache hit.
    let lookup = service
        .get_raffle(&format_address(&addr(1)))
        .await
        .unwrap();
    assert!(lookup.cached);
    assert_eq!(chain.fetches(), 1);
}
