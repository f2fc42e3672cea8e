//! # Event-Driven Invalidation
//!
//! Best-effort cache invalidation when a domain event mutates an entity.
//! Deleting the entity key and the aggregate list key forces the next read
//! to fetch fresh state; a failed or skipped invalidation degrades only to
//! staleness bounded by the TTLs, never to an error on the event path.

use log::info;

use crate::cache::Cache;
use crate::types::keys;

/// Lifecycle events that change a raffle's observable state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainEvent {
    WinnerSelected,
    RandomRequested,
    PrizeFunded,
    PrizeDistributed,
    BalanceChanged,
}

impl DomainEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            DomainEvent::WinnerSelected => "winner_selected",
            DomainEvent::RandomRequested => "random_requested",
            DomainEvent::PrizeFunded => "prize_funded",
            DomainEvent::PrizeDistributed => "prize_distributed",
            DomainEvent::BalanceChanged => "balance_changed",
        }
    }
}

#[derive(Clone)]
pub struct InvalidationHook {
    cache: Cache,
}

impl InvalidationHook {
    pub fn new(cache: Cache) -> Self {
        Self { cache }
    }

    /// Drop every affected key plus the aggregate list. Idempotent and
    /// infallible: absent keys are a no-op.
    pub async fn on_domain_event(&self, event: DomainEvent, affected_keys: &[String]) {
        for key in affected_keys {
            self.cache.invalidate(key).await;
        }
        self.cache.invalidate(keys::RAFFLE_LIST).await;
        info!(
            "invalidated {} keys + list for event {}",
            affected_keys.len(),
            event.as_str()
        );
    }

    /// The common case: an event concerning one raffle address.
    pub async fn on_raffle_event(&self, event: DomainEvent, address: &str) {
        self.on_domain_event(event, &[keys::raffle(address)]).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv_store::MemoryStore;
    use std::sync::Arc;

    #[tokio::test]
    async fn event_drops_entity_and_list_keys() {
        let cache = Cache::new(Arc::new(MemoryStore::new()));
        let hook = InvalidationHook::new(cache.clone());

        cache.set(&keys::raffle("0xabc"), &"record", Some(60)).await;
        cache.set(keys::RAFFLE_LIST, &"list", Some(30)).await;
        cache.set(&keys::raffle("0xdef"), &"other", Some(60)).await;

        hook.on_raffle_event(DomainEvent::PrizeDistributed, "0xabc").await;

        assert_eq!(cache.get::<String>(&keys::raffle("0xabc")).await, None);
        assert_eq!(cache.get::<String>(keys::RAFFLE_LIST).await, None);
        // Unrelated entities stay cached.
        assert!(cache.get::<String>(&keys::raffle("0xdef")).await.is_some());
    }

    #[tokio::test]
    async fn invalidation_is_idempotent() {
        let cache = Cache::new(Arc::new(MemoryStore::new()));
        let hook = InvalidationHook::new(cache.clone());

        // Nothing cached at all: still a clean no-op, twice.
        hook.on_raffle_event(DomainEvent::BalanceChanged, "0xabc").await;
        hook.on_raffle_event(DomainEvent::BalanceChanged, "0xabc").await;
    }
}
