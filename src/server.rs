//! # HTTP Surface
//!
//! Thin axum router over the service layer. Handlers translate lookups into
//! JSON envelopes carrying the observability flags (`cached`,
//! `deduplicated`, `rateLimited`) and map `FetchError` variants onto status
//! codes: throttling is 429, rejected input 400, upstream failure 502.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::error;
use serde::{Deserialize, Serialize};

use crate::cache::Cache;
use crate::coalescer::Lookup;
use crate::errors::FetchError;
use crate::invalidation::{DomainEvent, InvalidationHook};
use crate::kv_store::{KeyTtl, KvStore};
use crate::raffle_service::RaffleService;
use crate::types::{format_address, parse_address, FarcasterUser, RaffleRecord, TokenMetadata};

pub struct AppState {
    pub service: RaffleService,
    pub hook: InvalidationHook,
    pub cache: Cache,
    pub store: Arc<dyn KvStore>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/raffles", get(list_raffles))
        .route("/api/raffles/{address}", get(get_raffle))
        .route("/api/tokens/{address}", get(get_token_metadata))
        .route("/api/cast-likes", post(get_cast_likers))
        .route("/api/cache/invalidate", post(invalidate))
        .route("/api/cache/stats", get(cache_stats))
        .with_state(state)
}

/// Observability flags of a coalesced lookup, flattened into every response
/// envelope. Flags are omitted when false so plain hits stay compact.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LookupFlags {
    cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    deduplicated: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    rate_limited: Option<bool>,
}

impl<T> From<&Lookup<T>> for LookupFlags {
    fn from(lookup: &Lookup<T>) -> Self {
        Self {
            cached: lookup.cached,
            deduplicated: lookup.deduplicated.then_some(true),
            rate_limited: lookup.rate_limited.then_some(true),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for FetchError {
    fn into_response(self) -> Response {
        let status = match &self {
            FetchError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            FetchError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            FetchError::Upstream(reason) => {
                error!("request failed upstream: {reason}");
                StatusCode::BAD_GATEWAY
            }
        };
        let body = Json(ErrorResponse {
            error: self.to_string(),
        });
        (status, body).into_response()
    }
}

#[derive(Debug, Serialize)]
struct RaffleResponse {
    raffle: RaffleRecord,
    #[serde(flatten)]
    flags: LookupFlags,
}

async fn get_raffle(
    State(state): State<Arc<AppState>>,
    Path(address): Path<String>,
) -> Result<Json<RaffleResponse>, FetchError> {
    let lookup = state.service.get_raffle(&address).await?;
    Ok(Json(RaffleResponse {
        flags: LookupFlags::from(&lookup),
        raffle: lookup.value,
    }))
}

#[derive(Debug, Serialize)]
struct RaffleListResponse {
    raffles: Vec<RaffleRecord>,
    #[serde(flatten)]
    flags: LookupFlags,
}

async fn list_raffles(
    State(state): State<Arc<AppState>>,
) -> Result<Json<RaffleListResponse>, FetchError> {
    let lookup = state.service.list_raffles().await?;
    Ok(Json(RaffleListResponse {
        flags: LookupFlags::from(&lookup),
        raffles: lookup.value,
    }))
}

#[derive(Debug, Serialize)]
struct TokenMetadataResponse {
    metadata: TokenMetadata,
    #[serde(flatten)]
    flags: LookupFlags,
}

async fn get_token_metadata(
    State(state): State<Arc<AppState>>,
    Path(address): Path<String>,
) -> Result<Json<TokenMetadataResponse>, FetchError> {
    let lookup = state.service.get_token_metadata(&address).await?;
    Ok(Json(TokenMetadataResponse {
        flags: LookupFlags::from(&lookup),
        metadata: lookup.value,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CastLikesRequest {
    cast_hash: String,
}

#[derive(Debug, Serialize)]
struct CastLikesResponse {
    users: Vec<FarcasterUser>,
    #[serde(flatten)]
    flags: LookupFlags,
}

async fn get_cast_likers(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CastLikesRequest>,
) -> Result<Json<CastLikesResponse>, FetchError> {
    let lookup = state.service.get_cast_likers(&request.cast_hash).await?;
    Ok(Json(CastLikesResponse {
        flags: LookupFlags::from(&lookup),
        users: lookup.value,
    }))
}

#[derive(Debug, Deserialize)]
struct InvalidateRequest {
    /// Event name driving the invalidation; defaults to a balance change.
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    pattern: Option<String>,
}

#[derive(Debug, Serialize)]
struct InvalidateResponse {
    success: bool,
    deleted: u64,
}

fn parse_event(name: &str) -> Result<DomainEvent, FetchError> {
    match name {
        "winner_selected" => Ok(DomainEvent::WinnerSelected),
        "random_requested" => Ok(DomainEvent::RandomRequested),
        "prize_funded" => Ok(DomainEvent::PrizeFunded),
        "prize_distributed" => Ok(DomainEvent::PrizeDistributed),
        "balance_changed" => Ok(DomainEvent::BalanceChanged),
        other => Err(FetchError::InvalidInput(format!(
            "unknown domain event: {other}"
        ))),
    }
}

async fn invalidate(
    State(state): State<Arc<AppState>>,
    Json(request): Json<InvalidateRequest>,
) -> Result<Json<InvalidateResponse>, FetchError> {
    let event = match &request.event {
        Some(name) => parse_event(name)?,
        None => DomainEvent::BalanceChanged,
    };

    let mut deleted = 0u64;
    if let Some(address) = &request.address {
        let canonical = format_address(&parse_address(address)?);
        state.hook.on_raffle_event(event, &canonical).await;
        deleted += 1;
    }
    if let Some(key) = &request.key {
        state.hook.on_domain_event(event, &[key.clone()]).await;
        deleted += 1;
    }
    if let Some(pattern) = &request.pattern {
        deleted += state.cache.invalidate_pattern(pattern).await;
    }
    Ok(Json(InvalidateResponse {
        success: true,
        deleted,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CacheStats {
    total_keys: usize,
    permanent_keys: usize,
    expiring_keys: usize,
}

async fn cache_stats(State(state): State<Arc<AppState>>) -> Json<CacheStats> {
    let keys = state.store.keys("*").await;
    let mut permanent = 0;
    let mut expiring = 0;
    for key in &keys {
        match state.store.ttl(key).await {
            KeyTtl::Permanent => permanent += 1,
            KeyTtl::Expires(_) => expiring += 1,
            KeyTtl::Missing => {}
        }
    }
    Json(CacheStats {
        total_keys: keys.len(),
        permanent_keys: permanent,
        expiring_keys: expiring,
    })
}
