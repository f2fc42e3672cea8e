//! # Contract Read Layer
//!
//! The upstream fetcher for chain entities. `ContractReader` is the seam the
//! cache layer depends on; `RpcContractReader` is the ethers-backed
//! implementation reading the raffle factory, individual raffle contracts,
//! and their ERC-20 prize tokens. Calls may be slow and fail transiently,
//! and must be safe to run concurrently for different addresses.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use ethers::providers::Middleware;
use ethers::types::Address;
use log::debug;

use crate::contracts::{Erc20, Raffle, RaffleFactory};
use crate::types::{format_address, RaffleRecord, TokenMetadata};

#[async_trait]
pub trait ContractReader: Send + Sync {
    /// Full projected state of one raffle, including token balance and the
    /// terminal flag.
    async fn fetch_raffle(&self, address: Address) -> Result<RaffleRecord>;

    /// Ordered list of all raffle addresses known to the factory (creation
    /// order; callers reverse for newest-first views).
    async fn fetch_raffle_addresses(&self) -> Result<Vec<Address>>;

    async fn fetch_token_metadata(&self, address: Address) -> Result<TokenMetadata>;
}

/// RPC-backed reader over any ethers middleware.
pub struct RpcContractReader<M> {
    provider: Arc<M>,
    factory: Address,
}

impl<M: Middleware + 'static> RpcContractReader<M> {
    pub fn new(provider: Arc<M>, factory: Address) -> Self {
        Self { provider, factory }
    }
}

#[async_trait]
impl<M: Middleware + 'static> ContractReader for RpcContractReader<M> {
    async fn fetch_raffle(&self, address: Address) -> Result<RaffleRecord> {
        debug!("fetching raffle {address:?} from chain");
        let raffle = Raffle::new(address, self.provider.clone());
        let (owner, token, winner, prize_distributed, last_request_id, final_prize_amount) =
            raffle
                .get_raffle_info()
                .call()
                .await
                .map_err(|e| anyhow!("getRaffleInfo failed for {address:?}: {e}"))?;

        let erc20 = Erc20::new(token, self.provider.clone());
        let decimals_call = erc20.decimals();
        let balance_call = erc20.balance_of(address);
        let (decimals, balance) = tokio::try_join!(
            async {
                decimals_call
                    .call()
                    .await
                    .map_err(|e| anyhow!("decimals failed for token {token:?}: {e}"))
            },
            async {
                balance_call
                    .call()
                    .await
                    .map_err(|e| anyhow!("balanceOf failed for token {token:?}: {e}"))
            },
        )?;

        Ok(RaffleRecord {
            raffle_address: format_address(&address),
            raffle_owner: format_address(&owner),
            raffle_token: format_address(&token),
            raffle_winner: format_address(&winner),
            prize_distributed,
            last_request_id: last_request_id.to_string(),
            token_decimals: decimals,
            balance: balance.to_string(),
            final_prize_amount: final_prize_amount.to_string(),
        })
    }

    async fn fetch_raffle_addresses(&self) -> Result<Vec<Address>> {
        let factory = RaffleFactory::new(self.factory, self.provider.clone());
        let addresses = factory
            .get_raffles()
            .call()
            .await
            .map_err(|e| anyhow!("getRaffles failed on factory {:?}: {e}", self.factory))?;
        debug!("factory reports {} raffles", addresses.len());
        Ok(addresses)
    }

    async fn fetch_token_metadata(&self, address: Address) -> Result<TokenMetadata> {
        let erc20 = Erc20::new(address, self.provider.clone());
        let name_call = erc20.name();
        let symbol_call = erc20.symbol();
        let decimals_call = erc20.decimals();
        let (name, symbol, decimals) = tokio::try_join!(
            async {
                name_call
                    .call()
                    .await
                    .map_err(|e| anyhow!("name failed for token {address:?}: {e}"))
            },
            async {
                symbol_call
                    .call()
                    .await
                    .map_err(|e| anyhow!("symbol failed for token {address:?}: {e}"))
            },
            async {
                decimals_call
                    .call()
                    .await
                    .map_err(|e| anyhow!("decimals failed for token {address:?}: {e}"))
            },
        )?;

        Ok(TokenMetadata { name, symbol, decimals })
    }
}
