// Domain records cached by the layer, plus cache key construction.
//
// All arbitrary-precision numerics (balances, request ids, prize amounts) are
// decimal strings, never native numbers, so values above the safe integer
// range survive JSON round-trips without precision loss.

use chrono::{DateTime, Utc};
use ethers::types::Address;
use serde::{Deserialize, Serialize};

use crate::errors::FetchError;

/// Projected state of a single raffle contract.
///
/// `prize_distributed` is the terminal-state flag: once true the raffle can
/// never change again, so its cached representation is stored permanently.
/// That finality is a precondition inherited from the contract (the prize
/// distribution cannot revert), not something this layer verifies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RaffleRecord {
    pub raffle_address: String,
    pub raffle_owner: String,
    pub raffle_token: String,
    pub raffle_winner: String,
    pub prize_distributed: bool,
    /// Chainlink VRF request id, decimal string.
    pub last_request_id: String,
    pub token_decimals: u8,
    /// Current token balance of the raffle contract, decimal string.
    pub balance: String,
    /// Prize amount locked in at distribution time, decimal string.
    pub final_prize_amount: String,
}

impl RaffleRecord {
    /// True once the raffle reached its terminal state and will never change.
    pub fn is_terminal(&self) -> bool {
        self.prize_distributed
    }
}

/// ERC-20 metadata for the prize token. Rarely changes; cached with a long TTL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenMetadata {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

/// Records why an upstream fetch for an entity failed, so list aggregation
/// can skip known-bad entities instead of retrying them on every request.
/// Stored with a bounded TTL; retried automatically once it expires.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureRecord {
    pub reason: String,
    pub timestamp: DateTime<Utc>,
    pub error_type: String,
}

/// A Farcaster user as returned by the social-graph API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FarcasterUser {
    pub fid: u64,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub pfp_url: String,
    #[serde(default)]
    pub custody_address: String,
}

/// Canonical lowercase `0x`-prefixed form used in cache keys and payloads.
pub fn format_address(address: &Address) -> String {
    format!("{address:#x}")
}

/// Parse and validate an entity address, rejecting malformed input before
/// any cache or upstream interaction.
pub fn parse_address(input: &str) -> Result<Address, FetchError> {
    input
        .trim()
        .parse::<Address>()
        .map_err(|_| FetchError::InvalidInput(format!("invalid address: {input}")))
}

/// Cache key construction. One place so invalidation and read paths can
/// never disagree on key shapes.
pub mod keys {
    /// Aggregate list of all raffles, newest first.
    pub const RAFFLE_LIST: &str = "raffles:all";
    /// In-flight marker for the list aggregation.
    pub const RAFFLE_LIST_DEDUP: &str = "dedup:raffles:all";

    pub fn raffle(address: &str) -> String {
        format!("raffle:{address}")
    }

    pub fn raffle_dedup(address: &str) -> String {
        format!("dedup:raffle:{address}")
    }

    pub fn raffle_rate_limit(address: &str) -> String {
        format!("ratelimit:raffle:{address}")
    }

    pub fn failed(address: &str) -> String {
        format!("failed:{address}")
    }

    pub fn token_metadata(address: &str) -> String {
        format!("token:metadata:{address}")
    }

    pub fn cast_likes(hash: &str) -> String {
        format!("neynar:cast-likes:{hash}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_round_trip_is_lowercase() {
        let addr: Address = "0xDEAdBEEf00000000000000000000000000000000"
            .parse()
            .unwrap();
        let formatted = format_address(&addr);
        assert_eq!(formatted, "0xdeadbeef00000000000000000000000000000000");
        assert_eq!(parse_address(&formatted).unwrap(), addr);
    }

    #[test]
    fn parse_address_rejects_garbage() {
        assert!(parse_address("not-an-address").is_err());
        assert!(parse_address("0x1234").is_err());
        assert!(parse_address("").is_err());
    }

    #[test]
    fn numeric_fields_survive_json_as_strings() {
        let record = RaffleRecord {
            raffle_address: "0xdeadbeef00000000000000000000000000000000".into(),
            raffle_owner: "0x1100000000000000000000000000000000000011".into(),
            raffle_token: "0x2200000000000000000000000000000000000022".into(),
            raffle_winner: "0x0000000000000000000000000000000000000000".into(),
            prize_distributed: false,
            last_request_id: "98765432109876543210987654321098765432109876543210".into(),
            token_decimals: 18,
            balance: "1000000000000000000".into(),
            final_prize_amount: "0".into(),
        };
        let json = serde_json::to_string(&record).unwrap();
        // Never serialized as a native number.
        assert!(json.contains("\"balance\":\"1000000000000000000\""));
        let back: RaffleRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}
