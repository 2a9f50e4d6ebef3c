//! Chain node and token configuration.

use std::time::Duration;
use url::Url;

/// `keccak256("Transfer(address,address,uint256)")`
pub const DEFAULT_TRANSFER_TOPIC: &str =
    "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

#[derive(Debug, Clone)]
pub struct ChainConfig {
    /// HTTP JSON-RPC endpoint used for balance and log queries.
    pub rpc_url: Url,
    /// Websocket endpoint used for the log subscription.
    pub ws_url: Url,
    /// Upper bound for a single RPC round trip.
    pub rpc_timeout: Duration,
    /// Token contract, lowercase `0x` hex.
    pub contract_address: String,
    /// Topic of the transfer event, lowercase `0x` hex.
    pub transfer_topic: String,
    /// Fractional digits of the token's base unit.
    pub token_decimals: u32,
}
