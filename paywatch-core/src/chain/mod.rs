//! Chain access: the JSON-RPC client, decoding of chain-native encodings
//! and the token-level view used by the verification workers.

pub mod client;
pub mod codec;
pub mod transfer;
pub mod types;

pub use client::ChainClient;
pub use transfer::{TransferEvent, find_threshold_transfer, sort_chronologically};
pub use types::{Block, BlockTag, Log, Receipt, Transaction};

use crate::config::ChainConfig;
use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;
use time::OffsetDateTime;

/// Errors talking to a chain node.
#[derive(Debug, Error)]
pub enum ChainError {
    /// Network or HTTP failure, including timeouts and unreadable bodies.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The node answered with an error object.
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// The node answered with something we cannot decode.
    #[error("decode error: {0}")]
    Decode(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

/// Token-level reads needed to verify a payment.
///
/// Implemented by [`TokenContract`] against a live node.
#[async_trait]
pub trait TokenLedger: Send + Sync {
    /// Current token balance of `address`.
    async fn token_balance(&self, address: &str) -> Result<Decimal, ChainError>;

    /// All transfers received by `address`, in chain order.
    async fn transfers_to(&self, address: &str) -> Result<Vec<TransferEvent>, ChainError>;

    /// Timestamp of the given block, `None` if the node does not know it.
    async fn block_timestamp(&self, block_number: u64)
    -> Result<Option<OffsetDateTime>, ChainError>;
}

/// A single ERC20 contract observed through a [`ChainClient`].
#[derive(Debug)]
pub struct TokenContract {
    client: ChainClient,
    contract_address: String,
    transfer_topic: String,
    decimals: u32,
}

impl TokenContract {
    pub fn new(
        client: ChainClient,
        contract_address: String,
        transfer_topic: String,
        decimals: u32,
    ) -> Self {
        Self {
            client,
            contract_address,
            transfer_topic,
            decimals,
        }
    }

    pub fn from_config(config: &ChainConfig) -> Result<Self, ChainError> {
        let client = ChainClient::new(config.rpc_url.clone(), config.rpc_timeout)?;
        Ok(Self::new(
            client,
            config.contract_address.clone(),
            config.transfer_topic.clone(),
            config.token_decimals,
        ))
    }

    pub fn client(&self) -> &ChainClient {
        &self.client
    }
}

#[async_trait]
impl TokenLedger for TokenContract {
    async fn token_balance(&self, address: &str) -> Result<Decimal, ChainError> {
        let units = self
            .client
            .erc20_balance(&self.contract_address, address, BlockTag::Latest)
            .await?;
        codec::units_to_decimal(units, self.decimals)
    }

    async fn transfers_to(&self, address: &str) -> Result<Vec<TransferEvent>, ChainError> {
        let topics = [
            Some(self.transfer_topic.clone()),
            None,
            Some(codec::address_to_topic(address)?),
        ];
        let logs = self
            .client
            .logs(
                BlockTag::Earliest,
                BlockTag::Latest,
                &self.contract_address,
                &topics,
            )
            .await?;

        let mut transfers = logs
            .iter()
            .filter(|log| log.removed != Some(true))
            .map(|log| TransferEvent::from_log(log, self.decimals))
            .collect::<Result<Vec<_>, _>>()?;
        sort_chronologically(&mut transfers);
        Ok(transfers)
    }

    async fn block_timestamp(
        &self,
        block_number: u64,
    ) -> Result<Option<OffsetDateTime>, ChainError> {
        let block = self.client.block_by_number(block_number).await?;
        Ok(block.and_then(|b| b.timestamp))
    }
}
