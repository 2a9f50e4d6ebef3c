//! Token transfer events decoded from contract logs.

use super::ChainError;
use super::codec::{parse_quantity, topic_to_address, units_to_decimal};
use super::types::Log;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A `Transfer(address,address,uint256)` log with token decimals applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferEvent {
    pub block_number: u64,
    /// Position within the block, used to order transfers of one block.
    #[serde(default)]
    pub log_index: Option<u64>,
    pub tx_hash: String,
    pub from: String,
    pub to: String,
    pub tokens: Decimal,
}

impl TransferEvent {
    /// Decode a transfer log. `topics[1]` is the sender, `topics[2]` the
    /// recipient and `data` the amount in base units.
    pub fn from_log(log: &Log, decimals: u32) -> Result<Self, ChainError> {
        let [_, from, to, ..] = log.topics.as_slice() else {
            return Err(ChainError::Decode(format!(
                "transfer log has {} topics, expected 3",
                log.topics.len()
            )));
        };
        let block_number = log
            .block_number
            .ok_or_else(|| ChainError::Decode("transfer log without block number".to_string()))?;
        let tx_hash = log
            .transaction_hash
            .clone()
            .ok_or_else(|| ChainError::Decode("transfer log without transaction hash".to_string()))?;
        let data = log.data.as_deref().unwrap_or("0x");

        Ok(Self {
            block_number,
            log_index: log.log_index,
            tx_hash,
            from: topic_to_address(from)?,
            to: topic_to_address(to)?,
            tokens: units_to_decimal(parse_quantity(data)?, decimals)?,
        })
    }

    /// Chain order key: block first, then position within the block.
    pub fn chain_position(&self) -> (u64, u64) {
        (self.block_number, self.log_index.unwrap_or(0))
    }
}

/// Sort transfers into ascending chain order.
pub fn sort_chronologically(transfers: &mut [TransferEvent]) {
    transfers.sort_by_key(TransferEvent::chain_position);
}

/// Find the transfer whose amount makes the running total first reach
/// `amount`. Transfers must already be in chain order.
pub fn find_threshold_transfer(transfers: &[TransferEvent], amount: Decimal) -> Option<&TransferEvent> {
    let mut total = Decimal::ZERO;
    transfers.iter().find(|transfer| {
        total += transfer.tokens;
        total >= amount
    })
}
