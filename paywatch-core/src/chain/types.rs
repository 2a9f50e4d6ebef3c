//! Decoded chain objects.
//!
//! Field decoding is uniform across all objects: integer fields are parsed
//! from hex, native-currency amounts are scaled to ether, `from`/`to` are
//! lowercased, `status` becomes a flag and `timestamp` a UTC time. Fields
//! without a rule are kept verbatim in `extra`.

use super::codec;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{Map, Value};
use time::OffsetDateTime;

/// Block selector accepted by `eth_call`, `eth_getLogs` and friends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTag {
    Number(u64),
    Earliest,
    Latest,
    Pending,
}

impl BlockTag {
    pub fn to_param(self) -> Value {
        match self {
            BlockTag::Number(n) => Value::String(codec::encode_quantity(n)),
            BlockTag::Earliest => Value::String("earliest".to_string()),
            BlockTag::Latest => Value::String("latest".to_string()),
            BlockTag::Pending => Value::String("pending".to_string()),
        }
    }
}

impl From<u64> for BlockTag {
    fn from(value: u64) -> Self {
        BlockTag::Number(value)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default, deserialize_with = "codec::hex_u64")]
    pub nonce: Option<u64>,
    #[serde(default)]
    pub block_hash: Option<String>,
    #[serde(default, deserialize_with = "codec::hex_u64")]
    pub block_number: Option<u64>,
    #[serde(default, deserialize_with = "codec::hex_u64")]
    pub transaction_index: Option<u64>,
    #[serde(default, deserialize_with = "codec::lowercase_address")]
    pub from: Option<String>,
    #[serde(default, deserialize_with = "codec::lowercase_address")]
    pub to: Option<String>,
    #[serde(default, deserialize_with = "codec::hex_native_amount")]
    pub value: Option<Decimal>,
    #[serde(default, deserialize_with = "codec::hex_u64")]
    pub gas: Option<u64>,
    #[serde(default, deserialize_with = "codec::hex_native_amount")]
    pub gas_price: Option<Decimal>,
    #[serde(default, deserialize_with = "codec::status_flag")]
    pub status: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    #[serde(default, deserialize_with = "codec::hex_u64")]
    pub number: Option<u64>,
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub parent_hash: Option<String>,
    #[serde(default, deserialize_with = "codec::hex_timestamp")]
    pub timestamp: Option<OffsetDateTime>,
    #[serde(default, deserialize_with = "codec::hex_u64")]
    pub gas_used: Option<u64>,
    #[serde(default)]
    pub transactions: Vec<Transaction>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Log {
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default, deserialize_with = "codec::hex_u64")]
    pub block_number: Option<u64>,
    #[serde(default)]
    pub block_hash: Option<String>,
    #[serde(default)]
    pub transaction_hash: Option<String>,
    #[serde(default, deserialize_with = "codec::hex_u64")]
    pub transaction_index: Option<u64>,
    #[serde(default, deserialize_with = "codec::hex_u64")]
    pub log_index: Option<u64>,
    #[serde(default)]
    pub removed: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    #[serde(default)]
    pub transaction_hash: Option<String>,
    #[serde(default, deserialize_with = "codec::hex_u64")]
    pub transaction_index: Option<u64>,
    #[serde(default)]
    pub block_hash: Option<String>,
    #[serde(default, deserialize_with = "codec::hex_u64")]
    pub block_number: Option<u64>,
    #[serde(default, deserialize_with = "codec::lowercase_address")]
    pub from: Option<String>,
    #[serde(default, deserialize_with = "codec::lowercase_address")]
    pub to: Option<String>,
    #[serde(default, deserialize_with = "codec::hex_u64")]
    pub cumulative_gas_used: Option<u64>,
    #[serde(default, deserialize_with = "codec::hex_u64")]
    pub gas_used: Option<u64>,
    #[serde(default, deserialize_with = "codec::status_flag")]
    pub status: Option<bool>,
    #[serde(default)]
    pub logs: Vec<Log>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_transaction_normalization() {
        let tx: Transaction = serde_json::from_value(json!({
            "hash": "0xabc",
            "nonce": "0xa",
            "value": "0xde0b6b3a7640000",
            "status": "0x1",
            "from": "0xAbCdEf0000000000000000000000000000000001",
            "to": null,
            "input": "0xdeadbeef"
        }))
        .unwrap();

        assert_eq!(tx.nonce, Some(10));
        assert_eq!(tx.value, Some(Decimal::ONE));
        assert_eq!(tx.status, Some(true));
        assert_eq!(
            tx.from.as_deref(),
            Some("0xabcdef0000000000000000000000000000000001")
        );
        assert_eq!(tx.to, None);
        assert_eq!(tx.extra.get("input"), Some(&json!("0xdeadbeef")));
    }

    #[test]
    fn test_block_decodes_embedded_transactions() {
        let block: Block = serde_json::from_value(json!({
            "number": "0x1b4",
            "hash": "0xblock",
            "timestamp": "0x5a0e3d3b",
            "gasUsed": "0x5208",
            "miner": "0xMiner",
            "transactions": [
                {"hash": "0x1", "gasPrice": "0x3b9aca00", "transactionIndex": "0x0", "from": "0xAA"},
                {"hash": "0x2", "gas": "0x5208", "transactionIndex": "0x1"}
            ]
        }))
        .unwrap();

        assert_eq!(block.number, Some(436));
        assert_eq!(block.gas_used, Some(21000));
        assert_eq!(
            block.timestamp,
            Some(OffsetDateTime::from_unix_timestamp(0x5a0e3d3b).unwrap())
        );
        assert_eq!(block.extra.get("miner"), Some(&json!("0xMiner")));
        assert_eq!(block.transactions.len(), 2);
        assert_eq!(
            block.transactions[0].gas_price,
            Some(Decimal::new(1, 9))
        );
        assert_eq!(block.transactions[0].from.as_deref(), Some("0xaa"));
        assert_eq!(block.transactions[1].transaction_index, Some(1));
        assert_eq!(block.transactions[1].gas, Some(21000));
    }

    #[test]
    fn test_receipt_status() {
        let ok: Receipt = serde_json::from_value(json!({
            "status": "0x1",
            "gasUsed": "0x5208",
            "cumulativeGasUsed": "0xa410",
            "logs": [{"logIndex": "0x2", "blockNumber": "0x10", "topics": []}]
        }))
        .unwrap();
        assert_eq!(ok.status, Some(true));
        assert_eq!(ok.cumulative_gas_used, Some(42000));
        assert_eq!(ok.logs[0].log_index, Some(2));
        assert_eq!(ok.logs[0].block_number, Some(16));

        let failed: Receipt = serde_json::from_value(json!({"status": "0x0"})).unwrap();
        assert_eq!(failed.status, Some(false));
    }

    #[test]
    fn test_malformed_hex_is_rejected() {
        let result = serde_json::from_value::<Transaction>(json!({"nonce": "0xnope"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_block_tag_params() {
        assert_eq!(BlockTag::Number(255).to_param(), json!("0xff"));
        assert_eq!(BlockTag::Latest.to_param(), json!("latest"));
        assert_eq!(BlockTag::Earliest.to_param(), json!("earliest"));
    }
}
