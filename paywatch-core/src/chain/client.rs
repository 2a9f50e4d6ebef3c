//! JSON-RPC client over HTTP.

use super::ChainError;
use super::codec::{balance_of_calldata, encode_quantity, parse_quantity, parse_u64};
use super::types::{Block, BlockTag, Log, Receipt};
use paywatch_sdk::objects::{JsonRpcRequest, JsonRpcResponse};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Stateless request/decode layer over a chain node's HTTP endpoint.
///
/// Request ids increase monotonically per client. Failures are returned to
/// the caller as-is; retrying is up to the caller.
#[derive(Debug)]
pub struct ChainClient {
    url: Url,
    http_client: reqwest::Client,
    next_id: AtomicU64,
}

impl ChainClient {
    pub fn new(url: Url, timeout: Duration) -> Result<Self, ChainError> {
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url,
            http_client,
            next_id: AtomicU64::new(1),
        })
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Send a single request and return its raw `result`.
    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, ChainError> {
        let request = JsonRpcRequest::new(self.next_id(), method, params);
        debug!(id = request.id, method, "RPC request");

        let response: JsonRpcResponse = self
            .http_client
            .post(self.url.clone())
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        response.into_result().map_err(|e| ChainError::Rpc {
            code: e.code,
            message: e.message,
        })
    }

    async fn call_decoded<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, ChainError> {
        let result = self.call(method, params).await?;
        serde_json::from_value(result)
            .map_err(|e| ChainError::Decode(format!("{method}: {e}")))
    }

    async fn call_quantity(&self, method: &str, params: Vec<Value>) -> Result<u128, ChainError> {
        let result = self.call(method, params).await?;
        let Value::String(raw) = result else {
            return Err(ChainError::Decode(format!(
                "{method}: expected hex string, got {result}"
            )));
        };
        parse_quantity(&raw)
    }

    pub async fn block_number(&self) -> Result<u64, ChainError> {
        let result = self.call("eth_blockNumber", vec![]).await?;
        match result {
            Value::String(raw) => parse_u64(&raw),
            other => Err(ChainError::Decode(format!(
                "eth_blockNumber: expected hex string, got {other}"
            ))),
        }
    }

    /// Fetch a block with full transaction objects. `None` if unknown.
    pub async fn block_by_number(&self, number: u64) -> Result<Option<Block>, ChainError> {
        self.call_decoded(
            "eth_getBlockByNumber",
            vec![json!(encode_quantity(number)), json!(true)],
        )
        .await
    }

    pub async fn block_by_hash(&self, hash: &str) -> Result<Option<Block>, ChainError> {
        self.call_decoded("eth_getBlockByHash", vec![json!(hash), json!(true)])
            .await
    }

    pub async fn transaction_receipt(&self, hash: &str) -> Result<Option<Receipt>, ChainError> {
        self.call_decoded("eth_getTransactionReceipt", vec![json!(hash)])
            .await
    }

    /// ERC20 `balanceOf(address)` in base units.
    pub async fn erc20_balance(
        &self,
        contract: &str,
        address: &str,
        at: BlockTag,
    ) -> Result<u128, ChainError> {
        let call = json!({
            "to": contract,
            "data": balance_of_calldata(address)?,
        });
        self.call_quantity("eth_call", vec![call, at.to_param()])
            .await
    }

    /// `eth_getLogs`. `None` entries in `topics` match any value.
    pub async fn logs(
        &self,
        from_block: BlockTag,
        to_block: BlockTag,
        address: &str,
        topics: &[Option<String>],
    ) -> Result<Vec<Log>, ChainError> {
        let filter = json!({
            "fromBlock": from_block.to_param(),
            "toBlock": to_block.to_param(),
            "address": address,
            "topics": topics,
        });
        self.call_decoded("eth_getLogs", vec![filter]).await
    }
}
