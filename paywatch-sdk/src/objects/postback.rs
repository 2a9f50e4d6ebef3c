//! Postback payload delivered to the merchant once a payment is settled.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Body of the `POST` sent to a payment's `postback_url`.
///
/// `data` is forwarded verbatim from payment creation. `tx_hash` is `None`
/// when the balance was reached without a single attributable transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostbackPayload {
    pub id: Uuid,
    pub data: Option<serde_json::Value>,
    pub tx_hash: Option<String>,
}

impl PostbackPayload {
    /// Parse a postback request body as received by the merchant.
    pub fn from_slice(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }
}
