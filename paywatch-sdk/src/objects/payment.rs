use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Body of `POST /payments`.
///
/// `address` is a fresh deposit address owned by the caller; it must not
/// belong to any other payment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatePaymentRequest {
    pub amount: rust_decimal::Decimal,
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postback_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Payment accepted for watching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePaymentResponse {
    pub id: Uuid,
    pub amount: rust_decimal::Decimal,
    pub address: String,
}

/// Status report for a single payment.
///
/// Timestamps are unix seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentStatusResponse {
    pub address: String,
    pub amount: rust_decimal::Decimal,
    pub seen_at: Option<i64>,
    pub paid_at: Option<i64>,
    pub tx_hash: Option<String>,
}

impl PaymentStatusResponse {
    pub fn is_paid(&self) -> bool {
        self.paid_at.is_some()
    }
}
