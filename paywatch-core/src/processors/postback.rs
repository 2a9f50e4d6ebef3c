//! Merchant postback delivery.
//!
//! A postback is a single best-effort `POST` of
//! [`PostbackPayload`](paywatch_sdk::objects::PostbackPayload) to the
//! payment's `postback_url`. It is never retried and a failed delivery
//! does not undo the payment.

use crate::entities::Payment;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Errors that can occur during postback delivery.
#[derive(Debug, Error)]
pub enum PostbackError {
    /// HTTP request error
    #[error("HTTP request error: {0}")]
    Request(#[from] reqwest::Error),

    /// Merchant endpoint answered with a non-success status
    #[error("postback delivery failed with status {status}: {body}")]
    DeliveryFailed { status: u16, body: String },
}

/// Notifies the merchant that a payment settled.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, payment: &Payment) -> Result<(), PostbackError>;
}

pub struct HttpPostback {
    http_client: reqwest::Client,
}

impl HttpPostback {
    pub fn new(timeout: Duration) -> Result<Self, PostbackError> {
        Ok(Self {
            http_client: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }
}

#[async_trait]
impl Notifier for HttpPostback {
    async fn notify(&self, payment: &Payment) -> Result<(), PostbackError> {
        let Some(url) = payment.postback_url.as_deref() else {
            debug!(payment_id = %payment.id, "No postback URL, skipping");
            return Ok(());
        };

        let payload = payment.postback_payload();
        debug!(payment_id = %payment.id, url, payload = ?payload, "Sending postback");

        let response = self.http_client.post(url).json(&payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PostbackError::DeliveryFailed {
                status: status.as_u16(),
                body,
            });
        }

        info!(payment_id = %payment.id, status = status.as_u16(), "Postback delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::{Json, Router, routing::post};
    use paywatch_sdk::objects::PostbackPayload;
    use rust_decimal::Decimal;
    use serde_json::json;
    use time::OffsetDateTime;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    fn payment(postback_url: Option<String>) -> Payment {
        let now = OffsetDateTime::now_utc();
        Payment {
            id: Uuid::now_v7(),
            amount: Decimal::new(555, 2),
            address: "0x00000000000000000000000000000000000000aa".to_string(),
            seen_at: Some(now),
            paid_at: Some(now),
            tx_hash: Some("0xfeed".to_string()),
            from_address: None,
            block_number: Some(7),
            block_timestamp: None,
            postback_url,
            data: Some(json!({"order_id": 42})),
            created_at: now,
            updated_at: now,
        }
    }

    async fn spawn_merchant(status: StatusCode) -> (String, mpsc::UnboundedReceiver<PostbackPayload>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let router = Router::new().route(
            "/postback",
            post(move |Json(payload): Json<PostbackPayload>| {
                let tx = tx.clone();
                async move {
                    tx.send(payload).unwrap();
                    status
                }
            }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        (format!("http://{addr}/postback"), rx)
    }

    #[tokio::test]
    async fn test_postback_body() {
        let (url, mut rx) = spawn_merchant(StatusCode::OK).await;
        let payment = payment(Some(url));
        let notifier = HttpPostback::new(Duration::from_secs(5)).unwrap();

        notifier.notify(&payment).await.unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.id, payment.id);
        assert_eq!(received.tx_hash.as_deref(), Some("0xfeed"));
        assert_eq!(received.data, Some(json!({"order_id": 42})));
    }

    #[tokio::test]
    async fn test_rejected_postback() {
        let (url, _rx) = spawn_merchant(StatusCode::INTERNAL_SERVER_ERROR).await;
        let notifier = HttpPostback::new(Duration::from_secs(5)).unwrap();
        let err = notifier.notify(&payment(Some(url))).await.unwrap_err();
        assert!(matches!(err, PostbackError::DeliveryFailed { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_no_postback_url() {
        let notifier = HttpPostback::new(Duration::from_secs(5)).unwrap();
        notifier.notify(&payment(None)).await.unwrap();
    }
}
