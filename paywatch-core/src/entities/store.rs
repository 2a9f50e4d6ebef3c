//! The payment repository seam.
//!
//! The pipeline only needs the operations of [`PaymentStore`]; the
//! PostgreSQL implementation lives on `DatabaseProcessor`, and
//! [`MemoryPaymentStore`] keeps everything in process.

use super::payment::{NewPayment, Payment, PaymentId, PaymentUpdate};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid payment address: {0}")]
    InvalidAddress(String),

    #[error("invalid payment amount: {0}")]
    InvalidAmount(Decimal),

    #[error("address already belongs to another payment: {0}")]
    DuplicateAddress(String),
}

#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Validate and insert a new payment with a fresh id.
    async fn create(&self, payment: NewPayment) -> Result<Payment, StoreError>;

    async fn get(&self, id: PaymentId) -> Result<Option<Payment>, StoreError>;

    /// All unresolved payments whose id is not in `exclude`.
    async fn list_unresolved(&self, exclude: &[PaymentId]) -> Result<Vec<Payment>, StoreError>;

    async fn count_unresolved(&self) -> Result<u64, StoreError>;

    /// The unresolved payment watching `address`, unless its id is in `exclude`.
    async fn find_unresolved_by_address(
        &self,
        address: &str,
        exclude: &[PaymentId],
    ) -> Result<Option<Payment>, StoreError>;

    /// Apply a conditional update. Returns the updated record, or `None`
    /// if the payment does not exist or the condition did not hold.
    async fn update(
        &self,
        id: PaymentId,
        update: PaymentUpdate,
    ) -> Result<Option<Payment>, StoreError>;
}

/// In-process store with the same semantics as the SQL one, including
/// address uniqueness.
#[derive(Debug, Default)]
pub struct MemoryPaymentStore {
    payments: Mutex<HashMap<PaymentId, Payment>>,
}

impl MemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PaymentId, Payment>> {
        self.payments.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a record as-is, bypassing validation.
    pub fn insert(&self, payment: Payment) {
        self.lock().insert(payment.id, payment);
    }

    fn sorted_unresolved(&self, exclude: &[PaymentId]) -> Vec<Payment> {
        let mut unresolved: Vec<Payment> = self
            .lock()
            .values()
            .filter(|p| p.is_unresolved() && !exclude.contains(&p.id))
            .cloned()
            .collect();
        unresolved.sort_by_key(|p| (p.created_at, p.id));
        unresolved
    }
}

#[async_trait]
impl PaymentStore for MemoryPaymentStore {
    async fn create(&self, payment: NewPayment) -> Result<Payment, StoreError> {
        payment.validate()?;
        let mut payments = self.lock();
        if payments.values().any(|p| p.address == payment.address) {
            return Err(StoreError::DuplicateAddress(payment.address));
        }
        let now = OffsetDateTime::now_utc();
        let record = Payment {
            id: Uuid::now_v7(),
            amount: payment.amount,
            address: payment.address,
            seen_at: None,
            paid_at: None,
            tx_hash: None,
            from_address: None,
            block_number: None,
            block_timestamp: None,
            postback_url: payment.postback_url,
            data: payment.data,
            created_at: now,
            updated_at: now,
        };
        payments.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get(&self, id: PaymentId) -> Result<Option<Payment>, StoreError> {
        Ok(self.lock().get(&id).cloned())
    }

    async fn list_unresolved(&self, exclude: &[PaymentId]) -> Result<Vec<Payment>, StoreError> {
        Ok(self.sorted_unresolved(exclude))
    }

    async fn count_unresolved(&self) -> Result<u64, StoreError> {
        Ok(self.lock().values().filter(|p| p.is_unresolved()).count() as u64)
    }

    async fn find_unresolved_by_address(
        &self,
        address: &str,
        exclude: &[PaymentId],
    ) -> Result<Option<Payment>, StoreError> {
        Ok(self
            .sorted_unresolved(exclude)
            .into_iter()
            .find(|p| p.address == address))
    }

    async fn update(
        &self,
        id: PaymentId,
        update: PaymentUpdate,
    ) -> Result<Option<Payment>, StoreError> {
        let mut payments = self.lock();
        let Some(payment) = payments.get_mut(&id) else {
            return Ok(None);
        };
        match update {
            PaymentUpdate::Seen { seen_at } => {
                if payment.seen_at.is_some() {
                    return Ok(None);
                }
                payment.seen_at = Some(seen_at);
            }
            PaymentUpdate::Paid {
                paid_at,
                attribution,
            } => {
                if payment.paid_at.is_some() {
                    return Ok(None);
                }
                payment.paid_at = Some(paid_at);
                if let Some(attribution) = attribution {
                    payment.tx_hash = Some(attribution.tx_hash);
                    payment.from_address = Some(attribution.from_address);
                    payment.block_number = Some(attribution.block_number);
                    payment.block_timestamp = attribution.block_timestamp;
                }
            }
        }
        payment.updated_at = OffsetDateTime::now_utc();
        Ok(Some(payment.clone()))
    }
}
