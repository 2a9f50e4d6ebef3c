use crate::entities::store::{PaymentStore, StoreError};
use crate::framework::DatabaseProcessor;
use async_trait::async_trait;
use kanau::processor::Processor;
use paywatch_sdk::objects::{CreatePaymentResponse, PaymentStatusResponse, PostbackPayload};
use rust_decimal::Decimal;
use time::OffsetDateTime;
use uuid::Uuid;

pub type PaymentId = Uuid;

/// Fractional digits a payment amount may carry.
pub const AMOUNT_SCALE: u32 = 8;

/// Upper bound of a payment amount: the token's total supply.
pub const MAX_PAYMENT_AMOUNT: Decimal = Decimal::from_parts(20_999_984, 0, 0, false, 0);

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Payment {
    pub id: PaymentId,
    pub amount: Decimal,
    /// Lowercase `0x` hex, unique across payments.
    pub address: String,
    pub seen_at: Option<OffsetDateTime>,
    pub paid_at: Option<OffsetDateTime>,
    pub tx_hash: Option<String>,
    pub from_address: Option<String>,
    pub block_number: Option<i64>,
    pub block_timestamp: Option<OffsetDateTime>,
    pub postback_url: Option<String>,
    pub data: Option<serde_json::Value>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl Payment {
    /// A payment stays unresolved until `paid_at` is set.
    pub fn is_unresolved(&self) -> bool {
        self.paid_at.is_none()
    }

    pub fn postback_payload(&self) -> PostbackPayload {
        PostbackPayload {
            id: self.id,
            data: self.data.clone(),
            tx_hash: self.tx_hash.clone(),
        }
    }
}

impl From<&Payment> for PaymentStatusResponse {
    fn from(payment: &Payment) -> Self {
        PaymentStatusResponse {
            address: payment.address.clone(),
            amount: payment.amount,
            seen_at: payment.seen_at.map(OffsetDateTime::unix_timestamp),
            paid_at: payment.paid_at.map(OffsetDateTime::unix_timestamp),
            tx_hash: payment.tx_hash.clone(),
        }
    }
}

impl From<&Payment> for CreatePaymentResponse {
    fn from(payment: &Payment) -> Self {
        CreatePaymentResponse {
            id: payment.id,
            amount: payment.amount,
            address: payment.address.clone(),
        }
    }
}

/// Fields supplied when a payment is created.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPayment {
    pub amount: Decimal,
    pub address: String,
    pub postback_url: Option<String>,
    pub data: Option<serde_json::Value>,
}

impl NewPayment {
    /// Check the record invariants: a lowercase 20-byte hex address and a
    /// positive amount of at most [`AMOUNT_SCALE`] fractional digits no
    /// larger than [`MAX_PAYMENT_AMOUNT`].
    pub fn validate(&self) -> Result<(), StoreError> {
        let well_formed = self
            .address
            .strip_prefix("0x")
            .is_some_and(|hex| {
                hex.len() == 40 && hex.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f'))
            });
        if !well_formed {
            return Err(StoreError::InvalidAddress(self.address.clone()));
        }
        if self.amount <= Decimal::ZERO
            || self.amount > MAX_PAYMENT_AMOUNT
            || self.amount.normalize().scale() > AMOUNT_SCALE
        {
            return Err(StoreError::InvalidAmount(self.amount));
        }
        Ok(())
    }
}

/// Provenance of the transfer that settled a payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribution {
    pub tx_hash: String,
    pub from_address: String,
    pub block_number: i64,
    pub block_timestamp: Option<OffsetDateTime>,
}

/// Partial updates the core applies to a payment.
///
/// Both are conditional: `Seen` only fills an empty `seen_at`, `Paid` only
/// applies to an unresolved payment, so repeating either is harmless.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentUpdate {
    Seen {
        seen_at: OffsetDateTime,
    },
    Paid {
        paid_at: OffsetDateTime,
        attribution: Option<Attribution>,
    },
}

// ---------------------------------------------------------------------------
// SQL queries
// ---------------------------------------------------------------------------

const PAYMENT_COLUMNS: &str = r#"
    id, amount, address, seen_at, paid_at, tx_hash, from_address,
    block_number, block_timestamp, postback_url, data, created_at, updated_at
"#;

#[derive(Debug, Clone)]
pub struct InsertPayment {
    pub id: PaymentId,
    pub payment: NewPayment,
}

impl Processor<InsertPayment> for DatabaseProcessor {
    type Output = Payment;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:InsertPayment")]
    async fn process(&self, insert: InsertPayment) -> Result<Payment, sqlx::Error> {
        let InsertPayment { id, payment } = insert;
        let query = format!(
            r#"
            INSERT INTO payments (id, amount, address, postback_url, data)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {PAYMENT_COLUMNS}
            "#
        );
        sqlx::query_as::<_, Payment>(&query)
            .bind(id)
            .bind(payment.amount)
            .bind(payment.address)
            .bind(payment.postback_url)
            .bind(payment.data)
            .fetch_one(&self.pool)
            .await
    }
}

#[derive(Debug, Clone)]
pub struct GetPaymentById {
    pub id: PaymentId,
}

impl Processor<GetPaymentById> for DatabaseProcessor {
    type Output = Option<Payment>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetPaymentById")]
    async fn process(&self, query: GetPaymentById) -> Result<Option<Payment>, sqlx::Error> {
        let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1");
        sqlx::query_as::<_, Payment>(&sql)
            .bind(query.id)
            .fetch_optional(&self.pool)
            .await
    }
}

/// Unresolved payments, oldest first, skipping the given ids.
#[derive(Debug, Clone)]
pub struct ListUnresolvedPayments {
    pub exclude: Vec<PaymentId>,
}

impl Processor<ListUnresolvedPayments> for DatabaseProcessor {
    type Output = Vec<Payment>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:ListUnresolvedPayments")]
    async fn process(&self, query: ListUnresolvedPayments) -> Result<Vec<Payment>, sqlx::Error> {
        let sql = format!(
            r#"
            SELECT {PAYMENT_COLUMNS}
            FROM payments
            WHERE paid_at IS NULL
              AND NOT (id = ANY($1))
            ORDER BY created_at ASC
            "#
        );
        sqlx::query_as::<_, Payment>(&sql)
            .bind(query.exclude)
            .fetch_all(&self.pool)
            .await
    }
}

#[derive(Debug, Clone)]
pub struct CountUnresolvedPayments;

impl Processor<CountUnresolvedPayments> for DatabaseProcessor {
    type Output = u64;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:CountUnresolvedPayments")]
    async fn process(&self, _: CountUnresolvedPayments) -> Result<u64, sqlx::Error> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM payments WHERE paid_at IS NULL")
            .fetch_one(&self.pool)
            .await?;
        Ok(u64::try_from(count).unwrap_or_default())
    }
}

#[derive(Debug, Clone)]
pub struct FindUnresolvedPaymentByAddress {
    pub address: String,
    pub exclude: Vec<PaymentId>,
}

impl Processor<FindUnresolvedPaymentByAddress> for DatabaseProcessor {
    type Output = Option<Payment>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:FindUnresolvedPaymentByAddress")]
    async fn process(
        &self,
        query: FindUnresolvedPaymentByAddress,
    ) -> Result<Option<Payment>, sqlx::Error> {
        let sql = format!(
            r#"
            SELECT {PAYMENT_COLUMNS}
            FROM payments
            WHERE paid_at IS NULL
              AND address = $1
              AND NOT (id = ANY($2))
            LIMIT 1
            "#
        );
        sqlx::query_as::<_, Payment>(&sql)
            .bind(query.address)
            .bind(query.exclude)
            .fetch_optional(&self.pool)
            .await
    }
}

#[derive(Debug, Clone)]
pub struct UpdatePayment {
    pub id: PaymentId,
    pub update: PaymentUpdate,
}

impl Processor<UpdatePayment> for DatabaseProcessor {
    type Output = Option<Payment>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:UpdatePayment")]
    async fn process(&self, cmd: UpdatePayment) -> Result<Option<Payment>, sqlx::Error> {
        match cmd.update {
            PaymentUpdate::Seen { seen_at } => {
                let sql = format!(
                    r#"
                    UPDATE payments
                    SET seen_at = $2, updated_at = NOW()
                    WHERE id = $1 AND seen_at IS NULL
                    RETURNING {PAYMENT_COLUMNS}
                    "#
                );
                sqlx::query_as::<_, Payment>(&sql)
                    .bind(cmd.id)
                    .bind(seen_at)
                    .fetch_optional(&self.pool)
                    .await
            }
            PaymentUpdate::Paid {
                paid_at,
                attribution,
            } => {
                let sql = format!(
                    r#"
                    UPDATE payments
                    SET paid_at = $2,
                        tx_hash = $3,
                        from_address = $4,
                        block_number = $5,
                        block_timestamp = $6,
                        updated_at = NOW()
                    WHERE id = $1 AND paid_at IS NULL
                    RETURNING {PAYMENT_COLUMNS}
                    "#
                );
                let attribution = attribution.as_ref();
                sqlx::query_as::<_, Payment>(&sql)
                    .bind(cmd.id)
                    .bind(paid_at)
                    .bind(attribution.map(|a| a.tx_hash.clone()))
                    .bind(attribution.map(|a| a.from_address.clone()))
                    .bind(attribution.map(|a| a.block_number))
                    .bind(attribution.and_then(|a| a.block_timestamp))
                    .fetch_optional(&self.pool)
                    .await
            }
        }
    }
}

/// Ping used by the readiness probe.
#[derive(Debug, Clone)]
pub struct PingDatabase;

impl Processor<PingDatabase> for DatabaseProcessor {
    type Output = ();
    type Error = sqlx::Error;
    async fn process(&self, _: PingDatabase) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

fn map_insert_error(error: sqlx::Error, address: &str) -> StoreError {
    match &error {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::DuplicateAddress(address.to_string())
        }
        _ => StoreError::Database(error),
    }
}

#[async_trait]
impl PaymentStore for DatabaseProcessor {
    async fn create(&self, payment: NewPayment) -> Result<Payment, StoreError> {
        payment.validate()?;
        let address = payment.address.clone();
        self.process(InsertPayment {
            id: Uuid::now_v7(),
            payment,
        })
        .await
        .map_err(|e| map_insert_error(e, &address))
    }

    async fn get(&self, id: PaymentId) -> Result<Option<Payment>, StoreError> {
        Ok(self.process(GetPaymentById { id }).await?)
    }

    async fn list_unresolved(&self, exclude: &[PaymentId]) -> Result<Vec<Payment>, StoreError> {
        Ok(self
            .process(ListUnresolvedPayments {
                exclude: exclude.to_vec(),
            })
            .await?)
    }

    async fn count_unresolved(&self) -> Result<u64, StoreError> {
        Ok(self.process(CountUnresolvedPayments).await?)
    }

    async fn find_unresolved_by_address(
        &self,
        address: &str,
        exclude: &[PaymentId],
    ) -> Result<Option<Payment>, StoreError> {
        Ok(self
            .process(FindUnresolvedPaymentByAddress {
                address: address.to_string(),
                exclude: exclude.to_vec(),
            })
            .await?)
    }

    async fn update(
        &self,
        id: PaymentId,
        update: PaymentUpdate,
    ) -> Result<Option<Payment>, StoreError> {
        Ok(self.process(UpdatePayment { id, update }).await?)
    }
}
