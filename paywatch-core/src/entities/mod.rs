pub mod payment;
pub mod store;

pub use payment::{
    AMOUNT_SCALE, Attribution, MAX_PAYMENT_AMOUNT, NewPayment, Payment, PaymentId, PaymentUpdate,
};
pub use store::{MemoryPaymentStore, PaymentStore, StoreError};

use std::sync::Arc;

/// Store handle shared by all pipeline tasks.
pub type SharedPaymentStore = Arc<dyn PaymentStore>;
