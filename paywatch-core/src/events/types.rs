//! Event type definitions for the reconciliation pipeline.
//!
//! Work items carry identifiers rather than full records; workers fetch
//! the current state from the store.

use crate::chain::TransferEvent;
use crate::entities::PaymentId;

/// A transfer pushed by the chain node, tagged with the logical name of
/// the subscription that delivered it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferObserved {
    pub subscription: String,
    pub transfer: TransferEvent,
}

/// A request to verify one payment on chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VerifyPayment {
    pub payment_id: PaymentId,
}
