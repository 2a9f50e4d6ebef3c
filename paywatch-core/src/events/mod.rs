//! Channels and event types of the reconciliation pipeline.
//!
//! # Event Flow
//!
//! 1. `EventStreamSubscriber` publishes `TransferObserved` -> `TransferWatcher`
//! 2. `TransferWatcher` and `ReconciliationScheduler` claim a payment in the
//!    in-flight set and push `VerifyPayment` onto the work queue
//! 3. Verification workers pop `VerifyPayment`, settle the payment and fire
//!    the postback

pub mod channels;
pub mod types;

pub use channels::{
    DEFAULT_CHANNEL_BUFFER, TransferEventReceiver, TransferEventSender, WorkReceiver, WorkSender,
    transfer_event_channel, work_queue,
};
pub use types::{TransferObserved, VerifyPayment};
