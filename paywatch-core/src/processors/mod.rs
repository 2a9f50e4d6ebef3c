//! Long-running tasks of the reconciliation pipeline:
//!
//! - `TransferWatcher`: Receives `TransferObserved`, dispatches `VerifyPayment`
//! - `ReconciliationScheduler`: Polls the store, dispatches `VerifyPayment`
//! - `VerificationPool`: Consumes `VerifyPayment`, settles payments and fires
//!   postbacks through a `Notifier`
//!
//! Both producers go through `PaymentDispatcher`, which claims the payment
//! in the `InFlightSet` before enqueueing it.

pub mod in_flight;
pub mod postback;
pub mod scheduler;
pub mod transfer_watcher;
pub mod verifier;

pub use in_flight::{Dispatch, InFlightGuard, InFlightSet, PaymentDispatcher};
pub use postback::{HttpPostback, Notifier, PostbackError};
pub use scheduler::{PollSummary, ReconciliationScheduler};
pub use transfer_watcher::{TransferWatcher, WatchOutcome};
pub use verifier::{PaymentVerifier, Verification, VerificationPool, VerifyError};
