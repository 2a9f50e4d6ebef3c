//! TransferWatcher processor.
//!
//! The TransferWatcher is responsible for:
//! - Receiving `TransferObserved` events from the stream subscriber
//! - Looking up the unresolved payment watching the recipient address
//! - Recording the first sighting in `seen_at`
//! - Dispatching the payment for verification
//!
//! Transfers to addresses that no unresolved payment watches, or whose
//! payment is already in flight, are dropped.

use super::in_flight::{Dispatch, PaymentDispatcher};
use crate::entities::{PaymentId, PaymentUpdate, SharedPaymentStore, StoreError};
use crate::events::{TransferEventReceiver, TransferObserved};
use kanau::processor::Processor;
use time::OffsetDateTime;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// What the watcher did with a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
    Dispatched(PaymentId),
    /// No unresolved payment outside the in-flight set watches the recipient.
    Unmatched,
    AlreadyInFlight(PaymentId),
    QueueClosed,
}

pub struct TransferWatcher {
    store: SharedPaymentStore,
    dispatcher: PaymentDispatcher,
}

impl TransferWatcher {
    pub fn new(store: SharedPaymentStore, dispatcher: PaymentDispatcher) -> Self {
        Self { store, dispatcher }
    }

    /// Run the TransferWatcher.
    pub async fn run(
        self,
        mut shutdown_rx: watch::Receiver<bool>,
        mut event_rx: TransferEventReceiver,
    ) {
        info!("TransferWatcher started");

        loop {
            tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("TransferWatcher received shutdown signal");
                        break;
                    }
                }

                Some(event) = event_rx.recv() => {
                    if let Err(e) = self.process(event).await {
                        error!(error = %e, "Failed to process TransferObserved");
                    }
                }

                else => {
                    info!("TransferObserved channel closed");
                    break;
                }
            }
        }

        info!("TransferWatcher shutdown complete");
    }
}

impl Processor<TransferObserved> for TransferWatcher {
    type Output = WatchOutcome;
    type Error = StoreError;

    async fn process(&self, event: TransferObserved) -> Result<WatchOutcome, StoreError> {
        let transfer = &event.transfer;
        let in_flight = self.dispatcher.in_flight().snapshot();
        let Some(payment) = self
            .store
            .find_unresolved_by_address(&transfer.to, &in_flight)
            .await?
        else {
            debug!(
                to = %transfer.to,
                tx_hash = %transfer.tx_hash,
                "Transfer does not match a pending payment"
            );
            return Ok(WatchOutcome::Unmatched);
        };

        if payment.seen_at.is_none() {
            self.store
                .update(
                    payment.id,
                    PaymentUpdate::Seen {
                        seen_at: OffsetDateTime::now_utc(),
                    },
                )
                .await?;
        }

        let outcome = match self.dispatcher.dispatch(payment.id) {
            Dispatch::Enqueued => WatchOutcome::Dispatched(payment.id),
            Dispatch::AlreadyInFlight => WatchOutcome::AlreadyInFlight(payment.id),
            Dispatch::QueueClosed => WatchOutcome::QueueClosed,
        };
        info!(
            payment_id = %payment.id,
            address = %payment.address,
            tx_hash = %transfer.tx_hash,
            tokens = %transfer.tokens,
            outcome = ?outcome,
            "Transfer to pending payment"
        );
        Ok(outcome)
    }
}
