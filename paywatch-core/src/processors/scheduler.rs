//! ReconciliationScheduler processor.
//!
//! The ReconciliationScheduler is responsible for:
//! - Polling the store for unresolved payments on a fixed interval
//! - Skipping payments that are already queued or being verified
//! - Dispatching the rest onto the work queue in random order
//!
//! It is the safety net for transfers the event stream missed, and the
//! only path that retries payments whose transfer was seen but whose
//! balance had not caught up yet.

use super::in_flight::{Dispatch, PaymentDispatcher};
use crate::entities::{SharedPaymentStore, StoreError};
use rand::seq::SliceRandom;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{error, info};

/// Counters of one reconciliation cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PollSummary {
    /// Unresolved payments in the store, in flight or not.
    pub total: u64,
    pub enqueued: usize,
    /// Skipped because they were already in flight.
    pub excluded: usize,
}

pub struct ReconciliationScheduler {
    store: SharedPaymentStore,
    dispatcher: PaymentDispatcher,
    poll_interval: Duration,
}

impl ReconciliationScheduler {
    pub fn new(
        store: SharedPaymentStore,
        dispatcher: PaymentDispatcher,
        poll_interval: Duration,
    ) -> Self {
        Self {
            store,
            dispatcher,
            poll_interval,
        }
    }

    /// Run the ReconciliationScheduler until shutdown is signaled.
    ///
    /// The first cycle runs immediately.
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(interval = ?self.poll_interval, "ReconciliationScheduler started");

        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("ReconciliationScheduler received shutdown signal");
                        break;
                    }
                }

                _ = ticker.tick() => {
                    if let Err(e) = self.poll().await {
                        error!(error = %e, "Reconciliation poll failed");
                    }
                }
            }
        }

        info!("ReconciliationScheduler shutdown complete");
    }

    /// One reconciliation cycle.
    pub async fn poll(&self) -> Result<PollSummary, StoreError> {
        let in_flight = self.dispatcher.in_flight().snapshot();
        let mut payments = self.store.list_unresolved(&in_flight).await?;
        payments.shuffle(&mut rand::rng());

        let mut summary = PollSummary {
            excluded: in_flight.len(),
            ..PollSummary::default()
        };
        for payment in &payments {
            match self.dispatcher.dispatch(payment.id) {
                Dispatch::Enqueued => summary.enqueued += 1,
                // Claimed by the watcher since the snapshot was taken.
                Dispatch::AlreadyInFlight => summary.excluded += 1,
                Dispatch::QueueClosed => {
                    error!("Work queue closed, stopping dispatch");
                    break;
                }
            }
        }
        summary.total = self.store.count_unresolved().await?;

        info!(
            total = summary.total,
            enqueued = summary.enqueued,
            excluded = summary.excluded,
            "Reconciliation cycle complete"
        );
        Ok(summary)
    }
}
