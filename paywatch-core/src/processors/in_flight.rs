//! Deduplication of queued and running verification jobs.
//!
//! A payment id is claimed before it is pushed onto the work queue and
//! released once its worker is done with it, so a payment is never queued
//! or verified twice at the same time.

use crate::entities::PaymentId;
use crate::events::{VerifyPayment, WorkSender};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::trace;

#[derive(Debug, Default)]
pub struct InFlightSet {
    ids: Mutex<HashSet<PaymentId>>,
}

impl InFlightSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<PaymentId>> {
        self.ids.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Atomically add `id`. Returns `false` if it was already present.
    pub fn claim(&self, id: PaymentId) -> bool {
        self.lock().insert(id)
    }

    /// Remove `id`. Returns `false` if it was not present.
    pub fn release(&self, id: PaymentId) -> bool {
        self.lock().remove(&id)
    }

    pub fn contains(&self, id: PaymentId) -> bool {
        self.lock().contains(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Point-in-time copy of the claimed ids.
    pub fn snapshot(&self) -> Vec<PaymentId> {
        self.lock().iter().copied().collect()
    }

    /// Take over the claim on `id`; it is released when the guard drops.
    pub fn guard(self: &Arc<Self>, id: PaymentId) -> InFlightGuard {
        InFlightGuard {
            set: Arc::clone(self),
            id,
        }
    }
}

/// Releases a claimed id on drop, whichever way the job ended.
#[derive(Debug)]
pub struct InFlightGuard {
    set: Arc<InFlightSet>,
    id: PaymentId,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set.release(self.id);
        trace!(payment_id = %self.id, "Released in-flight claim");
    }
}

/// Result of handing a payment to the work queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Enqueued,
    /// Already queued or being verified.
    AlreadyInFlight,
    /// Every worker is gone.
    QueueClosed,
}

/// Single entry point to the work queue: claim, then enqueue.
#[derive(Debug, Clone)]
pub struct PaymentDispatcher {
    in_flight: Arc<InFlightSet>,
    work_tx: WorkSender,
}

impl PaymentDispatcher {
    pub fn new(in_flight: Arc<InFlightSet>, work_tx: WorkSender) -> Self {
        Self { in_flight, work_tx }
    }

    pub fn in_flight(&self) -> &Arc<InFlightSet> {
        &self.in_flight
    }

    pub fn dispatch(&self, payment_id: PaymentId) -> Dispatch {
        if !self.in_flight.claim(payment_id) {
            return Dispatch::AlreadyInFlight;
        }
        match self.work_tx.send(VerifyPayment { payment_id }) {
            Ok(()) => Dispatch::Enqueued,
            Err(_) => {
                self.in_flight.release(payment_id);
                Dispatch::QueueClosed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::work_queue;
    use uuid::Uuid;

    #[test]
    fn test_claim_and_release() {
        let set = InFlightSet::new();
        let id = Uuid::new_v4();
        assert!(set.claim(id));
        assert!(!set.claim(id));
        assert!(set.contains(id));
        assert_eq!(set.snapshot(), vec![id]);
        assert!(set.release(id));
        assert!(!set.release(id));
        assert!(set.is_empty());
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let set = Arc::new(InFlightSet::new());
        let id = Uuid::new_v4();
        set.claim(id);
        {
            let _guard = set.guard(id);
            assert!(set.contains(id));
        }
        assert!(!set.contains(id));
    }

    #[tokio::test]
    async fn test_dispatch_enqueues_once() {
        let (tx, rx) = work_queue();
        let dispatcher = PaymentDispatcher::new(Arc::new(InFlightSet::new()), tx);
        let id = Uuid::new_v4();

        assert_eq!(dispatcher.dispatch(id), Dispatch::Enqueued);
        assert_eq!(dispatcher.dispatch(id), Dispatch::AlreadyInFlight);
        assert_eq!(rx.recv().await, Some(VerifyPayment { payment_id: id }));
        assert_eq!(dispatcher.in_flight().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_dispatch_enqueues_once() {
        let (tx, rx) = work_queue();
        let dispatcher = PaymentDispatcher::new(Arc::new(InFlightSet::new()), tx);
        let id = Uuid::new_v4();
        let barrier = Arc::new(tokio::sync::Barrier::new(16));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let dispatcher = dispatcher.clone();
                let barrier = barrier.clone();
                tokio::spawn(async move {
                    barrier.wait().await;
                    dispatcher.dispatch(id)
                })
            })
            .collect();

        let mut enqueued = 0;
        for task in tasks {
            let outcome = task.await.unwrap();
            assert_ne!(outcome, Dispatch::QueueClosed);
            if outcome == Dispatch::Enqueued {
                enqueued += 1;
            }
        }
        assert_eq!(enqueued, 1);
        assert_eq!(rx.recv().await, Some(VerifyPayment { payment_id: id }));
        assert_eq!(dispatcher.in_flight().len(), 1);
    }

    #[test]
    fn test_dispatch_to_closed_queue_releases_claim() {
        let (tx, rx) = work_queue();
        drop(rx);
        let dispatcher = PaymentDispatcher::new(Arc::new(InFlightSet::new()), tx);
        let id = Uuid::new_v4();
        assert_eq!(dispatcher.dispatch(id), Dispatch::QueueClosed);
        assert!(!dispatcher.in_flight().contains(id));
    }
}
