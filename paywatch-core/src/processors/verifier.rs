//! Verification worker pool.
//!
//! Each worker pops `VerifyPayment` jobs from the shared work queue and
//! checks the payment's on-chain token balance:
//! - A payment whose transfer has been seen gets `max_attempts` balance
//!   checks with exponential backoff in between, absorbing node lag
//! - A payment never seen gets a single check
//! - Once the balance covers the amount, the payment is attributed to the
//!   transfer that crossed the threshold, marked paid and the postback fires
//!
//! The in-flight claim of a job is released when its worker is done with
//! it, whatever the outcome. Shutdown is only observed while a worker waits
//! for a job or sleeps between attempts, so a payment marked paid always
//! gets its postback.

use super::in_flight::InFlightSet;
use super::postback::Notifier;
use crate::chain::{ChainError, TokenLedger, find_threshold_transfer};
use crate::config::WorkerConfig;
use crate::entities::{
    Attribution, Payment, PaymentId, PaymentUpdate, SharedPaymentStore, StoreError,
};
use crate::events::{VerifyPayment, WorkReceiver};
use crate::utils::backoff::backoff_delay;
use kanau::processor::Processor;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Result of one verification job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    /// No payment with this id.
    Missing,
    /// Paid before or during this job, nothing was changed.
    AlreadyPaid,
    /// This job marked the payment paid.
    Paid { tx_hash: Option<String> },
    /// Every attempt saw a balance below the amount.
    Unpaid { balance: Decimal },
    /// Shutdown arrived during a backoff sleep.
    Interrupted { balance: Decimal },
}

/// Verifies single payments against the token ledger.
pub struct PaymentVerifier {
    store: SharedPaymentStore,
    ledger: Arc<dyn TokenLedger>,
    notifier: Arc<dyn Notifier>,
    max_attempts: u32,
    backoff_base: Duration,
    shutdown_rx: Option<watch::Receiver<bool>>,
}

impl PaymentVerifier {
    pub fn new(
        store: SharedPaymentStore,
        ledger: Arc<dyn TokenLedger>,
        notifier: Arc<dyn Notifier>,
        config: &WorkerConfig,
    ) -> Self {
        Self {
            store,
            ledger,
            notifier,
            max_attempts: config.max_attempts.max(1),
            backoff_base: config.backoff_base,
            shutdown_rx: None,
        }
    }

    /// Cut backoff sleeps short once `shutdown_rx` signals shutdown.
    pub fn with_shutdown(mut self, shutdown_rx: watch::Receiver<bool>) -> Self {
        self.shutdown_rx = Some(shutdown_rx);
        self
    }

    /// Sleep before the next attempt. Returns `false` if shutdown cut it short.
    async fn backoff(&self, attempt: u32) -> bool {
        let delay = tokio::time::sleep(backoff_delay(self.backoff_base, attempt));
        let Some(mut shutdown_rx) = self.shutdown_rx.clone() else {
            delay.await;
            return true;
        };
        tokio::select! {
            biased;

            _ = shutdown_requested(&mut shutdown_rx) => false,
            _ = delay => true,
        }
    }

    /// Attempts granted to a job, fixed when the job starts.
    fn attempts_for(&self, payment: &Payment) -> u32 {
        if payment.seen_at.is_some() {
            self.max_attempts
        } else {
            1
        }
    }

    async fn mark_seen(&self, id: PaymentId) -> Result<(), StoreError> {
        let seen_at = OffsetDateTime::now_utc();
        if self
            .store
            .update(id, PaymentUpdate::Seen { seen_at })
            .await?
            .is_some()
        {
            debug!(payment_id = %id, "Recorded first balance sighting");
        }
        Ok(())
    }

    /// Find the transfer whose arrival made the balance reach the amount.
    async fn attribute(&self, payment: &Payment) -> Result<Option<Attribution>, ChainError> {
        let transfers = self.ledger.transfers_to(&payment.address).await?;
        let Some(transfer) = find_threshold_transfer(&transfers, payment.amount) else {
            warn!(
                payment_id = %payment.id,
                address = %payment.address,
                transfers = transfers.len(),
                "Balance covers amount but no transfer reaches it"
            );
            return Ok(None);
        };

        let block_timestamp = self.ledger.block_timestamp(transfer.block_number).await?;
        let block_number = i64::try_from(transfer.block_number).map_err(|_| {
            ChainError::Decode(format!("block number {} out of range", transfer.block_number))
        })?;
        Ok(Some(Attribution {
            tx_hash: transfer.tx_hash.clone(),
            from_address: transfer.from.clone(),
            block_number,
            block_timestamp,
        }))
    }

    async fn settle(&self, payment: &Payment) -> Result<Verification, VerifyError> {
        let attribution = self.attribute(payment).await?;
        let update = PaymentUpdate::Paid {
            paid_at: OffsetDateTime::now_utc(),
            attribution,
        };
        let Some(paid) = self.store.update(payment.id, update).await? else {
            debug!(payment_id = %payment.id, "Payment settled concurrently");
            return Ok(Verification::AlreadyPaid);
        };

        info!(
            payment_id = %paid.id,
            tx_hash = ?paid.tx_hash,
            block_number = ?paid.block_number,
            "Payment is paid"
        );
        if let Err(e) = self.notifier.notify(&paid).await {
            warn!(payment_id = %paid.id, error = %e, "Postback failed");
        }
        Ok(Verification::Paid {
            tx_hash: paid.tx_hash,
        })
    }
}

impl Processor<VerifyPayment> for PaymentVerifier {
    type Output = Verification;
    type Error = VerifyError;

    async fn process(&self, job: VerifyPayment) -> Result<Verification, VerifyError> {
        let Some(payment) = self.store.get(job.payment_id).await? else {
            warn!(payment_id = %job.payment_id, "Payment vanished before verification");
            return Ok(Verification::Missing);
        };
        if !payment.is_unresolved() {
            return Ok(Verification::AlreadyPaid);
        }

        let attempts = self.attempts_for(&payment);
        let mut seen = payment.seen_at.is_some();
        let mut balance = Decimal::ZERO;

        for attempt in 0..attempts {
            balance = self
                .ledger
                .token_balance(&payment.address)
                .await
                .inspect_err(|e| {
                    warn!(
                        payment_id = %payment.id,
                        attempt = attempt + 1,
                        attempts,
                        error = %e,
                        "Balance check failed"
                    );
                })?;
            debug!(
                payment_id = %payment.id,
                attempt = attempt + 1,
                attempts,
                balance = %balance,
                amount = %payment.amount,
                "Balance checked"
            );

            if balance > Decimal::ZERO && !seen {
                self.mark_seen(payment.id).await?;
                seen = true;
            }
            if balance >= payment.amount {
                return self.settle(&payment).await;
            }
            if attempt + 1 < attempts && !self.backoff(attempt).await {
                return Ok(Verification::Interrupted { balance });
            }
        }

        Ok(Verification::Unpaid { balance })
    }
}

/// Fixed-size set of workers sharing one work queue.
pub struct VerificationPool {
    verifier: PaymentVerifier,
    in_flight: Arc<InFlightSet>,
    work_rx: WorkReceiver,
    threads: usize,
}

impl VerificationPool {
    pub fn new(
        verifier: PaymentVerifier,
        in_flight: Arc<InFlightSet>,
        work_rx: WorkReceiver,
        threads: usize,
    ) -> Self {
        Self {
            verifier,
            in_flight,
            work_rx,
            threads: threads.max(1),
        }
    }

    /// Spawn every worker. Each one stops on shutdown or once the queue is
    /// closed and drained.
    pub fn spawn(self, shutdown_rx: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        info!(threads = self.threads, "VerificationPool starting");
        let verifier = Arc::new(self.verifier.with_shutdown(shutdown_rx.clone()));
        (0..self.threads)
            .map(|worker| {
                let verifier = verifier.clone();
                let in_flight = self.in_flight.clone();
                let work_rx = self.work_rx.clone();
                let shutdown_rx = shutdown_rx.clone();
                tokio::spawn(run_worker(worker, verifier, in_flight, work_rx, shutdown_rx))
            })
            .collect()
    }
}

async fn run_worker(
    worker: usize,
    verifier: Arc<PaymentVerifier>,
    in_flight: Arc<InFlightSet>,
    work_rx: WorkReceiver,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    debug!(worker, "Verification worker started");

    loop {
        let job = tokio::select! {
            biased;

            _ = shutdown_requested(&mut shutdown_rx) => break,

            job = work_rx.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        let _claim = in_flight.guard(job.payment_id);
        match verifier.process(job).await {
            Ok(Verification::Paid { tx_hash }) => {
                debug!(worker, payment_id = %job.payment_id, tx_hash = ?tx_hash, "Job settled payment");
            }
            Ok(Verification::Unpaid { balance }) => {
                debug!(worker, payment_id = %job.payment_id, balance = %balance, "Payment still unpaid");
            }
            Ok(Verification::Interrupted { balance }) => {
                debug!(worker, payment_id = %job.payment_id, balance = %balance, "Job interrupted by shutdown");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                error!(worker, payment_id = %job.payment_id, error = %e, "Verification failed");
            }
        }
    }

    debug!(worker, "Verification worker stopped");
}

/// Resolves once shutdown is signaled or the signal sender is gone.
async fn shutdown_requested(shutdown_rx: &mut watch::Receiver<bool>) {
    while !*shutdown_rx.borrow_and_update() {
        if shutdown_rx.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::TransferEvent;
    use crate::entities::{MemoryPaymentStore, NewPayment, PaymentStore};
    use crate::events::work_queue;
    use crate::processors::postback::PostbackError;
    use crate::processors::{PaymentDispatcher, ReconciliationScheduler};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const ADDRESS: &str = "0x00000000000000000000000000000000000000aa";
    const PAYER: &str = "0x00000000000000000000000000000000000000bb";

    /// Replays scripted balances; the last one repeats forever.
    struct ScriptedLedger {
        balances: Mutex<VecDeque<Result<Decimal, ()>>>,
        transfers: Vec<TransferEvent>,
        balance_calls: AtomicUsize,
    }

    impl ScriptedLedger {
        fn new(balances: &[Result<Decimal, ()>], transfers: Vec<TransferEvent>) -> Self {
            Self {
                balances: Mutex::new(balances.iter().cloned().collect()),
                transfers,
                balance_calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.balance_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TokenLedger for ScriptedLedger {
        async fn token_balance(&self, _address: &str) -> Result<Decimal, ChainError> {
            self.balance_calls.fetch_add(1, Ordering::SeqCst);
            let mut balances = self.balances.lock().unwrap();
            let next = if balances.len() > 1 {
                balances.pop_front().unwrap()
            } else {
                balances.front().cloned().unwrap()
            };
            next.map_err(|()| ChainError::Rpc {
                code: -32000,
                message: "node unavailable".to_string(),
            })
        }

        async fn transfers_to(&self, _address: &str) -> Result<Vec<TransferEvent>, ChainError> {
            Ok(self.transfers.clone())
        }

        async fn block_timestamp(
            &self,
            block_number: u64,
        ) -> Result<Option<OffsetDateTime>, ChainError> {
            Ok(OffsetDateTime::from_unix_timestamp(block_number as i64 * 10).ok())
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        delivered: Mutex<Vec<PaymentId>>,
    }

    impl RecordingNotifier {
        fn count(&self) -> usize {
            self.delivered.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, payment: &Payment) -> Result<(), PostbackError> {
            self.delivered.lock().unwrap().push(payment.id);
            Ok(())
        }
    }

    fn tokens(units: i64, scale: u32) -> Decimal {
        Decimal::new(units, scale)
    }

    fn transfer(block_number: u64, amount: Decimal) -> TransferEvent {
        TransferEvent {
            block_number,
            log_index: Some(0),
            tx_hash: format!("0x{block_number:064x}"),
            from: PAYER.to_string(),
            to: ADDRESS.to_string(),
            tokens: amount,
        }
    }

    fn split_payment() -> Vec<TransferEvent> {
        vec![
            transfer(1, tokens(2, 0)),
            transfer(2, tokens(2, 0)),
            transfer(3, tokens(15, 1)),
        ]
    }

    struct Fixture {
        store: Arc<MemoryPaymentStore>,
        ledger: Arc<ScriptedLedger>,
        notifier: Arc<RecordingNotifier>,
        verifier: PaymentVerifier,
    }

    fn fixture(balances: &[Result<Decimal, ()>]) -> Fixture {
        let store = Arc::new(MemoryPaymentStore::new());
        let ledger = Arc::new(ScriptedLedger::new(balances, split_payment()));
        let notifier = Arc::new(RecordingNotifier::default());
        let verifier = PaymentVerifier::new(
            store.clone(),
            ledger.clone(),
            notifier.clone(),
            &WorkerConfig::default(),
        );
        Fixture {
            store,
            ledger,
            notifier,
            verifier,
        }
    }

    async fn create_payment(store: &MemoryPaymentStore, seen: bool) -> Payment {
        let payment = store
            .create(NewPayment {
                amount: tokens(5, 0),
                address: ADDRESS.to_string(),
                postback_url: Some("https://merchant.example/postback".to_string()),
                data: None,
            })
            .await
            .unwrap();
        if !seen {
            return payment;
        }
        store
            .update(
                payment.id,
                PaymentUpdate::Seen {
                    seen_at: OffsetDateTime::now_utc(),
                },
            )
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_lagging_balance_is_retried_until_paid() {
        let f = fixture(&[Ok(Decimal::ZERO), Ok(Decimal::ZERO), Ok(tokens(55, 1))]);
        let payment = create_payment(&f.store, true).await;

        let started = tokio::time::Instant::now();
        let result = f
            .verifier
            .process(VerifyPayment {
                payment_id: payment.id,
            })
            .await
            .unwrap();

        // 1s after the first attempt, 2s after the second.
        assert_eq!(started.elapsed(), Duration::from_secs(3));
        assert_eq!(f.ledger.calls(), 3);
        assert_eq!(
            result,
            Verification::Paid {
                tx_hash: Some(format!("0x{:064x}", 3)),
            }
        );

        let stored = f.store.get(payment.id).await.unwrap().unwrap();
        assert!(stored.paid_at.is_some());
        assert_eq!(stored.block_number, Some(3));
        assert_eq!(stored.from_address.as_deref(), Some(PAYER));
        assert_eq!(stored.block_timestamp.map(|t| t.unix_timestamp()), Some(30));
        assert_eq!(f.notifier.count(), 1);

        // A second job for the same payment changes nothing.
        let again = f
            .verifier
            .process(VerifyPayment {
                payment_id: payment.id,
            })
            .await
            .unwrap();
        assert_eq!(again, Verification::AlreadyPaid);
        assert_eq!(f.notifier.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_seen_payment_exhausts_attempts_without_trailing_sleep() {
        let f = fixture(&[Ok(tokens(1, 0))]);
        let payment = create_payment(&f.store, true).await;

        let started = tokio::time::Instant::now();
        let result = f
            .verifier
            .process(VerifyPayment {
                payment_id: payment.id,
            })
            .await
            .unwrap();

        assert_eq!(result, Verification::Unpaid { balance: tokens(1, 0) });
        assert_eq!(f.ledger.calls(), 5);
        assert_eq!(started.elapsed(), Duration::from_secs(1 + 2 + 4 + 8));
        assert_eq!(f.notifier.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unseen_payment_gets_a_single_attempt() {
        let f = fixture(&[Ok(Decimal::ZERO)]);
        let payment = create_payment(&f.store, false).await;

        let result = f
            .verifier
            .process(VerifyPayment {
                payment_id: payment.id,
            })
            .await
            .unwrap();
        assert_eq!(result, Verification::Unpaid { balance: Decimal::ZERO });
        assert_eq!(f.ledger.calls(), 1);
        assert!(f.store.get(payment.id).await.unwrap().unwrap().seen_at.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_balance_marks_seen() {
        let f = fixture(&[Ok(tokens(2, 0))]);
        let payment = create_payment(&f.store, false).await;

        f.verifier
            .process(VerifyPayment {
                payment_id: payment.id,
            })
            .await
            .unwrap();
        assert_eq!(f.ledger.calls(), 1);
        let stored = f.store.get(payment.id).await.unwrap().unwrap();
        assert!(stored.seen_at.is_some());
        assert!(stored.paid_at.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_balance_without_attributable_transfer() {
        let store = Arc::new(MemoryPaymentStore::new());
        let ledger = Arc::new(ScriptedLedger::new(&[Ok(tokens(5, 0))], Vec::new()));
        let notifier = Arc::new(RecordingNotifier::default());
        let verifier =
            PaymentVerifier::new(store.clone(), ledger, notifier.clone(), &WorkerConfig::default());
        let payment = create_payment(&store, false).await;

        let result = verifier
            .process(VerifyPayment {
                payment_id: payment.id,
            })
            .await
            .unwrap();
        assert_eq!(result, Verification::Paid { tx_hash: None });
        let stored = store.get(payment.id).await.unwrap().unwrap();
        assert!(stored.paid_at.is_some());
        assert!(stored.tx_hash.is_none());
        assert_eq!(notifier.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_chain_error_aborts_job() {
        let f = fixture(&[Ok(Decimal::ZERO), Err(())]);
        let payment = create_payment(&f.store, true).await;

        let err = f
            .verifier
            .process(VerifyPayment {
                payment_id: payment.id,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, VerifyError::Chain(ChainError::Rpc { .. })));
        assert_eq!(f.ledger.calls(), 2);
        assert!(f.store.get(payment.id).await.unwrap().unwrap().paid_at.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pool_settles_dispatched_payment_and_releases_claim() {
        let f = fixture(&[Ok(Decimal::ZERO), Ok(tokens(5, 0))]);
        let payment = create_payment(&f.store, true).await;

        let (work_tx, work_rx) = work_queue();
        let in_flight = Arc::new(InFlightSet::new());
        let dispatcher = PaymentDispatcher::new(in_flight.clone(), work_tx);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handles =
            VerificationPool::new(f.verifier, in_flight.clone(), work_rx, 3).spawn(shutdown_rx);
        assert_eq!(handles.len(), 3);

        let scheduler = ReconciliationScheduler::new(
            f.store.clone(),
            dispatcher.clone(),
            Duration::from_secs(10),
        );
        assert_eq!(scheduler.poll().await.unwrap().enqueued, 1);
        // Re-polling while the job is running enqueues nothing.
        assert_eq!(scheduler.poll().await.unwrap().enqueued, 0);

        while f.notifier.count() == 0 || !in_flight.is_empty() {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(f.notifier.count(), 1);

        // Paid payments are never enqueued again.
        let summary = scheduler.poll().await.unwrap();
        assert_eq!(summary.enqueued, 0);
        assert_eq!(summary.total, 0);

        shutdown_tx.send(true).unwrap();
        for handle in handles {
            handle.await.unwrap();
        }
    }

    /// Signals when a delivery starts, then takes `delay` to finish it.
    struct SlowNotifier {
        delay: Duration,
        started: tokio::sync::Notify,
        delivered: AtomicUsize,
    }

    #[async_trait]
    impl Notifier for SlowNotifier {
        async fn notify(&self, _payment: &Payment) -> Result<(), PostbackError> {
            self.started.notify_one();
            tokio::time::sleep(self.delay).await;
            self.delivered.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_postback_of_settled_payment() {
        let store = Arc::new(MemoryPaymentStore::new());
        let ledger = Arc::new(ScriptedLedger::new(&[Ok(tokens(5, 0))], split_payment()));
        let notifier = Arc::new(SlowNotifier {
            delay: Duration::from_millis(500),
            started: tokio::sync::Notify::new(),
            delivered: AtomicUsize::new(0),
        });
        let verifier =
            PaymentVerifier::new(store.clone(), ledger, notifier.clone(), &WorkerConfig::default());
        let payment = create_payment(&store, true).await;

        let (work_tx, work_rx) = work_queue();
        let in_flight = Arc::new(InFlightSet::new());
        let dispatcher = PaymentDispatcher::new(in_flight.clone(), work_tx);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handles = VerificationPool::new(verifier, in_flight, work_rx, 1).spawn(shutdown_rx);

        dispatcher.dispatch(payment.id);
        notifier.started.notified().await;
        shutdown_tx.send(true).unwrap();
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(store.get(payment.id).await.unwrap().unwrap().paid_at.is_some());
        assert_eq!(notifier.delivered.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cuts_backoff_short() {
        let f = fixture(&[Ok(Decimal::ZERO)]);
        let payment = create_payment(&f.store, true).await;

        let (work_tx, work_rx) = work_queue();
        let in_flight = Arc::new(InFlightSet::new());
        let dispatcher = PaymentDispatcher::new(in_flight.clone(), work_tx);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handles =
            VerificationPool::new(f.verifier, in_flight.clone(), work_rx, 1).spawn(shutdown_rx);

        dispatcher.dispatch(payment.id);
        while f.ledger.calls() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let started = tokio::time::Instant::now();
        shutdown_tx.send(true).unwrap();
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(f.ledger.calls(), 1);
        assert!(in_flight.is_empty());
    }
}
