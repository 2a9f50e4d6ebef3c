//! Event channel factories and handles.

use super::types::{TransferObserved, VerifyPayment};
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};

/// Default buffer size for event channels.
pub const DEFAULT_CHANNEL_BUFFER: usize = 256;

/// Sender handle for TransferObserved events.
pub type TransferEventSender = mpsc::Sender<TransferObserved>;
/// Receiver handle for TransferObserved events.
pub type TransferEventReceiver = mpsc::Receiver<TransferObserved>;

/// Create the internal event bus between the stream subscriber and the
/// transfer watcher.
pub fn transfer_event_channel() -> (TransferEventSender, TransferEventReceiver) {
    mpsc::channel(DEFAULT_CHANNEL_BUFFER)
}

/// Producer side of the verification work queue.
pub type WorkSender = mpsc::UnboundedSender<VerifyPayment>;

/// Consumer side of the verification work queue.
///
/// Cloned once per worker; workers take turns on the shared receiver so
/// every item is delivered to exactly one of them.
#[derive(Debug, Clone)]
pub struct WorkReceiver {
    inner: Arc<Mutex<mpsc::UnboundedReceiver<VerifyPayment>>>,
}

impl WorkReceiver {
    /// Wait for the next item. `None` once every sender is gone.
    pub async fn recv(&self) -> Option<VerifyPayment> {
        let mut rx = self.inner.lock().await;
        rx.recv().await
    }
}

/// Create the unbounded multi-producer, multi-consumer work queue.
pub fn work_queue() -> (WorkSender, WorkReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        tx,
        WorkReceiver {
            inner: Arc::new(Mutex::new(rx)),
        },
    )
}
