//! Application state shared across all request handlers.

use paywatch_core::entities::SharedPaymentStore;
use paywatch_core::framework::DatabaseProcessor;
use paywatch_core::processors::PaymentDispatcher;

/// Application state that is shared across all request handlers.
///
/// This is cloneable and cheap to pass around (everything is behind Arc).
#[derive(Clone)]
pub struct AppState {
    /// Database query processor.
    pub db: DatabaseProcessor,
    /// Payment repository used by the payment routes.
    pub store: SharedPaymentStore,
    /// Hands new payments to the verification workers.
    pub dispatcher: PaymentDispatcher,
    /// Whether the event stream subscriber is running.
    pub stream_enabled: bool,
}

impl AppState {
    pub fn new(
        db: DatabaseProcessor,
        store: SharedPaymentStore,
        dispatcher: PaymentDispatcher,
        stream_enabled: bool,
    ) -> Self {
        Self {
            db,
            store,
            dispatcher,
            stream_enabled,
        }
    }
}
