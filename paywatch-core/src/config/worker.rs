//! Reconciliation and verification configuration.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Delay between reconciliation polls of the payment store.
    pub poll_interval: Duration,
    /// Number of verification workers.
    pub threads: usize,
    /// Balance checks per job once a transfer has been seen.
    pub max_attempts: u32,
    /// Attempt `i` sleeps `backoff_base * 2^i` before the next one.
    pub backoff_base: Duration,
    /// Timeout of a postback request.
    pub postback_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            threads: 10,
            max_attempts: 5,
            backoff_base: Duration::from_secs(1),
            postback_timeout: Duration::from_secs(30),
        }
    }
}
