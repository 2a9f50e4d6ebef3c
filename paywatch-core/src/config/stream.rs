//! Event stream subscriber configuration.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Interval of the `eth_blockNumber` keepalive probe.
    pub keepalive_interval: Duration,
    /// Fixed delay before reconnecting after a disconnect.
    pub reconnect_delay: Duration,
    /// A connection with no inbound frame for this long is considered dead.
    pub idle_timeout: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            keepalive_interval: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(1),
            idle_timeout: Duration::from_secs(60),
        }
    }
}
