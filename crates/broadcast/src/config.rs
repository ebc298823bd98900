//! Gossip timing configuration

use std::time::Duration;

/// Default delay between two sends to the same neighbor (50ms)
pub const DEFAULT_RETRY_INTERVAL_MS: u64 = 50;

/// Default sleep when a neighbor has nothing pending (20ms)
pub const DEFAULT_IDLE_BACKOFF_MS: u64 = 20;

/// Default bound on a single gossip RPC (1s)
pub const DEFAULT_RPC_TIMEOUT_MS: u64 = 1_000;

/// Default time allowed for a sender loop to exit on shutdown (5s)
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 5;

/// Timing of the per-neighbor sender loops
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GossipConfig {
    /// Delay after a send attempt before the next one
    pub retry_interval: Duration,
    /// Delay before re-checking an empty queue
    pub idle_backoff: Duration,
    /// Bound on how long one gossip RPC may wait for its reply
    pub rpc_timeout: Duration,
    /// Bound on how long shutdown waits for each sender loop
    pub shutdown_timeout: Duration,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_millis(DEFAULT_RETRY_INTERVAL_MS),
            idle_backoff: Duration::from_millis(DEFAULT_IDLE_BACKOFF_MS),
            rpc_timeout: Duration::from_millis(DEFAULT_RPC_TIMEOUT_MS),
            shutdown_timeout: Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
        }
    }
}

impl GossipConfig {
    /// Override the retry interval
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Override the idle backoff
    pub fn with_idle_backoff(mut self, backoff: Duration) -> Self {
        self.idle_backoff = backoff;
        self
    }

    /// Override the RPC timeout
    pub fn with_rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = timeout;
        self
    }

    /// Override the shutdown timeout
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}
