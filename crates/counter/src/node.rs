//! Grow-only counter node.

use async_trait::async_trait;
use gossipcast_transport::{Body, Message, MessageHandler, TransportError, TransportResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

use crate::kv::{KvError, KvResult, KvStore};

/// Add request
pub const ADD: &str = "add";
/// Add acknowledgment
pub const ADD_OK: &str = "add_ok";
/// Read request
pub const READ: &str = "read";
/// Read response
pub const READ_OK: &str = "read_ok";

/// Key holding the counter by default
pub const DEFAULT_COUNTER_KEY: &str = "counter";

/// Default number of read/CAS rounds before giving up on a contended add
pub const DEFAULT_MAX_CAS_ATTEMPTS: u32 = 100;

/// Default pause between two CAS rounds (5ms)
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 5;

/// Counter behaviour
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterConfig {
    /// Key the counter is stored under
    pub key: String,
    /// Read/CAS rounds attempted per add
    pub max_cas_attempts: u32,
    /// Pause after a conflicting CAS
    pub retry_backoff: Duration,
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self {
            key: DEFAULT_COUNTER_KEY.to_string(),
            max_cas_attempts: DEFAULT_MAX_CAS_ATTEMPTS,
            retry_backoff: Duration::from_millis(DEFAULT_RETRY_BACKOFF_MS),
        }
    }
}

/// Fields of an `add` body
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddPayload {
    /// Non-negative increment
    pub delta: i64,
}

/// Fields of a counter `read_ok` body
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterValue {
    /// Current counter value
    pub value: i64,
}

/// Node serving `add` and `read` for a counter kept in a [`KvStore`]
pub struct CounterNode {
    kv: Arc<dyn KvStore>,
    config: CounterConfig,
}

impl CounterNode {
    /// Create a counter node over `kv`
    pub fn new(kv: Arc<dyn KvStore>, config: CounterConfig) -> Self {
        Self { kv, config }
    }

    /// Current value; a counter that was never written reads as 0
    pub async fn read(&self) -> KvResult<i64> {
        match self.kv.read(&self.config.key).await {
            Ok(value) => Ok(value),
            Err(KvError::KeyDoesNotExist { .. }) => Ok(0),
            Err(e) => Err(e),
        }
    }

    /// Add `delta` with a read-then-CAS loop and return the value written
    ///
    /// A delta that would push the counter past `i64::MAX` is refused with
    /// [`KvError::Overflow`] and nothing is written.
    ///
    /// Conflicting writers cause a retry. Transport failures are returned
    /// as-is: a timed-out CAS may already have been applied, so retrying it
    /// could count the delta twice.
    pub async fn add(&self, delta: i64) -> KvResult<i64> {
        let key = &self.config.key;

        for attempt in 1..=self.config.max_cas_attempts {
            let current = self.read().await?;
            let Some(next) = current.checked_add(delta) else {
                return Err(KvError::Overflow {
                    key: key.clone(),
                    current,
                    delta,
                });
            };

            match self.kv.compare_and_swap(key, current, next, true).await {
                Ok(()) => {
                    trace!(key = %key, delta, value = next, attempt, "counter add applied");
                    return Ok(next);
                }
                Err(KvError::PreconditionFailed { .. }) => {
                    debug!(key = %key, attempt, "counter CAS conflict, retrying");
                    tokio::time::sleep(self.config.retry_backoff).await;
                }
                Err(e) => return Err(e),
            }
        }

        Err(KvError::Contention {
            key: key.clone(),
            attempts: self.config.max_cas_attempts,
        })
    }
}

#[async_trait]
impl MessageHandler for CounterNode {
    fn message_types(&self) -> &'static [&'static str] {
        &[ADD, READ]
    }

    async fn handle(&self, message: &Message) -> TransportResult<Option<Body>> {
        let reply = match message.kind() {
            ADD => {
                let req: AddPayload = message.body.decode()?;
                if req.delta < 0 {
                    return Err(TransportError::Malformed {
                        reason: format!("negative delta {} on a grow-only counter", req.delta),
                    });
                }
                self.add(req.delta).await?;
                Body::new(ADD_OK)
            }
            READ => {
                let value = self.read().await?;
                Body::with_payload(READ_OK, &CounterValue { value })?
            }
            other => return Err(TransportError::Unsupported(other.to_string())),
        };
        Ok(Some(reply))
    }
}
