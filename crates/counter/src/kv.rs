//! Linearizable key-value service: trait, in-memory store and RPC client.

use async_trait::async_trait;
use gossipcast_transport::{
    Body, ErrorCode, Message, MessageHandler, Transport, TransportError, TransportResult,
};
use gossipcast_types::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::trace;

/// Node ID of the sequentially consistent key-value service
pub const SEQ_KV: &str = "seq-kv";

/// Default bound on one key-value RPC (1s)
pub const DEFAULT_KV_TIMEOUT_MS: u64 = 1_000;

const KV_READ: &str = "read";
const KV_READ_OK: &str = "read_ok";
const KV_WRITE: &str = "write";
const KV_WRITE_OK: &str = "write_ok";
const KV_CAS: &str = "cas";
const KV_CAS_OK: &str = "cas_ok";

/// Result type alias for key-value operations.
pub type KvResult<T> = Result<T, KvError>;

/// Errors returned by a [`KvStore`].
#[derive(Debug, Error)]
pub enum KvError {
    /// The key has never been written.
    #[error("Key does not exist: {key}")]
    KeyDoesNotExist {
        /// The key that was read.
        key: String,
    },

    /// The value under the key did not match the expected one.
    #[error("Precondition failed for {key}: {detail}")]
    PreconditionFailed {
        /// The key that was swapped.
        key: String,
        /// What the store reported.
        detail: String,
    },

    /// Compare-and-swap kept losing to concurrent writers.
    #[error("Gave up on {key} after {attempts} conflicting attempts")]
    Contention {
        /// The contended key.
        key: String,
        /// Attempts made before giving up.
        attempts: u32,
    },

    /// Applying the delta would exceed `i64::MAX`.
    #[error("Adding {delta} to {key} (currently {current}) overflows")]
    Overflow {
        /// The counter key.
        key: String,
        /// Value stored under the key.
        current: i64,
        /// The rejected increment.
        delta: i64,
    },

    /// The service could not be reached or failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl KvError {
    /// Error code to report when this error answers a request.
    pub fn code(&self) -> ErrorCode {
        match self {
            KvError::KeyDoesNotExist { .. } => ErrorCode::KeyDoesNotExist,
            KvError::PreconditionFailed { .. } => ErrorCode::PreconditionFailed,
            KvError::Contention { .. } => ErrorCode::TxnConflict,
            KvError::Overflow { .. } => ErrorCode::MalformedRequest,
            KvError::Transport(e) => e.code(),
        }
    }
}

impl From<KvError> for TransportError {
    fn from(err: KvError) -> Self {
        match err {
            KvError::Transport(e) => e,
            overflow @ KvError::Overflow { .. } => TransportError::Malformed {
                reason: overflow.to_string(),
            },
            other => TransportError::Rejected {
                code: other.code(),
                text: other.to_string(),
            },
        }
    }
}

/// A linearizable integer key-value store
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Current value of `key`
    async fn read(&self, key: &str) -> KvResult<i64>;

    /// Unconditionally set `key`
    async fn write(&self, key: &str, value: i64) -> KvResult<()>;

    /// Set `key` to `to` if it currently holds `from`
    ///
    /// A missing key is created with `to` when `create_if_not_exists` is set,
    /// and fails with [`KvError::KeyDoesNotExist`] otherwise.
    async fn compare_and_swap(
        &self,
        key: &str,
        from: i64,
        to: i64,
        create_if_not_exists: bool,
    ) -> KvResult<()>;
}

#[async_trait]
impl<T: KvStore + ?Sized> KvStore for Arc<T> {
    async fn read(&self, key: &str) -> KvResult<i64> {
        (**self).read(key).await
    }

    async fn write(&self, key: &str, value: i64) -> KvResult<()> {
        (**self).write(key, value).await
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        from: i64,
        to: i64,
        create_if_not_exists: bool,
    ) -> KvResult<()> {
        (**self)
            .compare_and_swap(key, from, to, create_if_not_exists)
            .await
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct KeyPayload {
    key: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ValuePayload {
    value: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct WritePayload {
    key: String,
    value: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct CasPayload {
    key: String,
    from: i64,
    to: i64,
    #[serde(default)]
    create_if_not_exists: bool,
}

/// In-memory store; a single lock makes every operation linearizable
///
/// Also answers `read`/`write`/`cas` messages, so it can be registered as
/// the [`SEQ_KV`] service node.
#[derive(Debug, Default)]
pub struct MemoryKv {
    entries: Mutex<HashMap<String, i64>>,
}

impl MemoryKv {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn read(&self, key: &str) -> KvResult<i64> {
        self.entries
            .lock()
            .await
            .get(key)
            .copied()
            .ok_or_else(|| KvError::KeyDoesNotExist {
                key: key.to_string(),
            })
    }

    async fn write(&self, key: &str, value: i64) -> KvResult<()> {
        self.entries.lock().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        from: i64,
        to: i64,
        create_if_not_exists: bool,
    ) -> KvResult<()> {
        let mut entries = self.entries.lock().await;
        match entries.get(key).copied() {
            Some(current) if current != from => Err(KvError::PreconditionFailed {
                key: key.to_string(),
                detail: format!("expected {from}, found {current}"),
            }),
            None if !create_if_not_exists => Err(KvError::KeyDoesNotExist {
                key: key.to_string(),
            }),
            _ => {
                entries.insert(key.to_string(), to);
                Ok(())
            }
        }
    }
}

#[async_trait]
impl MessageHandler for MemoryKv {
    fn message_types(&self) -> &'static [&'static str] {
        &[KV_READ, KV_WRITE, KV_CAS]
    }

    async fn handle(&self, message: &Message) -> TransportResult<Option<Body>> {
        trace!(src = %message.src, kind = message.kind(), "kv request");
        let reply = match message.kind() {
            KV_READ => {
                let req: KeyPayload = message.body.decode()?;
                let value = self.read(&req.key).await?;
                Body::with_payload(KV_READ_OK, &ValuePayload { value })?
            }
            KV_WRITE => {
                let req: WritePayload = message.body.decode()?;
                self.write(&req.key, req.value).await?;
                Body::new(KV_WRITE_OK)
            }
            KV_CAS => {
                let req: CasPayload = message.body.decode()?;
                self.compare_and_swap(&req.key, req.from, req.to, req.create_if_not_exists)
                    .await?;
                Body::new(KV_CAS_OK)
            }
            other => return Err(TransportError::Unsupported(other.to_string())),
        };
        Ok(Some(reply))
    }
}

/// [`KvStore`] backed by a key-value service node reached over a [`Transport`]
pub struct KvClient {
    transport: Arc<dyn Transport>,
    service: NodeId,
    timeout: Duration,
}

impl KvClient {
    /// Client for the service node `service`
    pub fn new(transport: Arc<dyn Transport>, service: NodeId) -> Self {
        Self {
            transport,
            service,
            timeout: Duration::from_millis(DEFAULT_KV_TIMEOUT_MS),
        }
    }

    /// Client for the [`SEQ_KV`] service
    pub fn seq_kv(transport: Arc<dyn Transport>) -> Self {
        Self::new(transport, NodeId::from(SEQ_KV))
    }

    /// Override the per-request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn call<T: Serialize>(&self, key: &str, kind: &str, payload: &T) -> KvResult<Body> {
        let body = Body::with_payload(kind, payload)?;
        self.transport
            .rpc(&self.service, body, self.timeout)
            .await
            .map_err(|e| map_rejection(key, e))
    }
}

/// Turn rejections carrying key-value codes into typed errors
fn map_rejection(key: &str, err: TransportError) -> KvError {
    match err {
        TransportError::Rejected {
            code: ErrorCode::KeyDoesNotExist,
            ..
        } => KvError::KeyDoesNotExist {
            key: key.to_string(),
        },
        TransportError::Rejected {
            code: ErrorCode::PreconditionFailed,
            text,
        } => KvError::PreconditionFailed {
            key: key.to_string(),
            detail: text,
        },
        other => KvError::Transport(other),
    }
}

#[async_trait]
impl KvStore for KvClient {
    async fn read(&self, key: &str) -> KvResult<i64> {
        let reply = self
            .call(key, KV_READ, &KeyPayload { key: key.to_string() })
            .await?;
        let payload: ValuePayload = reply.decode()?;
        Ok(payload.value)
    }

    async fn write(&self, key: &str, value: i64) -> KvResult<()> {
        let payload = WritePayload {
            key: key.to_string(),
            value,
        };
        self.call(key, KV_WRITE, &payload).await?;
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        from: i64,
        to: i64,
        create_if_not_exists: bool,
    ) -> KvResult<()> {
        let payload = CasPayload {
            key: key.to_string(),
            from,
            to,
            create_if_not_exists,
        };
        self.call(key, KV_CAS, &payload).await?;
        Ok(())
    }
}
