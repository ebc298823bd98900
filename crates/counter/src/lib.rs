#![warn(missing_docs)]
#![deny(clippy::panic)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

//! Grow-only counter for gossipcast
//!
//! Nodes keep no counter state of their own. Every `add` is applied to a
//! shared linearizable key-value service with a read-then-compare-and-swap
//! loop, and `read` returns what the service holds.
//!
//! - [`KvStore`]: read, write and compare-and-swap on integer keys
//! - [`MemoryKv`]: in-memory store that can also serve as the `seq-kv` node
//! - [`KvClient`]: [`KvStore`] over a [`gossipcast_transport::Transport`]
//! - [`CounterNode`]: the `add`/`read` handlers

mod kv;
mod node;

pub use kv::{KvClient, KvError, KvResult, KvStore, MemoryKv, DEFAULT_KV_TIMEOUT_MS, SEQ_KV};
pub use node::{
    AddPayload, CounterConfig, CounterNode, CounterValue, ADD, ADD_OK, DEFAULT_COUNTER_KEY,
    DEFAULT_MAX_CAS_ATTEMPTS, DEFAULT_RETRY_BACKOFF_MS, READ, READ_OK,
};
