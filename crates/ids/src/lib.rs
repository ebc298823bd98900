#![warn(missing_docs)]
#![deny(clippy::panic)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

//! Unique identifier generation for gossipcast
//!
//! Every node answers `generate` with an ID no other node (and no other
//! request to the same node) will ever produce, without coordination.
//! IDs have the form `{node_id}-{sequence}`: node IDs are unique in the
//! cluster and the sequence is a per-node atomic counter.

use async_trait::async_trait;
use gossipcast_transport::{Body, Message, MessageHandler, TransportError, TransportResult};
use gossipcast_types::NodeId;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

/// Generate request
pub const GENERATE: &str = "generate";
/// Generate response
pub const GENERATE_OK: &str = "generate_ok";

/// Fields of a `generate_ok` body
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedId {
    /// The new identifier
    pub id: String,
}

/// Per-node ID source
#[derive(Debug)]
pub struct IdGenerator {
    node_id: NodeId,
    next: AtomicU64,
}

impl IdGenerator {
    /// Generator for `node_id`, starting at sequence 0
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            next: AtomicU64::new(0),
        }
    }

    /// Next unique identifier
    pub fn next_id(&self) -> String {
        let sequence = self.next.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}", self.node_id, sequence)
    }

    /// Number of IDs handed out so far
    pub fn issued(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}

/// Node serving `generate`
#[derive(Debug)]
pub struct UniqueIdNode {
    generator: IdGenerator,
}

impl UniqueIdNode {
    /// Create a node generating IDs for `node_id`
    pub fn new(node_id: NodeId) -> Self {
        Self {
            generator: IdGenerator::new(node_id),
        }
    }

    /// Generate one ID
    pub fn generate(&self) -> String {
        self.generator.next_id()
    }

    /// Number of IDs generated so far
    pub fn issued(&self) -> u64 {
        self.generator.issued()
    }
}

#[async_trait]
impl MessageHandler for UniqueIdNode {
    fn message_types(&self) -> &'static [&'static str] {
        &[GENERATE]
    }

    async fn handle(&self, message: &Message) -> TransportResult<Option<Body>> {
        if message.kind() != GENERATE {
            return Err(TransportError::Unsupported(message.kind().to_string()));
        }

        let id = self.generate();
        trace!(src = %message.src, id = %id, "generated id");
        Body::with_payload(GENERATE_OK, &GeneratedId { id }).map(Some)
    }
}
