#![warn(missing_docs)]
#![deny(clippy::panic)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

//! In-process network simulator for gossipcast
//!
//! Runs whole clusters inside one Tokio runtime over a network that can
//! delay, drop and partition messages:
//! - Configurable latency, jitter and loss per link
//! - Partitions between groups of nodes, and healing
//! - Seeded randomness so loss patterns are reproducible
//!
//! # Architecture
//!
//! [`SimNetwork`] owns a [`Dispatcher`](gossipcast_transport::Dispatcher) per
//! node and a table of outstanding RPCs. Every message travels on its own
//! task that sleeps for the link latency before delivery. Requests are
//! dispatched to the destination's handlers; replies complete the waiting
//! RPC. Client endpoints (IDs starting with `c`) and service nodes are
//! attached over reliable links.
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use gossipcast_simulator::{BroadcastCluster, LinkConfig, TopologyKind};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let cluster = BroadcastCluster::builder()
//!     .nodes(5)
//!     .topology(TopologyKind::Ring)
//!     .link(LinkConfig::lossy(0.25))
//!     .seed(7)
//!     .build()
//!     .await?;
//!
//! cluster.broadcast(&"n0".into(), 42).await?;
//! cluster.await_convergence(&[42], Duration::from_secs(5)).await?;
//! cluster.shutdown().await?;
//! # Ok(())
//! # }
//! ```

mod cluster;
mod network;
pub mod simulated_transport;
mod topology;
mod workload;

#[cfg(test)]
mod scenarios;

pub use cluster::{BroadcastCluster, BroadcastClusterBuilder};
pub use network::SimNetwork;
pub use simulated_transport::SimTransport;
pub use topology::TopologyKind;
pub use workload::{
    run_counter_workload, run_ids_workload, CounterReport, CounterWorkload, IdsReport,
    IdsWorkload,
};

use gossipcast_transport::TransportError;
use gossipcast_types::NodeId;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Network link configuration between nodes
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Base latency in milliseconds
    pub latency_ms: u64,
    /// Jitter variation in milliseconds, added uniformly on top of the latency
    pub jitter_ms: u64,
    /// Packet loss rate (0.0 to 1.0)
    pub packet_loss_rate: f64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            latency_ms: 5,         // 5ms latency
            jitter_ms: 0,          // No jitter
            packet_loss_rate: 0.0, // No packet loss
        }
    }
}

impl LinkConfig {
    /// A link that never drops messages
    pub fn reliable() -> Self {
        Self::default()
    }

    /// A default-latency link dropping each message with probability `rate`
    pub fn lossy(rate: f64) -> Self {
        Self {
            packet_loss_rate: rate,
            ..Self::default()
        }
    }

    /// Override the latency
    pub fn with_latency(mut self, latency_ms: u64, jitter_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self.jitter_ms = jitter_ms;
        self
    }

    /// Check that the loss rate is a probability
    pub fn validate(&self) -> SimulatorResult<()> {
        if !(0.0..=1.0).contains(&self.packet_loss_rate) {
            return Err(SimulatorError::InvalidLinkConfig(format!(
                "packet loss rate {} is outside [0, 1]",
                self.packet_loss_rate
            )));
        }
        Ok(())
    }

    /// This link without loss
    pub(crate) fn without_loss(&self) -> Self {
        Self {
            packet_loss_rate: 0.0,
            ..self.clone()
        }
    }
}

/// Counters of the simulated network
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetworkStats {
    /// Messages handed to the network
    pub sent: u64,
    /// Messages lost to link loss, partitions or unknown destinations
    pub dropped: u64,
    /// Messages that reached a handler or a waiting RPC
    pub delivered: u64,
}

/// Result type alias for simulator operations.
pub type SimulatorResult<T> = Result<T, SimulatorError>;

/// Errors that can occur during network simulation
#[derive(thiserror::Error, Debug)]
pub enum SimulatorError {
    /// The specified node was not found in the simulation
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),
    /// A node with this ID is already registered
    #[error("Node already registered: {0}")]
    DuplicateNode(NodeId),
    /// The topology configuration is invalid
    #[error("Invalid topology configuration: {0}")]
    InvalidTopology(String),
    /// The link configuration is invalid
    #[error("Invalid link configuration: {0}")]
    InvalidLinkConfig(String),
    /// Nodes did not converge before the deadline
    #[error("No convergence after {after:?}; lagging nodes: {lagging:?}")]
    ConvergenceTimeout {
        /// Nodes still missing values at the deadline
        lagging: Vec<NodeId>,
        /// How long convergence was awaited
        after: Duration,
    },
    /// A node answered a request with something unexpected
    #[error("Unexpected reply from {node}: {kind}")]
    UnexpectedReply {
        /// The answering node
        node: NodeId,
        /// Type of the reply
        kind: String,
    },
    /// Underlying transport layer error
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    /// A workload task panicked or was cancelled
    #[error("Workload task failed: {0}")]
    Task(String),
    /// A node failed to shut down cleanly
    #[error("Shutdown failed: {0}")]
    Shutdown(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_config_validation() {
        assert!(LinkConfig::default().validate().is_ok());
        assert!(LinkConfig::lossy(1.0).validate().is_ok());
        assert!(LinkConfig::lossy(1.5).validate().is_err());
        assert!(LinkConfig::lossy(-0.1).validate().is_err());
    }

    #[test]
    fn test_link_config_builders() {
        let link = LinkConfig::lossy(0.3).with_latency(20, 5);
        assert_eq!(link.latency_ms, 20);
        assert_eq!(link.jitter_ms, 5);
        assert_eq!(link.without_loss().packet_loss_rate, 0.0);
        assert_eq!(link.without_loss().latency_ms, 20);
    }
}
