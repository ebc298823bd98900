#![warn(missing_docs)]
#![deny(clippy::panic)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

//! Reliable gossip broadcast for gossipcast
//!
//! Every value broadcast to any node eventually reaches every node of a
//! connected topology, despite dropped messages and temporary partitions.
//!
//! - [`DeliveredSet`]: values this node has seen, with atomic test-and-insert
//! - [`NeighborQueue`]: values a neighbor has not acknowledged yet
//! - [`Neighbor`]: one neighbor plus the sender loop retransmitting its queue
//! - [`BroadcastNode`]: the `broadcast`/`read`/`topology` handlers
//!
//! A value is removed from a neighbor's queue only after that neighbor
//! answers a gossip batch containing it with `broadcast_ok`.

mod config;
mod delivered;
mod messages;
mod neighbor;
mod node;
mod queue;
mod stats;

#[cfg(test)]
mod testing;

pub use config::{
    GossipConfig, DEFAULT_IDLE_BACKOFF_MS, DEFAULT_RETRY_INTERVAL_MS, DEFAULT_RPC_TIMEOUT_MS,
    DEFAULT_SHUTDOWN_TIMEOUT_SECS,
};
pub use delivered::DeliveredSet;
pub use messages::{
    BroadcastPayload, ReadOkPayload, TopologyPayload, BROADCAST, BROADCAST_OK, READ, READ_OK,
    TOPOLOGY, TOPOLOGY_OK,
};
pub use neighbor::Neighbor;
pub use node::BroadcastNode;
pub use queue::NeighborQueue;
pub use stats::{GossipStats, GossipStatsSnapshot};
