//! Cluster harness for the broadcast workload.

use gossipcast_broadcast::{
    BroadcastNode, BroadcastPayload, GossipConfig, GossipStatsSnapshot, ReadOkPayload,
    TopologyPayload, BROADCAST, BROADCAST_OK, READ, READ_OK, TOPOLOGY, TOPOLOGY_OK,
};
use gossipcast_transport::{Body, Transport};
use gossipcast_types::{NodeId, Topology, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::network::{unknown, SimNetwork, DEFAULT_SEED};
use crate::simulated_transport::SimTransport;
use crate::{LinkConfig, NetworkStats, SimulatorError, SimulatorResult, TopologyKind};

/// Client ID used by the harness
const HARNESS_CLIENT: &str = "c0";

/// Bound on each client request issued by the harness
const CLIENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Interval between convergence checks
const CONVERGENCE_POLL: Duration = Duration::from_millis(10);

/// Builder for [`BroadcastCluster`]
#[derive(Debug, Clone)]
pub struct BroadcastClusterBuilder {
    nodes: usize,
    topology: TopologyKind,
    link: LinkConfig,
    seed: u64,
    gossip: GossipConfig,
}

impl Default for BroadcastClusterBuilder {
    fn default() -> Self {
        Self {
            nodes: 5,
            topology: TopologyKind::default(),
            link: LinkConfig::default(),
            seed: DEFAULT_SEED,
            gossip: GossipConfig::default(),
        }
    }
}

impl BroadcastClusterBuilder {
    /// Set the number of nodes, named `n0`, `n1`, ...
    pub fn nodes(mut self, count: usize) -> Self {
        self.nodes = count;
        self
    }

    /// Set the network topology
    pub fn topology(mut self, topology: TopologyKind) -> Self {
        self.topology = topology;
        self
    }

    /// Set the configuration of node-to-node links
    pub fn link(mut self, link: LinkConfig) -> Self {
        self.link = link;
        self
    }

    /// Set deterministic seed for reproducible runs
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set the sender loop timing of every node
    pub fn gossip(mut self, gossip: GossipConfig) -> Self {
        self.gossip = gossip;
        self
    }

    /// Start the nodes and install the topology through client requests
    pub async fn build(self) -> SimulatorResult<BroadcastCluster> {
        if self.nodes == 0 {
            return Err(SimulatorError::InvalidTopology(
                "a cluster needs at least one node".to_string(),
            ));
        }

        let network = SimNetwork::new(self.seed, self.link.clone())?;
        let ids: Vec<NodeId> = (0..self.nodes)
            .map(|i| NodeId::new(format!("n{i}")))
            .collect();
        let topology = self.topology.build(&ids)?;

        let mut nodes = BTreeMap::new();
        for id in &ids {
            let node = Arc::new(BroadcastNode::new(
                network.transport(id.clone()),
                self.gossip.clone(),
            ));
            network.register(id.clone(), vec![node.clone()]).await?;
            nodes.insert(id.clone(), node);
        }

        let client = network.client(NodeId::from(HARNESS_CLIENT)).await;
        let cluster = BroadcastCluster {
            network,
            nodes,
            client,
            topology,
        };

        for id in &ids {
            cluster.install_topology(id).await?;
        }

        info!(
            nodes = self.nodes,
            topology = %self.topology,
            loss = self.link.packet_loss_rate,
            seed = self.seed,
            "broadcast cluster started"
        );
        Ok(cluster)
    }
}

/// A running set of [`BroadcastNode`]s on a [`SimNetwork`]
///
/// Requests are issued by a client endpoint over reliable links, the way an
/// external test driver would talk to the cluster.
pub struct BroadcastCluster {
    network: Arc<SimNetwork>,
    nodes: BTreeMap<NodeId, Arc<BroadcastNode>>,
    client: Arc<SimTransport>,
    topology: Topology,
}

impl BroadcastCluster {
    /// Start configuring a cluster
    pub fn builder() -> BroadcastClusterBuilder {
        BroadcastClusterBuilder::default()
    }

    /// The network the nodes run on
    pub fn network(&self) -> &Arc<SimNetwork> {
        &self.network
    }

    /// The installed topology
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Node IDs, sorted
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.keys().cloned().collect()
    }

    /// Direct handle to a node, for inspection
    pub fn node(&self, id: &NodeId) -> Option<&Arc<BroadcastNode>> {
        self.nodes.get(id)
    }

    async fn request(&self, node: &NodeId, body: Body, expected: &str) -> SimulatorResult<Body> {
        if !self.nodes.contains_key(node) {
            return Err(unknown(node));
        }

        let reply = self.client.rpc(node, body, CLIENT_TIMEOUT).await?;
        if reply.kind != expected {
            return Err(SimulatorError::UnexpectedReply {
                node: node.clone(),
                kind: reply.kind,
            });
        }
        Ok(reply)
    }

    async fn install_topology(&self, node: &NodeId) -> SimulatorResult<()> {
        let payload = TopologyPayload {
            topology: self.topology.clone(),
        };
        let body = Body::with_payload(TOPOLOGY, &payload)?;
        self.request(node, body, TOPOLOGY_OK).await?;
        Ok(())
    }

    /// Broadcast `value` through `node`, waiting for its acknowledgment
    pub async fn broadcast(&self, node: &NodeId, value: Value) -> SimulatorResult<()> {
        let body = Body::with_payload(BROADCAST, &BroadcastPayload::single(value))?;
        self.request(node, body, BROADCAST_OK).await?;
        debug!(node = %node, value, "client broadcast acknowledged");
        Ok(())
    }

    /// Values delivered at `node`, as reported by its `read` handler
    pub async fn read(&self, node: &NodeId) -> SimulatorResult<Vec<Value>> {
        let reply = self.request(node, Body::new(READ), READ_OK).await?;
        let payload: ReadOkPayload = reply.decode()?;
        Ok(payload.messages)
    }

    /// Nodes whose delivered set is missing any of `expected`
    pub async fn lagging(&self, expected: &[Value]) -> Vec<NodeId> {
        let mut lagging = Vec::new();
        for (id, node) in &self.nodes {
            let delivered: HashSet<Value> = node.read().await.into_iter().collect();
            if !expected.iter().all(|v| delivered.contains(v)) {
                lagging.push(id.clone());
            }
        }
        lagging
    }

    /// Wait until every node has delivered every value in `expected`
    ///
    /// Returns how long convergence took.
    pub async fn await_convergence(
        &self,
        expected: &[Value],
        deadline: Duration,
    ) -> SimulatorResult<Duration> {
        let start = Instant::now();
        loop {
            let lagging = self.lagging(expected).await;
            if lagging.is_empty() {
                let elapsed = start.elapsed();
                info!(values = expected.len(), elapsed_ms = elapsed.as_millis() as u64, "cluster converged");
                return Ok(elapsed);
            }
            if start.elapsed() >= deadline {
                warn!(lagging = ?lagging, "cluster did not converge");
                return Err(SimulatorError::ConvergenceTimeout {
                    lagging,
                    after: deadline,
                });
            }
            tokio::time::sleep(CONVERGENCE_POLL).await;
        }
    }

    /// Wait until no node has unacknowledged values
    pub async fn await_quiescence(&self, deadline: Duration) -> SimulatorResult<Duration> {
        let start = Instant::now();
        loop {
            let mut pending = 0;
            for node in self.nodes.values() {
                pending += node.pending_total().await;
            }
            if pending == 0 {
                return Ok(start.elapsed());
            }
            if start.elapsed() >= deadline {
                return Err(SimulatorError::ConvergenceTimeout {
                    lagging: Vec::new(),
                    after: deadline,
                });
            }
            tokio::time::sleep(CONVERGENCE_POLL).await;
        }
    }

    /// Cut every link between `group_a` and `group_b`
    pub async fn partition(&self, group_a: &[NodeId], group_b: &[NodeId]) {
        self.network.partition(group_a, group_b).await;
    }

    /// Restore every cut link
    pub async fn heal(&self) {
        self.network.heal().await;
    }

    /// Network counters
    pub fn network_stats(&self) -> NetworkStats {
        self.network.stats()
    }

    /// Gossip counters summed over all nodes
    pub fn gossip_stats(&self) -> GossipStatsSnapshot {
        self.nodes
            .values()
            .map(|node| node.stats())
            .fold(GossipStatsSnapshot::default(), |acc, s| acc + s)
    }

    /// Stop every sender loop and close the network
    ///
    /// Every node is stopped even if an earlier one fails.
    pub async fn shutdown(&self) -> SimulatorResult<()> {
        let mut failures = Vec::new();
        for (id, node) in &self.nodes {
            if let Err(e) = node.shutdown().await {
                failures.push(format!("{id}: {e:#}"));
            }
        }
        self.network.close().await;

        if failures.is_empty() {
            info!("broadcast cluster shut down");
            Ok(())
        } else {
            Err(SimulatorError::Shutdown(failures.join("; ")))
        }
    }
}
