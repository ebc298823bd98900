//! Broadcast node: delivered set, topology and message handlers.

use anyhow::Result;
use async_trait::async_trait;
use gossipcast_transport::{Body, Message, MessageHandler, Transport, TransportError, TransportResult};
use gossipcast_types::{NodeId, Topology, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, trace, warn};

use crate::config::GossipConfig;
use crate::delivered::DeliveredSet;
use crate::messages::{
    BroadcastPayload, ReadOkPayload, TopologyPayload, BROADCAST, BROADCAST_OK, READ, READ_OK,
    TOPOLOGY, TOPOLOGY_OK,
};
use crate::neighbor::Neighbor;
use crate::stats::{GossipStats, GossipStatsSnapshot};

/// Message types answered by [`BroadcastNode`]
const HANDLED_TYPES: &[&str] = &[BROADCAST, READ, TOPOLOGY];

/// A node taking part in the broadcast workload
///
/// Values accepted by `broadcast` are recorded once in the delivered set and
/// queued for every neighbor except the sender. A sender loop per neighbor
/// retransmits queued values until that neighbor acknowledges them.
pub struct BroadcastNode {
    node_id: NodeId,
    transport: Arc<dyn Transport>,
    config: GossipConfig,
    delivered: DeliveredSet,
    neighbors: RwLock<HashMap<NodeId, Arc<Neighbor>>>,
    stats: Arc<GossipStats>,
}

impl BroadcastNode {
    /// Create a node with no neighbors
    ///
    /// The node's identity is taken from the transport.
    pub fn new(transport: Arc<dyn Transport>, config: GossipConfig) -> Self {
        Self {
            node_id: transport.node_id().clone(),
            transport,
            config,
            delivered: DeliveredSet::new(),
            neighbors: RwLock::new(HashMap::new()),
            stats: Arc::new(GossipStats::default()),
        }
    }

    /// This node's identity
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Record `values` received from `from` and fan out the new ones
    ///
    /// Returns the values delivered for the first time. Those are queued for
    /// every neighbor other than `from`; already-delivered values are ignored.
    pub async fn accept(&self, from: &NodeId, values: &[Value]) -> Vec<Value> {
        let fresh = self.delivered.insert_all(values).await;
        self.stats
            .record_accepted(fresh.len(), values.len().saturating_sub(fresh.len()));

        if fresh.is_empty() {
            return fresh;
        }

        let targets: Vec<Arc<Neighbor>> = self
            .neighbors
            .read()
            .await
            .values()
            .filter(|n| n.id() != from)
            .cloned()
            .collect();

        for neighbor in &targets {
            for value in &fresh {
                neighbor.enqueue(*value).await;
            }
        }

        trace!(
            node = %self.node_id,
            from = %from,
            fresh = fresh.len(),
            fanout = targets.len(),
            "accepted broadcast values"
        );
        fresh
    }

    /// Every value delivered at this node, sorted
    pub async fn read(&self) -> Vec<Value> {
        self.delivered.snapshot().await
    }

    /// Create neighbors for this node's entry in `topology`
    ///
    /// Neighbors that already exist keep their queues and loops; a repeated
    /// installation only adds the missing ones. New queues start empty.
    /// Returns the neighbors added.
    pub async fn install_topology(&self, topology: &Topology) -> Vec<NodeId> {
        let wanted = topology.neighbors_of(&self.node_id);
        if !topology.contains(&self.node_id) {
            warn!(node = %self.node_id, "topology has no entry for this node");
        }

        let mut neighbors = self.neighbors.write().await;
        let mut added = Vec::new();
        for peer in wanted {
            if neighbors.contains_key(&peer) {
                continue;
            }
            let neighbor = Neighbor::spawn(
                peer.clone(),
                self.transport.clone(),
                self.config.clone(),
                self.stats.clone(),
            );
            neighbors.insert(peer.clone(), Arc::new(neighbor));
            added.push(peer);
        }

        info!(
            node = %self.node_id,
            added = ?added,
            total = neighbors.len(),
            "topology installed"
        );
        added
    }

    /// Identities of the current neighbors, sorted
    pub async fn neighbor_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.neighbors.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Values `peer` has not acknowledged yet, or `None` if it is not a neighbor
    pub async fn pending_for(&self, peer: &NodeId) -> Option<Vec<Value>> {
        let neighbor = self.neighbors.read().await.get(peer).cloned()?;
        Some(neighbor.pending().await)
    }

    /// Total number of unacknowledged values across all neighbors
    pub async fn pending_total(&self) -> usize {
        let neighbors: Vec<Arc<Neighbor>> =
            self.neighbors.read().await.values().cloned().collect();
        let mut total = 0;
        for neighbor in neighbors {
            total += neighbor.queue().len().await;
        }
        total
    }

    /// Gossip counters for this node
    pub fn stats(&self) -> GossipStatsSnapshot {
        self.stats.snapshot()
    }

    /// Stop every sender loop
    ///
    /// Neighbors and their queues are kept so state can still be inspected.
    /// Every loop is asked to stop even if an earlier one fails; the first
    /// failure is returned.
    pub async fn shutdown(&self) -> Result<()> {
        let neighbors: Vec<Arc<Neighbor>> =
            self.neighbors.read().await.values().cloned().collect();

        let mut first_error = None;
        for neighbor in neighbors {
            if let Err(e) = neighbor.stop().await {
                warn!(node = %self.node_id, peer = %neighbor.id(), error = %e, "failed to stop sender");
                first_error.get_or_insert(e);
            }
        }

        debug!(node = %self.node_id, "broadcast node shut down");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn handle_broadcast(&self, message: &Message) -> TransportResult<Body> {
        let payload: BroadcastPayload = message.body.decode()?;
        if payload.is_missing() {
            return Err(TransportError::Malformed {
                reason: "broadcast carries neither `message` nor `messages`".to_string(),
            });
        }

        self.accept(&message.src, &payload.into_values()).await;
        Ok(Body::new(BROADCAST_OK))
    }

    async fn handle_read(&self) -> TransportResult<Body> {
        let payload = ReadOkPayload {
            messages: self.read().await,
        };
        Body::with_payload(READ_OK, &payload)
    }

    async fn handle_topology(&self, message: &Message) -> TransportResult<Body> {
        let payload: TopologyPayload = message.body.decode()?;
        self.install_topology(&payload.topology).await;
        Ok(Body::new(TOPOLOGY_OK))
    }
}

#[async_trait]
impl MessageHandler for BroadcastNode {
    fn message_types(&self) -> &'static [&'static str] {
        HANDLED_TYPES
    }

    async fn handle(&self, message: &Message) -> TransportResult<Option<Body>> {
        let reply = match message.kind() {
            BROADCAST => self.handle_broadcast(message).await?,
            READ => self.handle_read().await?,
            TOPOLOGY => self.handle_topology(message).await?,
            other => return Err(TransportError::Unsupported(other.to_string())),
        };
        Ok(Some(reply))
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::testing::{eventually, MockTransport};
    use serde_json::json;
    use std::time::Duration;

    /// Sender loops that never wake up on their own, so queues stay observable
    fn parked_config() -> GossipConfig {
        GossipConfig::default()
            .with_idle_backoff(Duration::from_secs(3600))
            .with_retry_interval(Duration::from_secs(3600))
            .with_shutdown_timeout(Duration::from_secs(1))
    }

    fn fast_config() -> GossipConfig {
        GossipConfig::default()
            .with_idle_backoff(Duration::from_millis(2))
            .with_retry_interval(Duration::from_millis(5))
            .with_rpc_timeout(Duration::from_millis(50))
            .with_shutdown_timeout(Duration::from_secs(1))
    }

    fn triangle() -> Topology {
        serde_json::from_value(json!({
            "n1": ["n2", "n3"],
            "n2": ["n1", "n3"],
            "n3": ["n1", "n2"],
        }))
        .unwrap()
    }

    fn request(src: &str, kind: &str, fields: serde_json::Value) -> Message {
        let mut body = Body::with_payload(kind, &fields).unwrap();
        body.msg_id = Some(1);
        Message::new(NodeId::from(src), NodeId::from("n1"), body)
    }

    async fn node_with_triangle(config: GossipConfig) -> (Arc<MockTransport>, BroadcastNode) {
        let transport = Arc::new(MockTransport::new("n1"));
        let node = BroadcastNode::new(transport.clone(), config);
        node.install_topology(&triangle()).await;
        (transport, node)
    }

    #[tokio::test]
    async fn test_client_broadcast_is_acked_and_queued_for_all_neighbors() {
        let (_transport, node) = node_with_triangle(parked_config()).await;

        let reply = node
            .handle(&request("c1", BROADCAST, json!({"message": 5})))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.kind, BROADCAST_OK);

        assert_eq!(node.read().await, vec![5]);
        assert_eq!(node.pending_for(&NodeId::from("n2")).await, Some(vec![5]));
        assert_eq!(node.pending_for(&NodeId::from("n3")).await, Some(vec![5]));

        node.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_gossip_is_not_echoed_to_sender() {
        let (_transport, node) = node_with_triangle(parked_config()).await;

        node.handle(&request("n2", BROADCAST, json!({"messages": [7]})))
            .await
            .unwrap();

        assert_eq!(node.pending_for(&NodeId::from("n2")).await, Some(vec![]));
        assert_eq!(node.pending_for(&NodeId::from("n3")).await, Some(vec![7]));

        node.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_broadcast_is_acked_but_not_requeued() {
        let (_transport, node) = node_with_triangle(parked_config()).await;
        let n2 = NodeId::from("n2");

        node.handle(&request("c1", BROADCAST, json!({"message": 5})))
            .await
            .unwrap();

        // Pretend n2 acknowledged the value.
        let neighbor = node.neighbors.read().await.get(&n2).cloned().unwrap();
        neighbor.queue().remove(&[5]).await;

        let reply = node
            .handle(&request("c2", BROADCAST, json!({"message": 5})))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.kind, BROADCAST_OK);
        assert_eq!(node.pending_for(&n2).await, Some(vec![]));
        assert_eq!(node.read().await, vec![5]);

        let stats = node.stats();
        assert_eq!(stats.accepted, 1);
        assert_eq!(stats.duplicates, 1);

        node.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_read_returns_sorted_values() {
        let (_transport, node) = node_with_triangle(parked_config()).await;
        node.accept(&NodeId::from("c1"), &[3, 1, 2]).await;

        let reply = node
            .handle(&request("c1", READ, json!({})))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.kind, READ_OK);
        let payload: ReadOkPayload = reply.decode().unwrap();
        assert_eq!(payload.messages, vec![1, 2, 3]);

        node.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_broadcast_without_values_is_malformed() {
        let (_transport, node) = node_with_triangle(parked_config()).await;

        let err = node
            .handle(&request("c1", BROADCAST, json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Malformed { .. }));

        let err = node
            .handle(&request("c1", BROADCAST, json!({"message": "five"})))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Malformed { .. }));
        assert!(node.read().await.is_empty());

        node.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_topology_handler_installs_neighbors() {
        let transport = Arc::new(MockTransport::new("n1"));
        let node = BroadcastNode::new(transport, parked_config());

        let reply = node
            .handle(&request(
                "c1",
                TOPOLOGY,
                json!({"topology": {"n1": ["n2"], "n2": ["n1"]}}),
            ))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.kind, TOPOLOGY_OK);
        assert_eq!(node.neighbor_ids().await, vec![NodeId::from("n2")]);

        node.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_repeated_topology_only_adds_missing_neighbors() {
        let transport = Arc::new(MockTransport::new("n1"));
        let node = BroadcastNode::new(transport, parked_config());
        let line: Topology = serde_json::from_value(json!({"n1": ["n2"]})).unwrap();

        assert_eq!(node.install_topology(&line).await, vec![NodeId::from("n2")]);
        node.accept(&NodeId::from("c1"), &[4]).await;

        let added = node.install_topology(&triangle()).await;
        assert_eq!(added, vec![NodeId::from("n3")]);

        // Existing queue survives; the new one starts empty.
        assert_eq!(node.pending_for(&NodeId::from("n2")).await, Some(vec![4]));
        assert_eq!(node.pending_for(&NodeId::from("n3")).await, Some(vec![]));

        node.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_broadcast_before_topology_is_delivered_locally() {
        let transport = Arc::new(MockTransport::new("n1"));
        let node = BroadcastNode::new(transport, parked_config());

        node.handle(&request("c1", BROADCAST, json!({"message": 1})))
            .await
            .unwrap();
        node.install_topology(&triangle()).await;

        assert_eq!(node.read().await, vec![1]);
        assert_eq!(node.pending_total().await, 0);

        node.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_values_reach_neighbors_despite_failures() {
        let (transport, node) = node_with_triangle(fast_config()).await;
        transport.fail_next(3);

        node.accept(&NodeId::from("c1"), &[42]).await;

        assert!(eventually(Duration::from_secs(2), || async { node.pending_total().await == 0 }).await);
        assert!(transport.batches_to("n2").await.iter().any(|b| b.contains(&42)));
        assert!(transport.batches_to("n3").await.iter().any(|b| b.contains(&42)));
        assert_eq!(node.stats().rpcs_failed, 3);

        node.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_stops_gossip() {
        let (transport, node) = node_with_triangle(fast_config()).await;
        node.shutdown().await.unwrap();

        node.accept(&NodeId::from("c1"), &[9]).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(transport.rpc_count().await, 0);
        assert_eq!(node.pending_total().await, 2);
    }

    #[tokio::test]
    async fn test_unknown_type_is_unsupported() {
        let transport = Arc::new(MockTransport::new("n1"));
        let node = BroadcastNode::new(transport, parked_config());

        let err = node
            .handle(&request("c1", "frobnicate", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Unsupported(_)));
    }
}
