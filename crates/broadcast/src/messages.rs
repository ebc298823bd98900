//! Wire payloads of the broadcast workload

use gossipcast_types::{Topology, Value};
use serde::{Deserialize, Serialize};

/// Broadcast request, from a client or a gossiping peer
pub const BROADCAST: &str = "broadcast";
/// Broadcast acknowledgment
pub const BROADCAST_OK: &str = "broadcast_ok";
/// Read request
pub const READ: &str = "read";
/// Read response
pub const READ_OK: &str = "read_ok";
/// Topology installation
pub const TOPOLOGY: &str = "topology";
/// Topology acknowledgment
pub const TOPOLOGY_OK: &str = "topology_ok";

/// Fields of a `broadcast` body
///
/// Clients send one value as `{"message": v}`; peers gossip batches as
/// `{"messages": [v, ...]}`. Both shapes are accepted, and a body carrying
/// both contributes the values of each.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastPayload {
    /// A single value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Value>,
    /// A batch of values
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<Value>>,
}

impl BroadcastPayload {
    /// Payload carrying one value
    pub fn single(value: Value) -> Self {
        Self {
            message: Some(value),
            messages: None,
        }
    }

    /// Payload carrying a batch
    pub fn batch(values: Vec<Value>) -> Self {
        Self {
            message: None,
            messages: Some(values),
        }
    }

    /// Whether neither shape is present
    pub fn is_missing(&self) -> bool {
        self.message.is_none() && self.messages.is_none()
    }

    /// All carried values, single value first
    pub fn into_values(self) -> Vec<Value> {
        let mut values: Vec<Value> = self.message.into_iter().collect();
        values.extend(self.messages.unwrap_or_default());
        values
    }
}

/// Fields of a `read_ok` body
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadOkPayload {
    /// Every value delivered at the responding node
    pub messages: Vec<Value>,
}

/// Fields of a `topology` body
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyPayload {
    /// Node -> neighbors mapping for the whole cluster
    pub topology: Topology,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use gossipcast_types::NodeId;
    use serde_json::json;

    #[test]
    fn test_accepts_single_and_batched_shapes() {
        let single: BroadcastPayload = serde_json::from_value(json!({"message": 5})).unwrap();
        assert_eq!(single.into_values(), vec![5]);

        let batch: BroadcastPayload =
            serde_json::from_value(json!({"messages": [1, 2, 3]})).unwrap();
        assert_eq!(batch.into_values(), vec![1, 2, 3]);

        let both: BroadcastPayload =
            serde_json::from_value(json!({"message": 9, "messages": [1]})).unwrap();
        assert_eq!(both.into_values(), vec![9, 1]);
    }

    #[test]
    fn test_missing_values_detected() {
        let empty: BroadcastPayload = serde_json::from_value(json!({})).unwrap();
        assert!(empty.is_missing());

        let empty_batch: BroadcastPayload =
            serde_json::from_value(json!({"messages": []})).unwrap();
        assert!(!empty_batch.is_missing());
        assert!(empty_batch.into_values().is_empty());
    }

    #[test]
    fn test_gossip_batch_encoding() {
        let encoded = serde_json::to_value(BroadcastPayload::batch(vec![5])).unwrap();
        assert_eq!(encoded, json!({"messages": [5]}));
    }

    #[test]
    fn test_topology_payload_decoding() {
        let payload: TopologyPayload =
            serde_json::from_value(json!({"topology": {"n1": ["n2"], "n2": ["n1"]}})).unwrap();
        assert_eq!(
            payload.topology.neighbors_of(&NodeId::from("n1")),
            vec![NodeId::from("n2")]
        );
    }
}
