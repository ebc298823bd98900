#![warn(missing_docs)]

//! Core types for gossipcast
//!
//! This crate provides the fundamental types shared by every gossipcast crate:
//! - `NodeId`: string identifier of a node or client (`n1`, `c3`, `seq-kv`)
//! - `Value`: the opaque integer token disseminated by broadcast
//! - `Topology`: the static adjacency mapping installed on every node

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Value carried by a broadcast.
///
/// Values are never mutated, only inserted into sets.
pub type Value = i64;

/// Identifier of a node, a client or a service in the cluster
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Create a new NodeId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl AsRef<str> for NodeId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Broadcast topology: node identity -> list of neighbor identities
///
/// Serializes as the plain JSON object carried by `topology` messages,
/// e.g. `{"n1": ["n2", "n3"], "n2": ["n1"]}`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topology(HashMap<NodeId, Vec<NodeId>>);

impl Topology {
    /// Create an empty topology
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the neighbor list of a node, replacing any previous entry
    pub fn insert(&mut self, node: NodeId, neighbors: Vec<NodeId>) {
        self.0.insert(node, neighbors);
    }

    /// Add an undirected edge between two nodes
    ///
    /// Self-loops and duplicate edges are ignored.
    pub fn connect(&mut self, a: &NodeId, b: &NodeId) {
        if a == b {
            return;
        }
        let a_list = self.0.entry(a.clone()).or_default();
        if !a_list.contains(b) {
            a_list.push(b.clone());
        }
        let b_list = self.0.entry(b.clone()).or_default();
        if !b_list.contains(a) {
            b_list.push(a.clone());
        }
    }

    /// Neighbors assigned to `node`
    ///
    /// The result excludes `node` itself and contains each neighbor once,
    /// in the order the topology lists them. Unknown nodes have no neighbors.
    pub fn neighbors_of(&self, node: &NodeId) -> Vec<NodeId> {
        let mut seen = BTreeSet::new();
        self.0
            .get(node)
            .map(|list| {
                list.iter()
                    .filter(|n| *n != node && seen.insert((*n).clone()))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// All nodes that have an entry, sorted
    pub fn nodes(&self) -> Vec<NodeId> {
        let mut nodes: Vec<NodeId> = self.0.keys().cloned().collect();
        nodes.sort();
        nodes
    }

    /// Whether `node` has an entry in this topology
    pub fn contains(&self, node: &NodeId) -> bool {
        self.0.contains_key(node)
    }

    /// Number of nodes with an entry
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the topology has no entries
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether every node can reach every other node along topology edges
    ///
    /// Edges are followed in their listed direction only. An empty topology
    /// is trivially connected.
    pub fn is_connected(&self) -> bool {
        let nodes = self.nodes();
        let Some(start) = nodes.first() else {
            return true;
        };

        let mut visited = BTreeSet::new();
        let mut stack = vec![start.clone()];
        while let Some(node) = stack.pop() {
            if !visited.insert(node.clone()) {
                continue;
            }
            for next in self.neighbors_of(&node) {
                if !visited.contains(&next) {
                    stack.push(next);
                }
            }
        }

        nodes.iter().all(|n| visited.contains(n))
    }
}

impl FromIterator<(NodeId, Vec<NodeId>)> for Topology {
    fn from_iter<I: IntoIterator<Item = (NodeId, Vec<NodeId>)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(names: &[&str]) -> Vec<NodeId> {
        names.iter().map(|n| NodeId::from(*n)).collect()
    }

    #[test]
    fn test_node_id_display() {
        let node = NodeId::from("n1");
        assert_eq!(node.to_string(), "n1");
        assert_eq!(node.as_str(), "n1");
        assert_eq!(format!("{node:?}"), "NodeId(n1)");
    }

    #[test]
    fn test_neighbors_of_excludes_self_and_duplicates() {
        let mut topology = Topology::new();
        topology.insert("n1".into(), ids(&["n2", "n1", "n3", "n2"]));

        assert_eq!(topology.neighbors_of(&"n1".into()), ids(&["n2", "n3"]));
        assert!(topology.neighbors_of(&"n9".into()).is_empty());
    }

    #[test]
    fn test_connect_is_symmetric() {
        let mut topology = Topology::new();
        topology.connect(&"n1".into(), &"n2".into());
        topology.connect(&"n2".into(), &"n1".into());
        topology.connect(&"n3".into(), &"n3".into());

        assert_eq!(topology.neighbors_of(&"n1".into()), ids(&["n2"]));
        assert_eq!(topology.neighbors_of(&"n2".into()), ids(&["n1"]));
        assert!(!topology.contains(&"n3".into()));
    }

    #[test]
    fn test_topology_json_shape() {
        let json = r#"{"n1":["n2","n3"],"n2":["n1"],"n3":["n1"]}"#;
        let topology: Topology = serde_json::from_str(json).expect("decode");

        assert_eq!(topology.len(), 3);
        assert_eq!(topology.neighbors_of(&"n1".into()), ids(&["n2", "n3"]));

        let encoded = serde_json::to_value(&topology).expect("encode");
        assert_eq!(encoded["n2"], serde_json::json!(["n1"]));
    }

    #[test]
    fn test_is_connected() {
        let mut line = Topology::new();
        line.connect(&"n1".into(), &"n2".into());
        line.connect(&"n2".into(), &"n3".into());
        assert!(line.is_connected());

        line.insert("n4".into(), Vec::new());
        assert!(!line.is_connected());

        assert!(Topology::new().is_connected());
    }
}
