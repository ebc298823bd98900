//! Topology generators.

use gossipcast_types::{NodeId, Topology};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{SimulatorError, SimulatorResult};

/// Shape of the gossip graph handed to a cluster
///
/// Nodes are taken in the order given to [`TopologyKind::build`]; the first
/// one is the hub of a star and the root of a tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TopologyKind {
    /// Fully connected mesh (every node connects to every other)
    Mesh,
    /// Ring topology (circular connections)
    Ring,
    /// Star topology (first node is the hub)
    Star,
    /// Tree topology (hierarchical connections)
    Tree {
        /// Number of children per parent node
        branching: usize,
    },
    /// Grid topology, row-major, connected to right and lower neighbors
    Grid {
        /// Nodes per row; 0 picks the smallest width making a square-ish grid
        width: usize,
    },
}

impl Default for TopologyKind {
    fn default() -> Self {
        Self::Grid { width: 0 }
    }
}

impl TopologyKind {
    /// Replace the branching factor of a tree
    pub fn with_branching(self, branching: usize) -> Self {
        match self {
            Self::Tree { .. } => Self::Tree { branching },
            other => other,
        }
    }

    /// Replace the width of a grid
    pub fn with_width(self, width: usize) -> Self {
        match self {
            Self::Grid { .. } => Self::Grid { width },
            other => other,
        }
    }

    /// Build the topology over `nodes`
    ///
    /// Every node gets an entry, even when it has no neighbors, and all edges
    /// are undirected.
    pub fn build(&self, nodes: &[NodeId]) -> SimulatorResult<Topology> {
        let mut topology: Topology = nodes.iter().map(|n| (n.clone(), Vec::new())).collect();
        let n = nodes.len();

        match self {
            Self::Mesh => {
                for (i, a) in nodes.iter().enumerate() {
                    for b in &nodes[i + 1..] {
                        topology.connect(a, b);
                    }
                }
            }
            Self::Ring => {
                for i in 0..n {
                    topology.connect(&nodes[i], &nodes[(i + 1) % n]);
                }
            }
            Self::Star => {
                if let Some((hub, spokes)) = nodes.split_first() {
                    for spoke in spokes {
                        topology.connect(hub, spoke);
                    }
                }
            }
            Self::Tree { branching } => {
                // Node i > 0 hangs below node (i - 1) / branching
                if *branching == 0 {
                    return Err(SimulatorError::InvalidTopology(
                        "tree branching factor must be at least 1".to_string(),
                    ));
                }
                for i in 1..n {
                    topology.connect(&nodes[(i - 1) / branching], &nodes[i]);
                }
            }
            Self::Grid { width } => {
                let width = match *width {
                    0 => grid_width(n),
                    w => w,
                };
                for i in 0..n {
                    if (i + 1) % width != 0 && i + 1 < n {
                        topology.connect(&nodes[i], &nodes[i + 1]);
                    }
                    if i + width < n {
                        topology.connect(&nodes[i], &nodes[i + width]);
                    }
                }
            }
        }

        Ok(topology)
    }
}

/// Smallest width whose square covers `n` nodes
fn grid_width(n: usize) -> usize {
    let mut width = 1;
    while width * width < n {
        width += 1;
    }
    width
}

impl fmt::Display for TopologyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mesh => write!(f, "mesh"),
            Self::Ring => write!(f, "ring"),
            Self::Star => write!(f, "star"),
            Self::Tree { branching } => write!(f, "tree:{branching}"),
            Self::Grid { width: 0 } => write!(f, "grid"),
            Self::Grid { width } => write!(f, "grid:{width}"),
        }
    }
}

impl FromStr for TopologyKind {
    type Err = SimulatorError;

    /// Parse `mesh`, `ring`, `star`, `tree[:branching]` or `grid[:width]`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, arg) = match s.split_once(':') {
            Some((name, arg)) => (name, Some(arg)),
            None => (s, None),
        };

        let number = |default: usize| -> SimulatorResult<usize> {
            match arg {
                None => Ok(default),
                Some(arg) => arg.trim().parse().map_err(|_| {
                    SimulatorError::InvalidTopology(format!("bad number in topology {s:?}"))
                }),
            }
        };

        match name.trim().to_ascii_lowercase().as_str() {
            "mesh" | "total" => Ok(Self::Mesh),
            "ring" | "line" if arg.is_none() => Ok(Self::Ring),
            "star" if arg.is_none() => Ok(Self::Star),
            "tree" => Ok(Self::Tree {
                branching: number(2)?,
            }),
            "grid" => Ok(Self::Grid { width: number(0)? }),
            _ => Err(SimulatorError::InvalidTopology(format!(
                "unknown topology {s:?}; expected mesh, ring, star, tree[:n] or grid[:n]"
            ))),
        }
    }
}
