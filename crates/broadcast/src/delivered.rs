//! Node-local set of every value ever accepted.

use gossipcast_types::Value;
use std::collections::HashSet;
use tokio::sync::RwLock;

/// Append-only set of delivered values
///
/// Backs the `read` query and deduplicates inbound broadcasts. Values are
/// never removed. Membership test and insert happen under one write lock,
/// so two racing handlers can never both see the same value as new.
#[derive(Debug, Default)]
pub struct DeliveredSet {
    values: RwLock<HashSet<Value>>,
}

impl DeliveredSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if a value has been delivered
    pub async fn contains(&self, value: Value) -> bool {
        self.values.read().await.contains(&value)
    }

    /// Insert a value, returning whether it was new
    pub async fn insert(&self, value: Value) -> bool {
        self.values.write().await.insert(value)
    }

    /// Insert a batch atomically and return the values that were new
    ///
    /// The result preserves the order of `values` and never contains a
    /// value twice, even if the batch repeats it.
    pub async fn insert_all(&self, values: &[Value]) -> Vec<Value> {
        let mut set = self.values.write().await;
        values
            .iter()
            .copied()
            .filter(|v| set.insert(*v))
            .collect()
    }

    /// All delivered values, sorted
    pub async fn snapshot(&self) -> Vec<Value> {
        let mut values: Vec<Value> = self.values.read().await.iter().copied().collect();
        values.sort_unstable();
        values
    }

    /// Number of delivered values
    pub async fn len(&self) -> usize {
        self.values.read().await.len()
    }

    /// Whether nothing has been delivered yet
    pub async fn is_empty(&self) -> bool {
        self.values.read().await.is_empty()
    }
}
