//! Per-neighbor queue of values the neighbor has not acknowledged yet.

use gossipcast_types::Value;
use std::collections::HashSet;
use tokio::sync::Mutex;

/// Unacknowledged values pending for one neighbor
///
/// Shared between the broadcast handler (enqueue) and the neighbor's sender
/// loop (snapshot, remove). Each queue owns its own lock so a slow neighbor
/// never stalls fan-out to the others. The lock is only held for set
/// operations, never across an RPC.
#[derive(Debug, Default)]
pub struct NeighborQueue {
    pending: Mutex<HashSet<Value>>,
}

impl NeighborQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value unless it is already pending
    ///
    /// Returns whether the value was added.
    pub async fn enqueue(&self, value: Value) -> bool {
        self.pending.lock().await.insert(value)
    }

    /// Current pending values, sorted; the queue is left untouched
    pub async fn snapshot(&self) -> Vec<Value> {
        let mut values: Vec<Value> = self.pending.lock().await.iter().copied().collect();
        values.sort_unstable();
        values
    }

    /// Remove exactly `values`, returning how many were pending
    ///
    /// Values enqueued after the caller took its snapshot are kept, even if
    /// an acknowledgment for an earlier batch arrives later.
    pub async fn remove(&self, values: &[Value]) -> usize {
        let mut pending = self.pending.lock().await;
        values.iter().filter(|v| pending.remove(*v)).count()
    }

    /// Number of pending values
    pub async fn len(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Whether nothing is pending
    pub async fn is_empty(&self) -> bool {
        self.pending.lock().await.is_empty()
    }
}
