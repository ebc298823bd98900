//! Gossip counters

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by a node's handlers and sender loops
#[derive(Debug, Default)]
pub struct GossipStats {
    accepted: AtomicU64,
    duplicates: AtomicU64,
    rpcs_sent: AtomicU64,
    rpcs_failed: AtomicU64,
    values_acked: AtomicU64,
}

/// Point-in-time copy of [`GossipStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GossipStatsSnapshot {
    /// Values accepted for the first time
    pub accepted: u64,
    /// Inbound values that were already delivered
    pub duplicates: u64,
    /// Gossip RPCs issued to neighbors
    pub rpcs_sent: u64,
    /// Gossip RPCs that timed out or were rejected
    pub rpcs_failed: u64,
    /// Values removed from neighbor queues after acknowledgment
    pub values_acked: u64,
}

impl GossipStats {
    pub(crate) fn record_accepted(&self, fresh: usize, duplicates: usize) {
        self.accepted.fetch_add(fresh as u64, Ordering::Relaxed);
        self.duplicates
            .fetch_add(duplicates as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_send(&self) {
        self.rpcs_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.rpcs_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_acked(&self, values: usize) {
        self.values_acked.fetch_add(values as u64, Ordering::Relaxed);
    }

    /// Copy the current counter values
    pub fn snapshot(&self) -> GossipStatsSnapshot {
        GossipStatsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            rpcs_sent: self.rpcs_sent.load(Ordering::Relaxed),
            rpcs_failed: self.rpcs_failed.load(Ordering::Relaxed),
            values_acked: self.values_acked.load(Ordering::Relaxed),
        }
    }
}

impl std::ops::Add for GossipStatsSnapshot {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self {
            accepted: self.accepted + other.accepted,
            duplicates: self.duplicates + other.duplicates,
            rpcs_sent: self.rpcs_sent + other.rpcs_sent,
            rpcs_failed: self.rpcs_failed + other.rpcs_failed,
            values_acked: self.values_acked + other.values_acked,
        }
    }
}
