//! One topology neighbor and the loop that gossips to it.

use anyhow::{anyhow, Context, Result};
use gossipcast_transport::{Body, Transport};
use gossipcast_types::{NodeId, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::config::GossipConfig;
use crate::messages::{BroadcastPayload, BROADCAST, BROADCAST_OK};
use crate::queue::NeighborQueue;
use crate::stats::GossipStats;

/// A peer this node gossips to
///
/// Owns the peer's unacknowledged queue and the background sender loop
/// that drains it. The loop runs until [`Neighbor::stop`] is called or the
/// `Neighbor` is dropped.
pub struct Neighbor {
    id: NodeId,
    queue: Arc<NeighborQueue>,
    /// Background task handle
    task: Mutex<Option<JoinHandle<()>>>,
    /// Shutdown signal
    shutdown_tx: Mutex<Option<mpsc::Sender<()>>>,
    shutdown_timeout: Duration,
}

impl Neighbor {
    /// Create a neighbor with an empty queue and start its sender loop
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(
        id: NodeId,
        transport: Arc<dyn Transport>,
        config: GossipConfig,
        stats: Arc<GossipStats>,
    ) -> Self {
        let queue = Arc::new(NeighborQueue::new());
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let shutdown_timeout = config.shutdown_timeout;

        let sender = SenderLoop {
            peer: id.clone(),
            queue: queue.clone(),
            transport,
            config,
            stats,
        };
        let task = tokio::spawn(sender.run(shutdown_rx));

        Self {
            id,
            queue,
            task: Mutex::new(Some(task)),
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            shutdown_timeout,
        }
    }

    /// The peer's identity
    pub fn id(&self) -> &NodeId {
        &self.id
    }

    /// The peer's unacknowledged queue
    pub fn queue(&self) -> &Arc<NeighborQueue> {
        &self.queue
    }

    /// Queue a value for this peer
    pub async fn enqueue(&self, value: Value) -> bool {
        self.queue.enqueue(value).await
    }

    /// Values this peer has not acknowledged yet
    pub async fn pending(&self) -> Vec<Value> {
        self.queue.snapshot().await
    }

    /// Stop the sender loop and wait for it to exit
    ///
    /// An RPC in flight is abandoned. Calling `stop` again is a no-op.
    pub async fn stop(&self) -> Result<()> {
        if let Some(tx) = self.shutdown_tx.lock().await.take() {
            // Ignore error if the loop already exited
            let _ = tx.send(()).await;
        }

        if let Some(mut handle) = self.task.lock().await.take() {
            match tokio::time::timeout(self.shutdown_timeout, &mut handle).await {
                Ok(join_result) => {
                    join_result.context("gossip sender panicked")?;
                }
                Err(_) => {
                    handle.abort();
                    return Err(anyhow!(
                        "gossip sender for {} did not stop within {:?}",
                        self.id,
                        self.shutdown_timeout
                    ));
                }
            }
        }

        Ok(())
    }
}

/// Sender loop state for one neighbor
struct SenderLoop {
    peer: NodeId,
    queue: Arc<NeighborQueue>,
    transport: Arc<dyn Transport>,
    config: GossipConfig,
    stats: Arc<GossipStats>,
}

impl SenderLoop {
    async fn run(self, mut shutdown_rx: mpsc::Receiver<()>) {
        debug!(peer = %self.peer, "gossip sender started");

        loop {
            let delay = tokio::select! {
                delay = self.cycle() => delay,
                _ = shutdown_rx.recv() => break,
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown_rx.recv() => break,
            }
        }

        debug!(peer = %self.peer, "gossip sender stopped");
    }

    /// One round: send whatever is pending and return the delay until the next round
    async fn cycle(&self) -> Duration {
        let batch = self.queue.snapshot().await;
        if batch.is_empty() {
            return self.config.idle_backoff;
        }

        self.send_batch(batch).await;
        self.config.retry_interval
    }

    /// Send one batch; on acknowledgment remove exactly the values sent
    async fn send_batch(&self, batch: Vec<Value>) {
        let body = match Body::with_payload(BROADCAST, &BroadcastPayload::batch(batch.clone())) {
            Ok(body) => body,
            Err(e) => {
                warn!(peer = %self.peer, error = %e, "failed to encode gossip batch");
                return;
            }
        };

        trace!(peer = %self.peer, count = batch.len(), "sending gossip batch");
        self.stats.record_send();

        match self
            .transport
            .rpc(&self.peer, body, self.config.rpc_timeout)
            .await
        {
            Ok(reply) if reply.kind == BROADCAST_OK => {
                let removed = self.queue.remove(&batch).await;
                self.stats.record_acked(removed);
                trace!(peer = %self.peer, acked = removed, "gossip batch acknowledged");
            }
            Ok(reply) => {
                self.stats.record_failure();
                warn!(peer = %self.peer, kind = %reply.kind, "unexpected reply to gossip batch");
            }
            Err(e) => {
                self.stats.record_failure();
                debug!(
                    peer = %self.peer,
                    pending = batch.len(),
                    error = %e,
                    "gossip batch not acknowledged, will retry"
                );
            }
        }
    }
}
