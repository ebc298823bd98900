//! Scripted transport for unit tests.

use async_trait::async_trait;
use gossipcast_transport::{Body, Message, Transport, TransportError, TransportResult};
use gossipcast_types::{NodeId, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};

use crate::messages::{BroadcastPayload, BROADCAST_OK};

/// Transport that records gossip RPCs and answers them on a script.
pub(crate) struct MockTransport {
    id: NodeId,
    /// Every RPC issued, in order.
    pub sent: Mutex<Vec<(NodeId, Body)>>,
    /// Number of upcoming RPCs to fail with a timeout.
    failures_left: AtomicUsize,
    /// When set, RPCs wait for `release` before answering.
    hold: AtomicBool,
    release: Notify,
}

impl MockTransport {
    pub fn new(id: &str) -> Self {
        Self {
            id: NodeId::from(id),
            sent: Mutex::new(Vec::new()),
            failures_left: AtomicUsize::new(0),
            hold: AtomicBool::new(false),
            release: Notify::new(),
        }
    }

    pub fn fail_next(&self, count: usize) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    pub fn hold_replies(&self, hold: bool) {
        self.hold.store(hold, Ordering::SeqCst);
    }

    pub fn release_one(&self) {
        self.release.notify_one();
    }

    pub async fn rpc_count(&self) -> usize {
        self.sent.lock().await.len()
    }

    /// Values carried by each RPC sent to `peer`.
    pub async fn batches_to(&self, peer: &str) -> Vec<Vec<Value>> {
        self.sent
            .lock()
            .await
            .iter()
            .filter(|(dest, _)| dest.as_str() == peer)
            .filter_map(|(_, body)| body.decode::<BroadcastPayload>().ok())
            .map(BroadcastPayload::into_values)
            .collect()
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn node_id(&self) -> &NodeId {
        &self.id
    }

    async fn rpc(&self, dest: &NodeId, body: Body, timeout: Duration) -> TransportResult<Body> {
        self.sent.lock().await.push((dest.clone(), body));

        if self.hold.load(Ordering::SeqCst) {
            self.release.notified().await;
        }

        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(TransportError::Timeout {
                dest: dest.clone(),
                after: timeout,
            });
        }

        Ok(Body::new(BROADCAST_OK))
    }

    async fn reply(&self, _request: &Message, _body: Body) -> TransportResult<()> {
        Ok(())
    }
}

/// Poll `check` every few milliseconds until it holds or `deadline` passes.
pub(crate) async fn eventually<F, Fut>(deadline: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = tokio::time::Instant::now();
    while start.elapsed() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check().await
}
