//! Simulated Transport
//!
//! This module provides the [`Transport`] implementation that lets
//! gossipcast nodes talk through a [`SimNetwork`], so the same node code runs
//! in tests, in the CLI and behind a real transport.

use async_trait::async_trait;
use gossipcast_transport::{Body, Message, Transport, TransportError, TransportResult};
use gossipcast_types::NodeId;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::trace;

use crate::network::SimNetwork;

/// Endpoint of one node or client on a [`SimNetwork`]
pub struct SimTransport {
    /// This endpoint's ID
    node_id: NodeId,
    /// The network; weak so registered handlers do not keep it alive
    network: Weak<SimNetwork>,
}

impl SimTransport {
    pub(crate) fn new(node_id: NodeId, network: Weak<SimNetwork>) -> Self {
        Self { node_id, network }
    }

    fn network(&self) -> TransportResult<Arc<SimNetwork>> {
        match self.network.upgrade() {
            Some(network) if !network.is_closed() => Ok(network),
            _ => Err(TransportError::Closed),
        }
    }
}

/// Releases an RPC's reply waiter however the RPC ends
///
/// Covers the future being dropped mid-flight, e.g. by a `select!` during
/// shutdown. Removing an entry the reply already consumed is a no-op.
struct ReplyWaiter {
    network: Arc<SimNetwork>,
    requester: NodeId,
    msg_id: u64,
}

impl Drop for ReplyWaiter {
    fn drop(&mut self) {
        self.network.abandon_reply(&self.requester, self.msg_id);
    }
}

#[async_trait]
impl Transport for SimTransport {
    fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    async fn rpc(&self, dest: &NodeId, mut body: Body, timeout: Duration) -> TransportResult<Body> {
        let network = self.network()?;
        let msg_id = network.next_msg_id();
        body.msg_id = Some(msg_id);
        body.in_reply_to = None;

        let reply = network.expect_reply(self.node_id.clone(), msg_id);
        let _waiter = ReplyWaiter {
            network: network.clone(),
            requester: self.node_id.clone(),
            msg_id,
        };
        trace!(src = %self.node_id, dest = %dest, kind = %body.kind, msg_id, "rpc");
        network
            .send(Message::new(self.node_id.clone(), dest.clone(), body))
            .await;

        match tokio::time::timeout(timeout, reply).await {
            Ok(Ok(reply)) => reply.into_result(),
            // Waiter dropped: the network closed under us
            Ok(Err(_)) => Err(TransportError::Closed),
            Err(_) => Err(TransportError::Timeout {
                dest: dest.clone(),
                after: timeout,
            }),
        }
    }

    async fn reply(&self, request: &Message, mut body: Body) -> TransportResult<()> {
        let Some(request_id) = request.body.msg_id else {
            // Nothing to correlate with
            return Ok(());
        };

        let network = self.network()?;
        body.msg_id = Some(network.next_msg_id());
        body.in_reply_to = Some(request_id);
        network
            .send(Message::new(self.node_id.clone(), request.src.clone(), body))
            .await;
        Ok(())
    }
}

impl std::fmt::Debug for SimTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimTransport")
            .field("node_id", &self.node_id)
            .finish_non_exhaustive()
    }
}
