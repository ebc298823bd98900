#![warn(missing_docs)]
#![deny(clippy::panic)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

//! Request/response transport for gossipcast
//!
//! Provides the seam between gossipcast's handlers and whatever carries
//! their messages:
//! - [`Message`]/[`Body`]: JSON envelope with `msg_id`/`in_reply_to` correlation
//! - [`Transport`]: RPC with a caller-bounded timeout plus fire-and-forget reply
//! - [`MessageHandler`]/[`Dispatcher`]: routing of inbound messages by `type`
//!
//! Byte-level framing and process lifecycle belong to concrete transports;
//! the in-process simulator in `gossipcast-simulator` is one of them.

mod error;
mod handler;
mod message;

pub use error::{TransportError, TransportResult};
pub use handler::{Dispatcher, MessageHandler};
pub use message::{Body, ErrorCode, ErrorPayload, Message, ERROR_TYPE};

use gossipcast_types::NodeId;
use std::time::Duration;

/// Request/response transport used by handlers and gossip loops
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Identity of the local node
    fn node_id(&self) -> &NodeId;

    /// Send `body` to `dest` and wait for the correlated reply
    ///
    /// Fails with [`TransportError::Timeout`] if no reply arrives within
    /// `timeout`, and with [`TransportError::Rejected`] if the reply is an
    /// error body.
    async fn rpc(&self, dest: &NodeId, body: Body, timeout: Duration) -> TransportResult<Body>;

    /// Answer `request` with `body` without waiting for delivery
    async fn reply(&self, request: &Message, body: Body) -> TransportResult<()>;
}

// Blanket implementation for Arc<T> to allow calling trait methods through Arc
#[async_trait::async_trait]
impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    fn node_id(&self) -> &NodeId {
        (**self).node_id()
    }

    async fn rpc(&self, dest: &NodeId, body: Body, timeout: Duration) -> TransportResult<Body> {
        (**self).rpc(dest, body, timeout).await
    }

    async fn reply(&self, request: &Message, body: Body) -> TransportResult<()> {
        (**self).reply(request, body).await
    }
}
