//! Inbound message routing.
//!
//! This module provides [`Dispatcher`], which routes inbound messages to the
//! [`MessageHandler`] registered for their `type` and sends the handler's
//! answer back to the requester. Handler failures are answered with an
//! error body so the requester never waits on a request that was rejected.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::error::{TransportError, TransportResult};
use crate::message::{Body, Message};
use crate::Transport;

/// Trait for handling one family of inbound messages.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Message types this handler accepts.
    fn message_types(&self) -> &'static [&'static str];

    /// Handle a message.
    ///
    /// Returns the reply body, or `None` when nothing should be sent back.
    async fn handle(&self, message: &Message) -> TransportResult<Option<Body>>;
}

/// Routes inbound messages to handlers by message type.
///
/// # Example
///
/// ```rust,ignore
/// let mut dispatcher = Dispatcher::new(transport.clone());
/// dispatcher.register(node.clone())?;
///
/// // for every inbound request:
/// dispatcher.dispatch(message).await?;
/// ```
pub struct Dispatcher {
    /// Transport used to answer requests.
    transport: Arc<dyn Transport>,
    /// Message type -> handler.
    routes: HashMap<&'static str, Arc<dyn MessageHandler>>,
}

impl Dispatcher {
    /// Create a dispatcher with no handlers.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            routes: HashMap::new(),
        }
    }

    /// Register a handler for every message type it accepts.
    ///
    /// Fails without registering anything if one of the types is already
    /// taken by another handler.
    pub fn register(&mut self, handler: Arc<dyn MessageHandler>) -> TransportResult<()> {
        let types = handler.message_types();
        if let Some(taken) = types.iter().find(|t| self.routes.contains_key(*t)) {
            return Err(TransportError::Other {
                source: anyhow::anyhow!("handler already registered for {taken}"),
            });
        }

        for kind in types {
            self.routes.insert(*kind, handler.clone());
        }
        Ok(())
    }

    /// Whether a handler accepts `kind`.
    pub fn handles(&self, kind: &str) -> bool {
        self.routes.contains_key(kind)
    }

    /// The transport this dispatcher answers through.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Route a message to its handler and reply with the outcome.
    ///
    /// Requests carrying a `msg_id` always get an answer: the handler's reply
    /// on success, an error body otherwise. The handler error is returned
    /// to the caller after the error reply has been sent.
    pub async fn dispatch(&self, message: Message) -> TransportResult<()> {
        trace!(src = %message.src, kind = message.kind(), "dispatching message");

        let outcome = match self.routes.get(message.kind()) {
            Some(handler) => handler.handle(&message).await,
            None => Err(TransportError::Unsupported(message.kind().to_string())),
        };

        let expects_reply = message.body.msg_id.is_some();
        match outcome {
            Ok(Some(reply)) if expects_reply => self.transport.reply(&message, reply).await,
            Ok(_) => Ok(()),
            Err(e) => {
                debug!(src = %message.src, kind = message.kind(), error = %e, "handler failed");
                if expects_reply {
                    let reply = Body::error(e.code(), e.to_string());
                    if let Err(reply_err) = self.transport.reply(&message, reply).await {
                        warn!(src = %message.src, error = %reply_err, "failed to send error reply");
                    }
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::message::ErrorCode;
    use gossipcast_types::NodeId;
    use serde::Deserialize;
    use std::time::Duration;
    use tokio::sync::Mutex;

    /// Transport that records replies instead of sending them.
    struct RecordingTransport {
        id: NodeId,
        replies: Mutex<Vec<(Message, Body)>>,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        fn node_id(&self) -> &NodeId {
            &self.id
        }

        async fn rpc(&self, dest: &NodeId, _body: Body, after: Duration) -> TransportResult<Body> {
            Err(TransportError::Timeout {
                dest: dest.clone(),
                after,
            })
        }

        async fn reply(&self, request: &Message, body: Body) -> TransportResult<()> {
            self.replies.lock().await.push((request.clone(), body));
            Ok(())
        }
    }

    #[derive(Deserialize)]
    struct Echo {
        echo: String,
    }

    struct EchoHandler;

    #[async_trait]
    impl MessageHandler for EchoHandler {
        fn message_types(&self) -> &'static [&'static str] {
            &["echo"]
        }

        async fn handle(&self, message: &Message) -> TransportResult<Option<Body>> {
            let echo: Echo = message.body.decode()?;
            let mut reply = Body::new("echo_ok");
            reply.fields.insert("echo".into(), echo.echo.into());
            Ok(Some(reply))
        }
    }

    fn request(kind: &str, fields: serde_json::Value) -> Message {
        let mut body = Body::new(kind);
        body.msg_id = Some(1);
        if let serde_json::Value::Object(map) = fields {
            body.fields = map;
        }
        Message::new("c1".into(), "n1".into(), body)
    }

    fn dispatcher() -> (Dispatcher, Arc<RecordingTransport>) {
        let transport = Arc::new(RecordingTransport {
            id: NodeId::from("n1"),
            replies: Mutex::new(Vec::new()),
        });
        let mut dispatcher = Dispatcher::new(transport.clone());
        dispatcher.register(Arc::new(EchoHandler)).unwrap();
        (dispatcher, transport)
    }

    #[tokio::test]
    async fn test_dispatch_replies_with_handler_body() {
        let (dispatcher, transport) = dispatcher();

        dispatcher
            .dispatch(request("echo", serde_json::json!({"echo": "hi"})))
            .await
            .unwrap();

        let replies = transport.replies.lock().await;
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].1.kind, "echo_ok");
        assert_eq!(replies[0].1.fields["echo"], "hi");
    }

    #[tokio::test]
    async fn test_malformed_body_gets_error_reply() {
        let (dispatcher, transport) = dispatcher();

        let err = dispatcher
            .dispatch(request("echo", serde_json::json!({"wrong": 1})))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Malformed { .. }));

        let replies = transport.replies.lock().await;
        let err = replies[0].1.clone().into_result().unwrap_err();
        assert_eq!(err.code(), ErrorCode::MalformedRequest);
    }

    #[tokio::test]
    async fn test_unknown_type_is_not_supported() {
        let (dispatcher, transport) = dispatcher();
        assert!(!dispatcher.handles("txn"));

        let err = dispatcher
            .dispatch(request("txn", serde_json::json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Unsupported(_)));

        let replies = transport.replies.lock().await;
        assert_eq!(
            replies[0].1.clone().into_result().unwrap_err().code(),
            ErrorCode::NotSupported
        );
    }

    #[tokio::test]
    async fn test_no_reply_without_msg_id() {
        let (dispatcher, transport) = dispatcher();
        let mut message = request("echo", serde_json::json!({"echo": "hi"}));
        message.body.msg_id = None;

        dispatcher.dispatch(message).await.unwrap();
        assert!(transport.replies.lock().await.is_empty());
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let (mut dispatcher, _) = dispatcher();
        assert!(dispatcher.handles("echo"));
        assert!(dispatcher.register(Arc::new(EchoHandler)).is_err());
    }
}
