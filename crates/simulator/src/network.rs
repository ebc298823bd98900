//! The simulated network: message delivery, loss, partitions and RPC correlation.

use gossipcast_transport::{Body, Dispatcher, Message, MessageHandler};
use gossipcast_types::NodeId;
use rand::prelude::*;
use rand_pcg::Pcg64;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as SyncMutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{oneshot, Mutex, RwLock};
use tracing::{debug, info, trace};

use crate::simulated_transport::SimTransport;
use crate::{LinkConfig, NetworkStats, SimulatorError, SimulatorResult};

/// Default seed for reproducible runs
pub const DEFAULT_SEED: u64 = 42;

type PendingKey = (NodeId, u64);

/// In-process network connecting simulated nodes
///
/// Always used behind an `Arc`; transports hold a weak reference to it.
pub struct SimNetwork {
    /// Request handlers per node
    dispatchers: RwLock<HashMap<NodeId, Arc<Dispatcher>>>,
    /// Nodes whose links never drop messages
    reliable: RwLock<HashSet<NodeId>>,
    /// RPCs waiting for a reply, keyed by (requester, msg_id)
    ///
    /// Synchronous so a dropped RPC future can release its entry; the lock
    /// is never held across an await.
    pending: SyncMutex<HashMap<PendingKey, oneshot::Sender<Body>>>,
    /// Random number generator (deterministic with seed)
    rng: Mutex<Pcg64>,
    /// Default link configuration
    default_link: RwLock<LinkConfig>,
    /// Link configurations (node pairs -> config)
    link_configs: RwLock<HashMap<(NodeId, NodeId), LinkConfig>>,
    /// Node pairs that cannot reach each other
    cuts: RwLock<HashSet<(NodeId, NodeId)>>,
    next_msg_id: AtomicU64,
    closed: AtomicBool,
    sent: AtomicU64,
    dropped: AtomicU64,
    delivered: AtomicU64,
}

/// Unordered pair key
fn pair(a: &NodeId, b: &NodeId) -> (NodeId, NodeId) {
    if a <= b {
        (a.clone(), b.clone())
    } else {
        (b.clone(), a.clone())
    }
}

impl SimNetwork {
    /// Create a network with the given seed and default link
    pub fn new(seed: u64, default_link: LinkConfig) -> SimulatorResult<Arc<Self>> {
        default_link.validate()?;

        Ok(Arc::new(Self {
            dispatchers: RwLock::new(HashMap::new()),
            reliable: RwLock::new(HashSet::new()),
            pending: SyncMutex::new(HashMap::new()),
            rng: Mutex::new(Pcg64::seed_from_u64(seed)),
            default_link: RwLock::new(default_link),
            link_configs: RwLock::new(HashMap::new()),
            cuts: RwLock::new(HashSet::new()),
            next_msg_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            sent: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
        }))
    }

    /// Transport endpoint for `node`
    ///
    /// The endpoint can issue RPCs right away; it receives requests only
    /// once handlers are registered for `node`.
    pub fn transport(self: &Arc<Self>, node: NodeId) -> Arc<SimTransport> {
        Arc::new(SimTransport::new(node, Arc::downgrade(self)))
    }

    /// Transport endpoint for a client
    ///
    /// Clients never receive requests and their links never drop messages.
    pub async fn client(self: &Arc<Self>, client: NodeId) -> Arc<SimTransport> {
        self.reliable.write().await.insert(client.clone());
        self.transport(client)
    }

    /// Route requests addressed to `node` to `handlers`
    pub async fn register(
        self: &Arc<Self>,
        node: NodeId,
        handlers: Vec<Arc<dyn MessageHandler>>,
    ) -> SimulatorResult<Arc<SimTransport>> {
        let transport = self.transport(node.clone());
        let mut dispatcher = Dispatcher::new(transport.clone());
        for handler in handlers {
            dispatcher.register(handler)?;
        }

        let mut dispatchers = self.dispatchers.write().await;
        if dispatchers.contains_key(&node) {
            return Err(SimulatorError::DuplicateNode(node));
        }
        dispatchers.insert(node.clone(), Arc::new(dispatcher));

        debug!(node = %node, "registered simulated node");
        Ok(transport)
    }

    /// Like [`SimNetwork::register`], for a service whose links never drop messages
    pub async fn register_service(
        self: &Arc<Self>,
        node: NodeId,
        handlers: Vec<Arc<dyn MessageHandler>>,
    ) -> SimulatorResult<Arc<SimTransport>> {
        self.reliable.write().await.insert(node.clone());
        self.register(node, handlers).await
    }

    /// Registered node IDs, sorted
    pub async fn nodes(&self) -> Vec<NodeId> {
        let mut nodes: Vec<NodeId> = self.dispatchers.read().await.keys().cloned().collect();
        nodes.sort();
        nodes
    }

    /// Set the configuration of links without an explicit one
    pub async fn set_default_link(&self, config: LinkConfig) -> SimulatorResult<()> {
        config.validate()?;
        *self.default_link.write().await = config;
        Ok(())
    }

    /// Set link configuration between two nodes (both directions)
    pub async fn set_link(&self, a: &NodeId, b: &NodeId, config: LinkConfig) -> SimulatorResult<()> {
        config.validate()?;
        self.link_configs.write().await.insert(pair(a, b), config);
        Ok(())
    }

    /// Get link configuration between two nodes
    ///
    /// Links touching an endpoint added with [`SimNetwork::client`] or
    /// [`SimNetwork::register_service`] never lose messages.
    pub async fn link(&self, a: &NodeId, b: &NodeId) -> LinkConfig {
        let config = match self.link_configs.read().await.get(&pair(a, b)) {
            Some(config) => config.clone(),
            None => self.default_link.read().await.clone(),
        };

        let reliable = self.reliable.read().await;
        if reliable.contains(a) || reliable.contains(b) {
            config.without_loss()
        } else {
            config
        }
    }

    /// Cut every link between `group_a` and `group_b`
    pub async fn partition(&self, group_a: &[NodeId], group_b: &[NodeId]) {
        let mut cuts = self.cuts.write().await;
        for a in group_a {
            for b in group_b {
                if a != b {
                    cuts.insert(pair(a, b));
                }
            }
        }
        info!(group_a = ?group_a, group_b = ?group_b, "network partitioned");
    }

    /// Restore every cut link
    pub async fn heal(&self) {
        self.cuts.write().await.clear();
        info!("network healed");
    }

    /// Whether `a` and `b` are currently cut off from each other
    pub async fn is_partitioned(&self, a: &NodeId, b: &NodeId) -> bool {
        self.cuts.read().await.contains(&pair(a, b))
    }

    /// Current counter values
    pub fn stats(&self) -> NetworkStats {
        NetworkStats {
            sent: self.sent.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
        }
    }

    /// Stop delivering messages and fail every outstanding RPC
    ///
    /// Handlers are released so nodes and their transports can be dropped.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.pending().clear();
        self.dispatchers.write().await.clear();
        info!("simulated network closed");
    }

    /// Whether [`SimNetwork::close`] has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn next_msg_id(&self) -> u64 {
        self.next_msg_id.fetch_add(1, Ordering::Relaxed)
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<PendingKey, oneshot::Sender<Body>>> {
        // The map stays consistent even if a holder panicked
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a waiter for the reply to `(requester, msg_id)`
    pub(crate) fn expect_reply(&self, requester: NodeId, msg_id: u64) -> oneshot::Receiver<Body> {
        let (tx, rx) = oneshot::channel();
        self.pending().insert((requester, msg_id), tx);
        rx
    }

    /// Forget a waiter whose RPC gave up or was cancelled
    pub(crate) fn abandon_reply(&self, requester: &NodeId, msg_id: u64) {
        self.pending().remove(&(requester.clone(), msg_id));
    }

    /// Number of RPCs still waiting for a reply
    pub(crate) fn pending_replies(&self) -> usize {
        self.pending().len()
    }

    /// Put a message on the wire
    ///
    /// The message may be dropped by link loss or a partition; otherwise it
    /// is delivered after the link latency on its own task.
    pub(crate) async fn send(self: &Arc<Self>, message: Message) {
        self.sent.fetch_add(1, Ordering::Relaxed);

        if self.is_closed() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }

        if self.is_partitioned(&message.src, &message.dest).await {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            trace!(src = %message.src, dest = %message.dest, kind = message.kind(), "dropped by partition");
            return;
        }

        let config = self.link(&message.src, &message.dest).await;
        let delay = {
            let mut rng = self.rng.lock().await;

            // Check for packet loss
            if config.packet_loss_rate > 0.0 && rng.gen::<f64>() < config.packet_loss_rate {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                trace!(src = %message.src, dest = %message.dest, kind = message.kind(), "dropped by link loss");
                return;
            }

            let jitter = if config.jitter_ms > 0 {
                rng.gen_range(0..=config.jitter_ms)
            } else {
                0
            };
            Duration::from_millis(config.latency_ms + jitter)
        };

        let network = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            network.deliver(message).await;
        });
    }

    /// Hand a message that survived the link to its recipient
    async fn deliver(&self, message: Message) {
        if self.is_closed() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }

        // Partitions that started while the message was in flight also apply
        if self.is_partitioned(&message.src, &message.dest).await {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            trace!(src = %message.src, dest = %message.dest, "in-flight message cut by partition");
            return;
        }

        if let Some(request_id) = message.body.in_reply_to {
            let waiter = self.pending().remove(&(message.dest.clone(), request_id));
            let answered = match waiter {
                Some(tx) => tx.send(message.body).is_ok(),
                None => false,
            };
            if answered {
                self.delivered.fetch_add(1, Ordering::Relaxed);
            } else {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                trace!(dest = %message.dest, request_id, "reply arrived after its RPC gave up");
            }
            return;
        }

        let dispatcher = self.dispatchers.read().await.get(&message.dest).cloned();
        let Some(dispatcher) = dispatcher else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            debug!(dest = %message.dest, kind = message.kind(), "no such node, message dropped");
            return;
        };

        self.delivered.fetch_add(1, Ordering::Relaxed);
        let (src, kind) = (message.src.clone(), message.kind().to_string());
        if let Err(e) = dispatcher.dispatch(message).await {
            trace!(src = %src, kind = %kind, error = %e, "request failed");
        }
    }
}

impl std::fmt::Debug for SimNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimNetwork")
            .field("stats", &self.stats())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Error for operations on a node the network does not know
pub(crate) fn unknown(node: &NodeId) -> SimulatorError {
    SimulatorError::NodeNotFound(node.clone())
}
