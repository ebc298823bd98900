//! Counter and unique-ID workloads run against simulated clusters.

use gossipcast_counter::{
    AddPayload, CounterConfig, CounterNode, CounterValue, KvClient, MemoryKv, ADD, ADD_OK, READ,
    READ_OK, SEQ_KV,
};
use gossipcast_ids::{GeneratedId, UniqueIdNode, GENERATE, GENERATE_OK};
use gossipcast_transport::{Body, Transport};
use gossipcast_types::NodeId;
use rand::prelude::*;
use rand_pcg::Pcg64;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::network::{SimNetwork, DEFAULT_SEED};
use crate::simulated_transport::SimTransport;
use crate::{LinkConfig, SimulatorError, SimulatorResult};

/// Bound on each client request issued by a workload
const CLIENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Parameters of [`run_counter_workload`]
#[derive(Debug, Clone)]
pub struct CounterWorkload {
    /// Counter nodes, named `n0`, `n1`, ...
    pub nodes: usize,
    /// Total `add` requests, spread round-robin over the nodes
    pub adds: usize,
    /// Seed for the random deltas and the network
    pub seed: u64,
    /// Node-to-node links; links to the key-value service are reliable
    pub link: LinkConfig,
}

impl Default for CounterWorkload {
    fn default() -> Self {
        Self {
            nodes: 3,
            adds: 100,
            seed: DEFAULT_SEED,
            link: LinkConfig::default(),
        }
    }
}

/// Outcome of [`run_counter_workload`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterReport {
    /// Sum of the deltas of acknowledged adds
    pub expected: i64,
    /// Adds that were not acknowledged
    pub failed_adds: usize,
    /// Value read back from each node
    pub observed: Vec<(NodeId, i64)>,
    /// Wall time of the whole run
    pub elapsed: Duration,
}

impl CounterReport {
    /// Whether every node reads the sum of the acknowledged adds
    pub fn is_consistent(&self) -> bool {
        self.failed_adds == 0 && self.observed.iter().all(|(_, v)| *v == self.expected)
    }
}

/// Run concurrent adds across counter nodes sharing a `seq-kv` service
///
/// One client per node issues its share of the adds sequentially, so
/// concurrency equals the node count. Each delta is drawn from `1..=10`.
pub async fn run_counter_workload(workload: CounterWorkload) -> SimulatorResult<CounterReport> {
    let start = Instant::now();
    let network = SimNetwork::new(workload.seed, workload.link.clone())?;

    network
        .register_service(NodeId::from(SEQ_KV), vec![Arc::new(MemoryKv::new())])
        .await?;

    let config = CounterConfig {
        max_cas_attempts: 1_000,
        ..CounterConfig::default()
    };
    let ids = node_ids(workload.nodes);
    for id in &ids {
        let kv = KvClient::seq_kv(network.transport(id.clone()));
        let node = CounterNode::new(Arc::new(kv), config.clone());
        network.register(id.clone(), vec![Arc::new(node)]).await?;
    }

    // Deltas are drawn up front so the run is reproducible from the seed
    let mut rng = Pcg64::seed_from_u64(workload.seed);
    let mut plans: Vec<Vec<i64>> = vec![Vec::new(); ids.len()];
    for i in 0..workload.adds {
        plans[i % ids.len()].push(rng.gen_range(1..=10));
    }

    let mut tasks = JoinSet::new();
    for (i, (id, deltas)) in ids.iter().cloned().zip(plans).enumerate() {
        let client = network.client(NodeId::new(format!("c{i}"))).await;
        tasks.spawn(async move {
            let mut acked = 0i64;
            let mut failed = 0usize;
            for delta in deltas {
                match add(&client, &id, delta).await {
                    Ok(()) => acked += delta,
                    Err(e) => {
                        warn!(node = %id, delta, error = %e, "add failed");
                        failed += 1;
                    }
                }
            }
            (acked, failed)
        });
    }

    let mut expected = 0;
    let mut failed_adds = 0;
    while let Some(joined) = tasks.join_next().await {
        let (acked, failed) = joined.map_err(|e| SimulatorError::Task(e.to_string()))?;
        expected += acked;
        failed_adds += failed;
    }

    let reader = network.client(NodeId::from("c-reader")).await;
    let mut observed = Vec::with_capacity(ids.len());
    for id in &ids {
        let reply = request(&reader, id, Body::new(READ), READ_OK).await?;
        let value: CounterValue = reply.decode()?;
        observed.push((id.clone(), value.value));
    }
    network.close().await;

    let report = CounterReport {
        expected,
        failed_adds,
        observed,
        elapsed: start.elapsed(),
    };
    info!(
        expected = report.expected,
        failed = report.failed_adds,
        consistent = report.is_consistent(),
        "counter workload finished"
    );
    Ok(report)
}

async fn add(client: &SimTransport, node: &NodeId, delta: i64) -> SimulatorResult<()> {
    let body = Body::with_payload(ADD, &AddPayload { delta })?;
    request(client, node, body, ADD_OK).await?;
    Ok(())
}

/// Parameters of [`run_ids_workload`]
#[derive(Debug, Clone)]
pub struct IdsWorkload {
    /// ID nodes, named `n0`, `n1`, ...
    pub nodes: usize,
    /// Total `generate` requests, spread round-robin over the nodes
    pub count: usize,
    /// Seed for the network
    pub seed: u64,
    /// Node-to-node links
    pub link: LinkConfig,
}

impl Default for IdsWorkload {
    fn default() -> Self {
        Self {
            nodes: 3,
            count: 1_000,
            seed: DEFAULT_SEED,
            link: LinkConfig::default(),
        }
    }
}

/// Outcome of [`run_ids_workload`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdsReport {
    /// IDs returned to clients
    pub generated: usize,
    /// Distinct IDs among them
    pub unique: usize,
    /// Requests that failed
    pub failed: usize,
    /// Wall time of the whole run
    pub elapsed: Duration,
}

impl IdsReport {
    /// Whether every request got an ID and no ID repeated
    pub fn is_unique(&self) -> bool {
        self.failed == 0 && self.generated == self.unique
    }
}

/// Generate IDs across nodes concurrently and check their uniqueness
pub async fn run_ids_workload(workload: IdsWorkload) -> SimulatorResult<IdsReport> {
    let start = Instant::now();
    let network = SimNetwork::new(workload.seed, workload.link.clone())?;

    let ids = node_ids(workload.nodes);
    for id in &ids {
        network
            .register(id.clone(), vec![Arc::new(UniqueIdNode::new(id.clone()))])
            .await?;
    }

    let per_node = split(workload.count, ids.len());
    let mut tasks = JoinSet::new();
    for (i, (id, count)) in ids.iter().cloned().zip(per_node).enumerate() {
        let client = network.client(NodeId::new(format!("c{i}"))).await;
        tasks.spawn(async move {
            let mut generated = Vec::with_capacity(count);
            let mut failed = 0usize;
            for _ in 0..count {
                match request(client.as_ref(), &id, Body::new(GENERATE), GENERATE_OK).await {
                    Ok(reply) => match reply.decode::<GeneratedId>() {
                        Ok(payload) => generated.push(payload.id),
                        Err(_) => failed += 1,
                    },
                    Err(e) => {
                        warn!(node = %id, error = %e, "generate failed");
                        failed += 1;
                    }
                }
            }
            (generated, failed)
        });
    }

    let mut all = Vec::with_capacity(workload.count);
    let mut failed = 0;
    while let Some(joined) = tasks.join_next().await {
        let (generated, task_failed) = joined.map_err(|e| SimulatorError::Task(e.to_string()))?;
        all.extend(generated);
        failed += task_failed;
    }
    network.close().await;

    let unique = all.iter().collect::<HashSet<_>>().len();
    let report = IdsReport {
        generated: all.len(),
        unique,
        failed,
        elapsed: start.elapsed(),
    };
    info!(
        generated = report.generated,
        unique = report.unique,
        failed = report.failed,
        "ids workload finished"
    );
    Ok(report)
}

fn node_ids(count: usize) -> Vec<NodeId> {
    (0..count.max(1))
        .map(|i| NodeId::new(format!("n{i}")))
        .collect()
}

/// Split `total` into `parts` shares differing by at most one
fn split(total: usize, parts: usize) -> Vec<usize> {
    (0..parts)
        .map(|i| total / parts + usize::from(i < total % parts))
        .collect()
}

async fn request<T: Transport + ?Sized>(
    client: &T,
    node: &NodeId,
    body: Body,
    expected: &str,
) -> SimulatorResult<Body> {
    let reply = client.rpc(node, body, CLIENT_TIMEOUT).await?;
    if reply.kind != expected {
        return Err(SimulatorError::UnexpectedReply {
            node: node.clone(),
            kind: reply.kind,
        });
    }
    Ok(reply)
}
