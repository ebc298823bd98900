//! Cluster-level broadcast scenarios over the simulated network.

#![allow(clippy::panic, clippy::unwrap_used, clippy::expect_used)]

use gossipcast_broadcast::GossipConfig;
use gossipcast_types::{NodeId, Value};
use std::time::Duration;

use crate::{BroadcastCluster, LinkConfig, SimulatorError, TopologyKind};

fn fast_gossip() -> GossipConfig {
    GossipConfig::default()
        .with_retry_interval(Duration::from_millis(10))
        .with_idle_backoff(Duration::from_millis(5))
        .with_rpc_timeout(Duration::from_millis(100))
}

fn id(name: &str) -> NodeId {
    NodeId::from(name)
}

async fn cluster(nodes: usize, topology: TopologyKind, link: LinkConfig) -> BroadcastCluster {
    BroadcastCluster::builder()
        .nodes(nodes)
        .topology(topology)
        .link(link)
        .seed(17)
        .gossip(fast_gossip())
        .build()
        .await
        .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_value_reaches_neighbor_and_is_readable() {
    let cluster = cluster(2, TopologyKind::Ring, LinkConfig::default().with_latency(1, 0)).await;

    cluster.broadcast(&id("n0"), 5).await.unwrap();
    assert_eq!(cluster.read(&id("n0")).await.unwrap(), vec![5]);

    cluster
        .await_convergence(&[5], Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(cluster.read(&id("n1")).await.unwrap(), vec![5]);

    cluster.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_hub_value_survives_lossy_spoke() {
    let cluster = cluster(3, TopologyKind::Star, LinkConfig::default().with_latency(1, 0)).await;
    cluster
        .network()
        .set_link(&id("n0"), &id("n1"), LinkConfig::lossy(0.6).with_latency(1, 0))
        .await
        .unwrap();

    cluster.broadcast(&id("n0"), 7).await.unwrap();
    cluster
        .await_convergence(&[7], Duration::from_secs(10))
        .await
        .unwrap();

    // Retransmissions collapse into a single delivered value
    assert_eq!(cluster.read(&id("n1")).await.unwrap(), vec![7]);
    assert_eq!(cluster.read(&id("n2")).await.unwrap(), vec![7]);

    cluster.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_convergence_under_loss() {
    let cluster = cluster(
        9,
        TopologyKind::Grid { width: 0 },
        LinkConfig::lossy(0.3).with_latency(2, 3),
    )
    .await;

    let values: Vec<Value> = (0..30).collect();
    let nodes = cluster.node_ids();
    for (i, value) in values.iter().enumerate() {
        cluster.broadcast(&nodes[i % nodes.len()], *value).await.unwrap();
    }

    cluster
        .await_convergence(&values, Duration::from_secs(20))
        .await
        .unwrap();
    for node in &nodes {
        assert_eq!(cluster.read(node).await.unwrap(), values);
    }

    cluster.await_quiescence(Duration::from_secs(20)).await.unwrap();
    assert!(cluster.network_stats().dropped > 0);
    assert!(cluster.gossip_stats().rpcs_failed > 0);

    cluster.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_partition_then_heal() {
    let cluster = cluster(6, TopologyKind::Ring, LinkConfig::default().with_latency(1, 0)).await;
    let left = [id("n0"), id("n1"), id("n2")];
    let right = [id("n3"), id("n4"), id("n5")];

    cluster.partition(&left, &right).await;
    cluster.broadcast(&id("n1"), 100).await.unwrap();
    cluster.broadcast(&id("n4"), 200).await.unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    for node in &left {
        assert!(!cluster.read(node).await.unwrap().contains(&200));
    }
    for node in &right {
        assert!(!cluster.read(node).await.unwrap().contains(&100));
    }

    // Queued values are still retried and cross once the cut is gone
    cluster.heal().await;
    cluster
        .await_convergence(&[100, 200], Duration::from_secs(10))
        .await
        .unwrap();

    cluster.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_repeated_broadcast_is_accepted_once_per_node() {
    let cluster = cluster(4, TopologyKind::Mesh, LinkConfig::default().with_latency(1, 0)).await;

    cluster.broadcast(&id("n2"), 9).await.unwrap();
    cluster.broadcast(&id("n2"), 9).await.unwrap();
    cluster.broadcast(&id("n3"), 9).await.unwrap();

    cluster
        .await_convergence(&[9], Duration::from_secs(5))
        .await
        .unwrap();
    cluster.await_quiescence(Duration::from_secs(5)).await.unwrap();

    let stats = cluster.gossip_stats();
    assert_eq!(stats.accepted, 4);
    assert!(stats.duplicates >= 2);
    for node in cluster.node_ids() {
        assert_eq!(cluster.read(&node).await.unwrap(), vec![9]);
    }

    cluster.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unreachable_neighbor_does_not_block_others() {
    let cluster = cluster(5, TopologyKind::Star, LinkConfig::default().with_latency(1, 0)).await;

    cluster.partition(&[id("n0")], &[id("n1")]).await;
    cluster.broadcast(&id("n0"), 3).await.unwrap();

    let err = cluster
        .await_convergence(&[3], Duration::from_secs(1))
        .await
        .unwrap_err();
    match err {
        SimulatorError::ConvergenceTimeout { lagging, .. } => assert_eq!(lagging, vec![id("n1")]),
        other => panic!("unexpected error: {other}"),
    }

    let hub = cluster.node(&id("n0")).unwrap();
    assert_eq!(hub.pending_for(&id("n1")).await, Some(vec![3]));

    cluster.heal().await;
    cluster
        .await_convergence(&[3], Duration::from_secs(5))
        .await
        .unwrap();

    cluster.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_every_topology_converges() {
    for kind in [
        TopologyKind::Mesh,
        TopologyKind::Ring,
        TopologyKind::Star,
        TopologyKind::Tree { branching: 3 },
        TopologyKind::Grid { width: 0 },
    ] {
        let cluster = cluster(7, kind.clone(), LinkConfig::lossy(0.1).with_latency(1, 1)).await;
        cluster.broadcast(&id("n6"), 1).await.unwrap();
        cluster.broadcast(&id("n0"), 2).await.unwrap();

        let converged = cluster.await_convergence(&[1, 2], Duration::from_secs(10)).await;
        assert!(converged.is_ok(), "{kind} did not converge: {converged:?}");

        cluster.shutdown().await.unwrap();
    }
}
