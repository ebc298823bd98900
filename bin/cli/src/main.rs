//! gossipcast CLI
//!
//! Runs the gossipcast workloads on an in-process simulated cluster and
//! reports whether they behaved.
//!
//! # Commands
//!
//! - `broadcast` - Gossip values through a lossy topology until every node has them
//! - `counter` - Concurrent adds against a shared `seq-kv` counter
//! - `ids` - Generate IDs across nodes and check uniqueness
//!
//! # Usage
//!
//! ```bash
//! gossipcast broadcast --nodes 25 --topology grid --values 100 --loss 0.2
//! gossipcast counter --nodes 3 --adds 500
//! gossipcast ids --nodes 5 --count 10000
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use gossipcast_broadcast::GossipConfig;
use gossipcast_simulator::{
    run_counter_workload, run_ids_workload, BroadcastCluster, CounterWorkload, IdsWorkload,
    LinkConfig, SimulatorError, TopologyKind,
};
use std::time::{Duration, Instant};
use tracing::info;

/// gossipcast - run gossip workloads on a simulated cluster
#[derive(Parser, Debug)]
#[command(name = "gossipcast")]
#[command(version, about = "Gossip broadcast workloads on a simulated network", long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Broadcast values and wait until every node has delivered them
    Broadcast {
        /// Number of nodes
        #[arg(short, long, default_value = "5")]
        nodes: usize,

        /// Topology: mesh, ring, star, tree[:n] or grid[:n]
        #[arg(short, long, default_value = "grid")]
        topology: TopologyKind,

        /// Children per node for a tree topology
        #[arg(long)]
        branching: Option<usize>,

        /// Nodes per row for a grid topology
        #[arg(long)]
        width: Option<usize>,

        /// Number of values to broadcast, injected round-robin
        #[arg(long, default_value = "20")]
        values: usize,

        /// Probability that a node-to-node message is lost
        #[arg(long, default_value = "0.0", value_parser = parse_probability)]
        loss: f64,

        /// One-way link latency in milliseconds
        #[arg(long, default_value = "5")]
        latency_ms: u64,

        /// Seed for the network's randomness
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Give up waiting for convergence after this many seconds
        #[arg(long, default_value = "30")]
        timeout_secs: u64,
    },

    /// Add to a shared counter from every node and verify the total
    Counter {
        /// Number of counter nodes
        #[arg(short, long, default_value = "3")]
        nodes: usize,

        /// Total number of add requests
        #[arg(long, default_value = "100")]
        adds: usize,

        /// Seed for the deltas and the network
        #[arg(long, default_value = "42")]
        seed: u64,
    },

    /// Generate IDs across nodes and verify they are unique
    Ids {
        /// Number of nodes
        #[arg(short, long, default_value = "3")]
        nodes: usize,

        /// Total number of IDs to generate
        #[arg(short, long, default_value = "1000")]
        count: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.verbose)?;

    match args.command {
        Commands::Broadcast {
            nodes,
            topology,
            branching,
            width,
            values,
            loss,
            latency_ms,
            seed,
            timeout_secs,
        } => {
            let mut topology = topology;
            if let Some(branching) = branching {
                topology = topology.with_branching(branching);
            }
            if let Some(width) = width {
                topology = topology.with_width(width);
            }
            let link = LinkConfig::lossy(loss).with_latency(latency_ms, latency_ms / 2);

            run_broadcast(
                nodes,
                topology,
                link,
                values,
                seed,
                Duration::from_secs(timeout_secs),
            )
            .await
        }
        Commands::Counter { nodes, adds, seed } => run_counter(nodes, adds, seed).await,
        Commands::Ids { nodes, count } => run_ids(nodes, count).await,
    }
}

fn parse_probability(s: &str) -> Result<f64, String> {
    let value: f64 = s.parse().map_err(|_| format!("{s:?} is not a number"))?;
    if !(0.0..=1.0).contains(&value) {
        return Err(format!("{value} is not between 0 and 1"));
    }
    Ok(value)
}

async fn run_broadcast(
    nodes: usize,
    topology: TopologyKind,
    link: LinkConfig,
    values: usize,
    seed: u64,
    timeout: Duration,
) -> Result<()> {
    println!("Broadcast: {nodes} nodes, {topology} topology, {values} values");
    println!(
        "  Links: {}ms latency, {:.0}% loss",
        link.latency_ms,
        link.packet_loss_rate * 100.0
    );

    let cluster = BroadcastCluster::builder()
        .nodes(nodes)
        .topology(topology)
        .link(link)
        .seed(seed)
        .gossip(GossipConfig::default())
        .build()
        .await
        .context("failed to start cluster")?;

    let node_ids = cluster.node_ids();
    let expected: Vec<i64> = (0..values as i64).collect();
    let start = Instant::now();
    for (i, value) in expected.iter().enumerate() {
        let node = &node_ids[i % node_ids.len()];
        cluster
            .broadcast(node, *value)
            .await
            .with_context(|| format!("broadcast of {value} via {node} failed"))?;
    }

    let outcome = cluster.await_convergence(&expected, timeout).await;
    let elapsed = start.elapsed();
    let network = cluster.network_stats();
    let gossip = cluster.gossip_stats();
    cluster.shutdown().await.context("failed to stop cluster")?;

    match outcome {
        Ok(_) => {
            println!("✓ Converged in {:.2?}", elapsed);
            println!(
                "  Messages: {} sent, {} dropped, {:.1} per value",
                network.sent,
                network.dropped,
                network.sent as f64 / values.max(1) as f64
            );
            println!(
                "  Gossip RPCs: {} sent, {} failed",
                gossip.rpcs_sent, gossip.rpcs_failed
            );
            info!(elapsed_ms = elapsed.as_millis() as u64, "broadcast run complete");
            Ok(())
        }
        Err(SimulatorError::ConvergenceTimeout { lagging, after }) => {
            bail!("no convergence after {after:?}; {} nodes lagging: {lagging:?}", lagging.len())
        }
        Err(e) => Err(e.into()),
    }
}

async fn run_counter(nodes: usize, adds: usize, seed: u64) -> Result<()> {
    println!("Counter: {nodes} nodes, {adds} adds");

    let report = run_counter_workload(CounterWorkload {
        nodes,
        adds,
        seed,
        ..CounterWorkload::default()
    })
    .await
    .context("counter workload failed")?;

    for (node, value) in &report.observed {
        println!("  {node}: {value}");
    }

    if !report.is_consistent() {
        bail!(
            "counter mismatch: expected {} on every node ({} adds failed)",
            report.expected,
            report.failed_adds
        );
    }

    println!("✓ Every node reads {} ({:.2?})", report.expected, report.elapsed);
    Ok(())
}

async fn run_ids(nodes: usize, count: usize) -> Result<()> {
    println!("IDs: {nodes} nodes, {count} requests");

    let report = run_ids_workload(IdsWorkload {
        nodes,
        count,
        ..IdsWorkload::default()
    })
    .await
    .context("ids workload failed")?;

    if !report.is_unique() {
        bail!(
            "{} of {} IDs were duplicates ({} requests failed)",
            report.generated - report.unique,
            report.generated,
            report.failed
        );
    }

    println!("✓ {} unique IDs ({:.2?})", report.unique, report.elapsed);
    Ok(())
}

/// Initialize logging
fn init_logging(verbose: bool) -> Result<()> {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("trace")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_broadcast_defaults() {
        let args = Args::try_parse_from(["gossipcast", "broadcast"]).expect("should parse");
        match args.command {
            Commands::Broadcast {
                nodes,
                topology,
                values,
                loss,
                ..
            } => {
                assert_eq!(nodes, 5);
                assert_eq!(topology, TopologyKind::Grid { width: 0 });
                assert_eq!(values, 20);
                assert_eq!(loss, 0.0);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_broadcast_tree() {
        let args = Args::try_parse_from([
            "gossipcast",
            "broadcast",
            "--topology",
            "tree:4",
            "--loss",
            "0.25",
            "--seed",
            "7",
        ])
        .expect("should parse");
        match args.command {
            Commands::Broadcast {
                topology,
                loss,
                seed,
                ..
            } => {
                assert_eq!(topology, TopologyKind::Tree { branching: 4 });
                assert_eq!(loss, 0.25);
                assert_eq!(seed, 7);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_rejects_bad_loss_and_topology() {
        assert!(Args::try_parse_from(["gossipcast", "broadcast", "--loss", "1.5"]).is_err());
        assert!(Args::try_parse_from(["gossipcast", "broadcast", "--topology", "torus"]).is_err());
    }

    #[test]
    fn test_parse_counter_and_ids() {
        let args = Args::try_parse_from(["gossipcast", "-v", "counter", "--adds", "10"])
            .expect("should parse");
        assert!(args.verbose);
        assert!(matches!(args.command, Commands::Counter { adds: 10, .. }));

        let args = Args::try_parse_from(["gossipcast", "ids", "-n", "2", "-c", "50"])
            .expect("should parse");
        assert!(matches!(args.command, Commands::Ids { nodes: 2, count: 50 }));
    }

    #[test]
    fn test_parse_probability() {
        assert_eq!(parse_probability("0.5"), Ok(0.5));
        assert!(parse_probability("-0.1").is_err());
        assert!(parse_probability("lots").is_err());
    }
}
