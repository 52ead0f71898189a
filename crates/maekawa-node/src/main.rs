//! Maekawa node binary
//!
//! Runs the demo workload on every node of the cluster in this process, or
//! on a single node when `MAEKAWA_NODE_ID` is set.
//!
//! Usage: `maekawa-node [num_nodes] [rounds]`

use anyhow::Context;
use maekawa_node::{Cluster, ClusterConfig};
use std::env;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "maekawa=info,maekawa_node=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Positional args override the environment
    let args: Vec<String> = env::args().collect();
    let mut config = ClusterConfig::from_env()?;
    if let Some(n) = args.get(1) {
        config = config.with_num_nodes(n.parse().with_context(|| format!("invalid num_nodes {:?}", n))?);
    }
    if let Some(r) = args.get(2) {
        config = config.with_rounds(r.parse().with_context(|| format!("invalid rounds {:?}", r))?);
    }
    config.validate()?;

    tracing::info!(
        num_nodes = config.num_nodes,
        rounds = config.rounds,
        base_port = config.base_port,
        node_id = ?config.node_id,
        "Starting Maekawa nodes"
    );

    let cluster = Cluster::spawn(config).await?;
    let report = cluster.run().await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if cluster.is_partial() {
        tracing::info!("Workload done, still voting for peers (Ctrl-C to exit)");
        tokio::signal::ctrl_c().await?;
    }

    if report.violations > 0 {
        anyhow::bail!("mutual exclusion violated {} times", report.violations);
    }
    Ok(())
}
