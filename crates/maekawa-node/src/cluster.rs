//! Cluster bootstrap and the demo workload.
//!
//! Every local node runs `rounds` iterations of think, acquire, hold,
//! release. An occupancy monitor shared by all local nodes counts how many
//! are inside the critical section at once and records a violation whenever
//! that exceeds one.

use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::try_join_all;
use maekawa_core::NodeId;
use maekawa_transport::{MemoryNetwork, TcpTransport};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tokio::sync::Barrier;
use tracing::{debug, error, info};

use crate::config::ClusterConfig;
use crate::error::{Error, Result};
use crate::runtime::{spawn_node, NodeHandle};

/// Tracks critical-section occupancy across local nodes.
#[derive(Debug, Default)]
pub struct OccupancyMonitor {
    inside: AtomicUsize,
    max_inside: AtomicUsize,
    violations: AtomicUsize,
}

impl OccupancyMonitor {
    pub fn enter(&self, node: NodeId) {
        let now = self.inside.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_inside.fetch_max(now, Ordering::SeqCst);
        if now > 1 {
            error!(node = %node, occupants = now, "Mutual exclusion violated");
            self.violations.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub fn exit(&self) {
        self.inside.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn violations(&self) -> usize {
        self.violations.load(Ordering::SeqCst)
    }

    pub fn max_inside(&self) -> usize {
        self.max_inside.load(Ordering::SeqCst)
    }
}

/// Outcome of a workload run.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterReport {
    /// Critical-section entries per local node.
    pub entries: BTreeMap<NodeId, u32>,
    /// Entries that found another local node already inside.
    pub violations: usize,
    /// Most local nodes inside at once.
    pub max_concurrent: usize,
    pub elapsed: Duration,
}

/// The nodes hosted by this process.
pub struct Cluster {
    config: ClusterConfig,
    handles: Vec<NodeHandle>,
    monitor: Arc<OccupancyMonitor>,
}

impl Cluster {
    /// Bind a TCP endpoint and start a node for every local identity.
    pub async fn spawn(config: ClusterConfig) -> Result<Self> {
        config.validate()?;

        let mut handles = Vec::new();
        for node in config.local_nodes() {
            let transport = TcpTransport::bind(config.tcp_config(node)?).await?;
            handles.push(spawn_node(config.num_nodes, transport)?);
        }

        Ok(Self::from_handles(config, handles))
    }

    /// Start every node of the population in-process over a [`MemoryNetwork`].
    pub fn in_memory(config: ClusterConfig) -> Result<Self> {
        config.validate()?;

        let network = MemoryNetwork::new(config.num_nodes);
        let handles = config
            .local_nodes()
            .into_iter()
            .map(|node| spawn_node(config.num_nodes, network.endpoint(node)?))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self::from_handles(config, handles))
    }

    fn from_handles(config: ClusterConfig, handles: Vec<NodeHandle>) -> Self {
        info!(
            num_nodes = config.num_nodes,
            local = handles.len(),
            rounds = config.rounds,
            "Cluster started"
        );
        Self {
            config,
            handles,
            monitor: Arc::new(OccupancyMonitor::default()),
        }
    }

    pub fn handles(&self) -> &[NodeHandle] {
        &self.handles
    }

    /// Only part of the population runs here; peers elsewhere may still
    /// need this process's votes after its own workload finishes.
    pub fn is_partial(&self) -> bool {
        self.config.node_id.is_some()
    }

    /// Run the workload on every local node and wait until all finish.
    pub async fn run(&self) -> Result<ClusterReport> {
        let started = Instant::now();
        let barrier = Arc::new(Barrier::new(self.handles.len()));

        let tasks = self.handles.iter().cloned().map(|handle| {
            let workload = Workload {
                handle,
                rounds: self.config.rounds,
                think_time: self.config.think_time.clone(),
                hold_time: self.config.hold_time.clone(),
                monitor: Arc::clone(&self.monitor),
                barrier: Arc::clone(&barrier),
            };
            tokio::spawn(workload.run())
        });

        let finished = try_join_all(tasks).await.map_err(|_| Error::Stopped)?;
        let entries = finished.into_iter().collect::<Result<BTreeMap<_, _>>>()?;

        let report = ClusterReport {
            entries,
            violations: self.monitor.violations(),
            max_concurrent: self.monitor.max_inside(),
            elapsed: started.elapsed(),
        };
        info!(
            violations = report.violations,
            max_concurrent = report.max_concurrent,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Workload finished"
        );
        Ok(report)
    }
}

struct Workload {
    handle: NodeHandle,
    rounds: u32,
    think_time: RangeInclusive<Duration>,
    hold_time: RangeInclusive<Duration>,
    monitor: Arc<OccupancyMonitor>,
    barrier: Arc<Barrier>,
}

impl Workload {
    async fn run(self) -> Result<(NodeId, u32)> {
        let id = self.handle.id();
        let mut rng = StdRng::from_entropy();
        let mut entries = 0;

        for round in 1..=self.rounds {
            tokio::time::sleep(rng.gen_range(self.think_time.clone())).await;

            let hold = rng.gen_range(self.hold_time.clone());
            let monitor = Arc::clone(&self.monitor);
            debug!(node = %id, round, "Requesting critical section");
            self.handle
                .critical_section(move || async move {
                    monitor.enter(id);
                    info!(node = %id, round, hold_ms = hold.as_millis() as u64, "Holding critical section");
                    tokio::time::sleep(hold).await;
                    monitor.exit();
                })
                .await?;
            entries += 1;
        }

        if self.barrier.wait().await.is_leader() {
            info!("All local nodes finished");
        }
        Ok((id, entries))
    }
}
