//! Cluster configuration.

use std::net::{IpAddr, Ipv4Addr};
use std::ops::RangeInclusive;
use std::str::FromStr;
use std::time::Duration;

use maekawa_core::NodeId;
use maekawa_transport::TcpConfig;

use crate::error::{Error, Result};

/// Configuration for a cluster of nodes and the demo workload they run.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Population size N
    pub num_nodes: u32,

    /// Host every endpoint lives on
    pub host: IpAddr,

    /// Node `i` listens on `base_port + i`
    pub base_port: u16,

    /// Critical-section entries per node
    pub rounds: u32,

    /// Pause before each request
    pub think_time: RangeInclusive<Duration>,

    /// Time spent inside the critical section
    pub hold_time: RangeInclusive<Duration>,

    /// Connection attempts per send
    pub connect_attempts: u32,

    /// Pause between connection attempts
    pub connect_backoff: Duration,

    /// Run only this node (one process per node); all nodes when unset
    pub node_id: Option<NodeId>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            num_nodes: 4,
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            base_port: 7000,
            rounds: 3,
            think_time: Duration::from_secs(2)..=Duration::from_secs(8),
            hold_time: Duration::from_millis(500)..=Duration::from_millis(1500),
            connect_attempts: 50,
            connect_backoff: Duration::from_millis(100),
            node_id: None,
        }
    }
}

impl ClusterConfig {
    /// Defaults overridden by `MAEKAWA_NUM_NODES`, `MAEKAWA_HOST`,
    /// `MAEKAWA_BASE_PORT`, `MAEKAWA_ROUNDS` and `MAEKAWA_NODE_ID`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(n) = parse_var(&lookup, "MAEKAWA_NUM_NODES")? {
            config.num_nodes = n;
        }
        if let Some(host) = parse_var(&lookup, "MAEKAWA_HOST")? {
            config.host = host;
        }
        if let Some(port) = parse_var(&lookup, "MAEKAWA_BASE_PORT")? {
            config.base_port = port;
        }
        if let Some(rounds) = parse_var(&lookup, "MAEKAWA_ROUNDS")? {
            config.rounds = rounds;
        }
        if let Some(id) = parse_var(&lookup, "MAEKAWA_NODE_ID")? {
            config.node_id = Some(NodeId(id));
        }

        Ok(config)
    }

    #[must_use]
    pub fn with_num_nodes(mut self, num_nodes: u32) -> Self {
        self.num_nodes = num_nodes;
        self
    }

    #[must_use]
    pub fn with_rounds(mut self, rounds: u32) -> Self {
        self.rounds = rounds;
        self
    }

    #[must_use]
    pub fn with_host(mut self, host: IpAddr) -> Self {
        self.host = host;
        self
    }

    #[must_use]
    pub fn with_base_port(mut self, base_port: u16) -> Self {
        self.base_port = base_port;
        self
    }

    /// Run a single node of the population in this process.
    #[must_use]
    pub fn with_node_id(mut self, node: NodeId) -> Self {
        self.node_id = Some(node);
        self
    }

    #[must_use]
    pub fn with_think_time(mut self, range: RangeInclusive<Duration>) -> Self {
        self.think_time = range;
        self
    }

    #[must_use]
    pub fn with_hold_time(mut self, range: RangeInclusive<Duration>) -> Self {
        self.hold_time = range;
        self
    }

    #[must_use]
    pub fn with_connect_retry(mut self, attempts: u32, backoff: Duration) -> Self {
        self.connect_attempts = attempts;
        self.connect_backoff = backoff;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_nodes == 0 {
            return Err(Error::Config("num_nodes must be at least 1".into()));
        }
        if let Some(node) = self.node_id {
            if node.0 >= self.num_nodes {
                return Err(Error::Config(format!(
                    "node_id {} out of range for {} nodes",
                    node, self.num_nodes
                )));
            }
        }
        let last_port = u16::try_from(self.num_nodes - 1)
            .ok()
            .and_then(|offset| self.base_port.checked_add(offset));
        if last_port.is_none() {
            return Err(Error::Config(format!(
                "{} nodes do not fit above base port {}",
                self.num_nodes, self.base_port
            )));
        }
        if self.think_time.is_empty() || self.hold_time.is_empty() {
            return Err(Error::Config("think and hold ranges must not be inverted".into()));
        }
        Ok(())
    }

    /// Nodes hosted by this process.
    pub fn local_nodes(&self) -> Vec<NodeId> {
        match self.node_id {
            Some(node) => vec![node],
            None => (0..self.num_nodes).map(NodeId).collect(),
        }
    }

    /// TCP endpoints for `node`.
    pub fn tcp_config(&self, node: NodeId) -> Result<TcpConfig> {
        Ok(TcpConfig::for_cluster(node, self.host, self.base_port, self.num_nodes)?
            .with_connect_retry(self.connect_attempts, self.connect_backoff))
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    raw.trim()
        .parse()
        .map(Some)
        .map_err(|e| Error::Config(format!("{}={:?}: {}", key, raw, e)))
}
