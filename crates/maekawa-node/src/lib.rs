//! Maekawa Node - runs mutual-exclusion nodes over a real transport
//!
//! Wraps the `maekawa-core` state machine in a tokio task per node, wires it
//! to a [`Transport`](maekawa_transport::Transport), and exposes the critical
//! section through [`NodeHandle`].
//!
//! # Architecture
//!
//! - **Runtime**: one actor per node; transport deliveries, loopback messages
//!   and local commands share a single queue
//! - **Cluster**: bootstraps the local nodes over TCP or in memory and runs
//!   the think / acquire / hold / release demo workload
//! - **Config**: `ClusterConfig` from environment variables and builders
//!
//! # Example
//!
//! ```no_run
//! use maekawa_node::{Cluster, ClusterConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClusterConfig::from_env()?.with_rounds(5);
//!     let cluster = Cluster::spawn(config).await?;
//!     let report = cluster.run().await?;
//!     println!("{} violations", report.violations);
//!     Ok(())
//! }
//! ```

pub mod cluster;
pub mod config;
pub mod error;
pub mod runtime;

pub use cluster::{Cluster, ClusterReport, OccupancyMonitor};
pub use config::ClusterConfig;
pub use error::{Error, Result};
pub use runtime::{spawn_node, NodeHandle};
