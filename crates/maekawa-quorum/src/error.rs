//! Error types for quorum construction.

use thiserror::Error;

use crate::NodeId;

/// Result type for quorum operations.
pub type Result<T> = std::result::Result<T, QuorumError>;

/// Errors that can occur while building quorums.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuorumError {
    /// A population needs at least one node.
    #[error("cluster must contain at least one node")]
    EmptyCluster,

    /// The node identity is outside `[0, N)`.
    #[error("node {node} is outside a population of {num_nodes}")]
    NodeOutOfRange { node: NodeId, num_nodes: u32 },

    /// Two quorums share no member (impossible for a correct grid).
    #[error("quorums of node {a} and node {b} are disjoint")]
    Disjoint { a: NodeId, b: NodeId },
}
