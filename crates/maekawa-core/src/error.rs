//! Error types for maekawa-core.

use thiserror::Error;

use crate::message::MessageKind;
use crate::node::Phase;
use crate::NodeId;

/// Result type for maekawa-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the state machine and the message codec.
///
/// A message rejected with one of these leaves the node's state untouched.
#[derive(Debug, Error)]
pub enum Error {
    /// The quorum could not be built for this node.
    #[error("quorum error: {0}")]
    Quorum(#[from] maekawa_quorum::QuorumError),

    /// Sender identity is outside the population.
    #[error("message from unknown node {sender} (population of {num_nodes})")]
    UnknownSender { sender: NodeId, num_nodes: u32 },

    /// Sender is not in this node's quorum, so it has no protocol role here.
    #[error("node {sender} is not a quorum peer of node {node}")]
    NotInQuorum { node: NodeId, sender: NodeId },

    /// A local event arrived in a phase that does not allow it.
    #[error("invalid node state: expected {expected}, got {actual}")]
    InvalidState { expected: Phase, actual: Phase },

    /// A requester-role message arrived in a phase where it cannot be valid.
    #[error("unexpected {kind} from node {sender} while {phase}")]
    UnexpectedMessage {
        kind: MessageKind,
        sender: NodeId,
        phase: Phase,
    },

    /// Message bytes could not be encoded or decoded.
    #[error("invalid message: {0}")]
    InvalidMessage(#[from] serde_json::Error),
}
