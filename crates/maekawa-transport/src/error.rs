//! Error types for maekawa-transport.

use maekawa_core::NodeId;
use thiserror::Error;

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Errors that can occur while moving messages between nodes.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The peer could not be reached (connect failed, link down, write failed).
    #[error("node {0} is unreachable")]
    Unreachable(NodeId),

    /// No endpoint is configured for this node.
    #[error("no endpoint configured for node {0}")]
    UnknownPeer(NodeId),

    /// A receive callback was already registered.
    #[error("receive handler already registered")]
    HandlerAlreadyRegistered,

    /// Frame length exceeds [`MAX_FRAME_LEN`](crate::MAX_FRAME_LEN).
    #[error("frame of {0} bytes exceeds limit")]
    FrameTooLarge(usize),

    /// Message could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] maekawa_core::Error),

    /// Socket error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The transport has shut down.
    #[error("transport closed")]
    Closed,
}
