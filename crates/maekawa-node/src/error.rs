//! Error types for the node runtime.

use thiserror::Error;

/// Result type for node operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running nodes.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Rejected by the state machine (wrong phase, bad peer)
    #[error("Protocol error: {0}")]
    Protocol(#[from] maekawa_core::Error),

    /// Transport error
    #[error("Transport error: {0}")]
    Transport(#[from] maekawa_transport::TransportError),

    /// The node task has exited
    #[error("Node stopped")]
    Stopped,
}
