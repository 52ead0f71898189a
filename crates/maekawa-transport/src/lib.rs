//! Maekawa Transport - point-to-point message delivery between nodes
//!
//! The state machine in `maekawa-core` only needs two things from the
//! network: `send(to, message)` and a receive callback registered once at
//! startup. Delivery must be in order and duplicate-free per sender →
//! receiver pair. This crate provides two implementations:
//!
//! - [`TcpTransport`]: one listener per node at `host:(base_port + id)`,
//!   one lazily opened, cached TCP stream per peer, length-delimited JSON frames
//! - [`MemoryNetwork`]: in-process endpoints for tests and simulations, with
//!   switchable links to exercise send failures
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use maekawa_transport::{TcpConfig, TcpTransport, Transport};
//!
//! let config = TcpConfig::localhost(NodeId(0), 4, 7000)?;
//! let transport = TcpTransport::bind(config).await?;
//! transport.on_receive(Arc::new(|delivery| println!("{}", delivery.message)))?;
//! transport.send(NodeId(1), message).await?;
//! ```

pub mod codec;
pub mod error;
pub mod memory;
pub mod tcp;

use std::future::Future;
use std::sync::Arc;

use maekawa_core::{Message, NodeId};

pub use codec::{MessageCodec, MAX_FRAME_LEN};
pub use error::{Result, TransportError};
pub use memory::{MemoryNetwork, MemoryTransport};
pub use tcp::{TcpConfig, TcpTransport};

/// A message handed up by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub from: NodeId,
    pub message: Message,
}

/// Receive callback, registered once per node.
pub type Handler = Arc<dyn Fn(Delivery) + Send + Sync>;

/// What a node needs from the network.
pub trait Transport: Send + Sync + 'static {
    /// Identity this endpoint sends as.
    fn local_node(&self) -> NodeId;

    /// Register the receive callback. Fails if one is already registered.
    fn on_receive(&self, handler: Handler) -> Result<()>;

    /// Deliver `message` to `to`, preserving order relative to earlier sends
    /// to the same node.
    fn send(&self, to: NodeId, message: Message) -> impl Future<Output = Result<()>> + Send;
}
