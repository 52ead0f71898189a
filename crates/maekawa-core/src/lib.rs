//! Maekawa Mutual Exclusion
//!
//! Quorum-based distributed mutual exclusion. A node enters the critical
//! section once every member of its grid quorum has voted for it; since any
//! two quorums intersect and each member holds a single vote, two nodes can
//! never collect full quorums at the same time.
//!
//! # Components
//!
//! - [`LamportClock`]: logical time, ticked on every send and advanced past
//!   every received timestamp.
//! - [`Message`]: the six protocol messages (REQUEST, GRANT, FAILED, INQUIRE,
//!   YIELD, RELEASE), each carrying only sender and timestamp.
//! - [`Node`]: the per-node state machine. It plays voter for its quorum
//!   peers and requester for its own critical section at the same time.
//! - [`simulation::Simulation`]: deterministic in-process driver used to
//!   check mutual exclusion and liveness under arbitrary interleavings.
//!
//! # Priority
//!
//! Requests are totally ordered by `(timestamp, node)` ascending
//! ([`RequestStamp`]). Every GRANT, FAILED, INQUIRE and queue decision uses
//! that single comparator.
//!
//! # Example
//!
//! ```
//! use maekawa_core::{Node, NodeId};
//!
//! let mut node = Node::new(NodeId(0), 1).unwrap();
//! let step = node.request_critical_section().unwrap();
//!
//! // A single node is its own quorum: deliver the REQUEST and GRANT to itself.
//! let request = step.outbox[0].message;
//! let grant = node.handle(request).unwrap().outbox[0].message;
//! assert!(node.handle(grant).unwrap().entered_critical_section);
//! ```

mod clock;
mod error;
mod message;
mod node;
mod requester;
pub mod simulation;
mod voter;

pub use clock::{LamportClock, Timestamp};
pub use error::{Error, Result};
pub use message::{decode, encode, Envelope, Message, MessageKind, RequestStamp};
pub use node::{Node, NodeStatus, Phase, Step};

pub use maekawa_quorum::{build_quorum, NodeId, Quorum, QuorumError};
