//! Protocol messages and their JSON encoding.
//!
//! Every message has the same shape: kind, sender and the sender's Lamport
//! timestamp at the moment of transmission. On the wire a message is a JSON
//! object:
//!
//! ```text
//! {"kind":"REQUEST","sender":3,"timestamp":17}
//! ```
//!
//! Framing is the transport's concern.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::clock::Timestamp;
use crate::error::Result;
use crate::NodeId;

/// The six message kinds of the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageKind {
    /// Requester → each quorum member: asks for the member's vote.
    Request,
    /// Voter → requester: "you hold my vote now".
    Grant,
    /// Voter → requester: vote is held by a higher-priority request.
    Failed,
    /// Voter → current vote holder: asks it to hand the vote back.
    Inquire,
    /// Vote holder → voter: returns a vote it had not yet used.
    Yield,
    /// Requester → each quorum member: critical section is done.
    Release,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Request => "REQUEST",
            Self::Grant => "GRANT",
            Self::Failed => "FAILED",
            Self::Inquire => "INQUIRE",
            Self::Yield => "YIELD",
            Self::Release => "RELEASE",
        };
        f.write_str(name)
    }
}

/// An immutable protocol message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Message {
    kind: MessageKind,
    sender: NodeId,
    timestamp: Timestamp,
}

impl Message {
    pub const fn new(kind: MessageKind, sender: NodeId, timestamp: Timestamp) -> Self {
        Self {
            kind,
            sender,
            timestamp,
        }
    }

    pub const fn kind(&self) -> MessageKind {
        self.kind
    }

    pub const fn sender(&self) -> NodeId {
        self.sender
    }

    pub const fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Priority of the request this message carries.
    ///
    /// Only meaningful for REQUEST, whose timestamp is the request's.
    pub const fn stamp(&self) -> RequestStamp {
        RequestStamp::new(self.timestamp, self.sender)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(ts={}, from={})", self.kind, self.timestamp, self.sender)
    }
}

/// A message addressed to one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Envelope {
    pub to: NodeId,
    pub message: Message,
}

impl Envelope {
    pub const fn new(to: NodeId, message: Message) -> Self {
        Self { to, message }
    }
}

/// Priority of a request: lower `(timestamp, node)` wins.
///
/// Field order matters: the derived `Ord` compares timestamp first and
/// breaks ties by node identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RequestStamp {
    pub timestamp: Timestamp,
    pub node: NodeId,
}

impl RequestStamp {
    pub const fn new(timestamp: Timestamp, node: NodeId) -> Self {
        Self { timestamp, node }
    }

    /// True if `self` must be served before `other`.
    pub fn precedes(&self, other: &RequestStamp) -> bool {
        self < other
    }
}

impl fmt::Display for RequestStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.timestamp, self.node)
    }
}

/// Serialize a message to its JSON wire form.
pub fn encode(message: &Message) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(message)?)
}

/// Parse a message from its JSON wire form.
///
/// Unknown kinds and malformed documents are rejected with
/// [`Error::InvalidMessage`](crate::Error::InvalidMessage).
pub fn decode(bytes: &[u8]) -> Result<Message> {
    Ok(serde_json::from_slice(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use proptest::prelude::*;

    #[test]
    fn wire_format_uses_upper_case_kinds() {
        let msg = Message::new(MessageKind::Inquire, NodeId(3), 17);
        let json = String::from_utf8(encode(&msg).unwrap()).unwrap();
        assert_eq!(json, r#"{"kind":"INQUIRE","sender":3,"timestamp":17}"#);
        assert_eq!(decode(json.as_bytes()).unwrap(), msg);
    }

    #[test]
    fn unknown_kind_rejected() {
        let err = decode(br#"{"kind":"ELECT","sender":1,"timestamp":2}"#).unwrap_err();
        assert!(matches!(err, Error::InvalidMessage(_)));
    }

    #[test]
    fn malformed_rejected() {
        assert!(decode(b"{\"kind\":\"GRANT\",").is_err());
        assert!(decode(br#"{"kind":"GRANT","sender":-1,"timestamp":2}"#).is_err());
        assert!(decode(br#"{"kind":"GRANT","timestamp":2}"#).is_err());
    }

    #[test]
    fn lower_timestamp_wins() {
        let a = RequestStamp::new(5, NodeId(0));
        let b = RequestStamp::new(3, NodeId(9));
        assert!(b.precedes(&a));
        assert!(!a.precedes(&b));
    }

    #[test]
    fn ties_broken_by_lower_identity() {
        let a = RequestStamp::new(4, NodeId(1));
        let b = RequestStamp::new(4, NodeId(2));
        assert!(a.precedes(&b));
    }

    proptest! {
        #[test]
        fn distinct_requests_have_exactly_one_winner(
            t1 in 0u64..50, id1 in 0u32..8, t2 in 0u64..50, id2 in 0u32..8
        ) {
            let a = RequestStamp::new(t1, NodeId(id1));
            let b = RequestStamp::new(t2, NodeId(id2));
            prop_assume!(a != b);
            prop_assert!(a.precedes(&b) ^ b.precedes(&a));
            let expected = if t1 != t2 { t1 < t2 } else { id1 < id2 };
            prop_assert_eq!(a.precedes(&b), expected);
        }
    }
}
