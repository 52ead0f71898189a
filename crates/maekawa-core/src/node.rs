//! Per-node state machine.
//!
//! A [`Node`] is driven by three kinds of events, always one at a time:
//!
//! 1. [`request_critical_section`](Node::request_critical_section): Idle → Requesting,
//!    multicast REQUEST to the quorum.
//! 2. [`handle`](Node::handle): a protocol message from a quorum peer.
//! 3. [`exit_critical_section`](Node::exit_critical_section): InCriticalSection → Idle,
//!    multicast RELEASE to the quorum.
//!
//! Each event returns a [`Step`]: the messages to transmit and whether the
//! node just entered the critical section. The node never performs I/O.
//!
//! The node is a member of its own quorum, so some envelopes are addressed to
//! itself; the driver must feed those back through [`handle`](Node::handle)
//! like any other message.

use serde::Serialize;
use tracing::{debug, trace};

use crate::clock::{LamportClock, Timestamp};
use crate::error::{Error, Result};
use crate::message::{Envelope, Message, MessageKind, RequestStamp};
use crate::requester::{Inquiry, Requester};
use crate::voter::{Reply, Voter};
use crate::{build_quorum, NodeId, Quorum};

pub use crate::requester::Phase;

/// Effects of one event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Step {
    /// Messages to transmit, in order.
    pub outbox: Vec<Envelope>,
    /// The node entered the critical section during this event.
    pub entered_critical_section: bool,
}

impl Step {
    fn push(&mut self, to: NodeId, message: Message) {
        self.outbox.push(Envelope::new(to, message));
    }
}

/// Point-in-time view of a node's protocol state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeStatus {
    pub id: NodeId,
    pub phase: Phase,
    pub clock: Timestamp,
    pub own_request: Option<RequestStamp>,
    pub grants: Vec<NodeId>,
    pub failed: Vec<NodeId>,
    pub yielded: bool,
    pub deferred_inquiries: Vec<NodeId>,
    pub voted_for: Option<RequestStamp>,
    pub inquired: bool,
    pub queued: usize,
    pub quorum: Vec<NodeId>,
}

/// The Maekawa mutual-exclusion state machine of one node.
#[derive(Debug)]
pub struct Node {
    id: NodeId,
    num_nodes: u32,
    quorum: Quorum,
    clock: LamportClock,
    voter: Voter,
    requester: Requester,
}

impl Node {
    /// Create node `id` in a population of `num_nodes`, with a clean state.
    pub fn new(id: NodeId, num_nodes: u32) -> Result<Self> {
        let quorum = build_quorum(id, num_nodes)?;
        debug!(node = %id, quorum = ?quorum.members(), "Created node");

        Ok(Self {
            id,
            num_nodes,
            quorum,
            clock: LamportClock::new(),
            voter: Voter::default(),
            requester: Requester::default(),
        })
    }

    pub const fn id(&self) -> NodeId {
        self.id
    }

    pub fn quorum(&self) -> &Quorum {
        &self.quorum
    }

    pub fn phase(&self) -> Phase {
        self.requester.phase()
    }

    pub fn in_critical_section(&self) -> bool {
        self.phase() == Phase::InCriticalSection
    }

    /// Current Lamport time.
    pub fn clock(&self) -> Timestamp {
        self.clock.now()
    }

    pub fn status(&self) -> NodeStatus {
        NodeStatus {
            id: self.id,
            phase: self.phase(),
            clock: self.clock.now(),
            own_request: self.requester.own_request(),
            grants: self.requester.grants().iter().copied().collect(),
            failed: self.requester.failed().iter().copied().collect(),
            yielded: self.requester.has_yielded(),
            deferred_inquiries: self.requester.deferred().iter().copied().collect(),
            voted_for: self.voter.voted_for(),
            inquired: self.voter.is_inquired(),
            queued: self.voter.queued(),
            quorum: self.quorum.iter().collect(),
        }
    }

    /// Local want-CS event: stamp a new request and send it to the quorum.
    pub fn request_critical_section(&mut self) -> Result<Step> {
        self.expect_phase(Phase::Idle)?;

        let mut step = Step::default();
        let ts = self.multicast(&mut step, MessageKind::Request);
        self.requester.begin(RequestStamp::new(ts, self.id));

        debug!(node = %self.id, ts, quorum_size = self.quorum.len(), "Requesting critical section");
        Ok(step)
    }

    /// Local CS-exit event: release every vote held.
    pub fn exit_critical_section(&mut self) -> Result<Step> {
        self.expect_phase(Phase::InCriticalSection)?;

        let mut step = Step::default();
        let ts = self.multicast(&mut step, MessageKind::Release);
        let request = self.requester.finish();

        debug!(node = %self.id, ts, request = ?request, "Released critical section");
        Ok(step)
    }

    /// Apply one received message.
    ///
    /// Protocol violations are returned as errors and leave the state
    /// (including the clock) untouched.
    pub fn handle(&mut self, message: Message) -> Result<Step> {
        self.validate(&message)?;

        let from = message.sender();
        let kind = message.kind();
        let now = self.clock.observe(message.timestamp());
        trace!(node = %self.id, from = %from, kind = %kind, ts = message.timestamp(), clock = now, "Received message");

        let mut step = Step::default();
        match kind {
            MessageKind::Request => {
                let reply = self.voter.on_request(message.stamp());
                self.reply(&mut step, reply);
            }
            MessageKind::Yield => match self.voter.on_yield(from) {
                Some(reply) => self.reply(&mut step, reply),
                None => debug!(node = %self.id, from = %from, "Ignoring YIELD for a vote it does not hold"),
            },
            MessageKind::Release => {
                let reply = self.voter.on_release(from);
                self.reply(&mut step, reply);
            }
            MessageKind::Grant => {
                if self.requester.on_grant(from, &self.quorum) {
                    step.entered_critical_section = true;
                    debug!(node = %self.id, request = ?self.requester.own_request(), "Entered critical section");
                }
            }
            MessageKind::Failed => self.requester.on_failed(from),
            MessageKind::Inquire => match self.requester.on_inquire(from) {
                Inquiry::Yield => {
                    debug!(node = %self.id, to = %from, "Yielding vote");
                    self.send(&mut step, from, MessageKind::Yield);
                }
                Inquiry::Deferred => {
                    debug!(node = %self.id, from = %from, "Deferring INQUIRE until release")
                }
                Inquiry::Stale => {
                    debug!(node = %self.id, from = %from, "Ignoring INQUIRE for a vote no longer held")
                }
            },
        }
        Ok(step)
    }

    /// Reject messages that cannot belong to this node's protocol run.
    fn validate(&self, message: &Message) -> Result<()> {
        let sender = message.sender();
        if sender.0 >= self.num_nodes {
            return Err(Error::UnknownSender {
                sender,
                num_nodes: self.num_nodes,
            });
        }
        // Grid quorums are symmetric: every protocol peer is a quorum member.
        if !self.quorum.contains(sender) {
            return Err(Error::NotInQuorum {
                node: self.id,
                sender,
            });
        }
        // Votes and refusals only answer an outstanding request.
        let kind = message.kind();
        let phase = self.phase();
        if matches!(kind, MessageKind::Grant | MessageKind::Failed) && phase != Phase::Requesting {
            return Err(Error::UnexpectedMessage {
                kind,
                sender,
                phase,
            });
        }
        Ok(())
    }

    fn expect_phase(&self, expected: Phase) -> Result<()> {
        let actual = self.phase();
        if actual != expected {
            return Err(Error::InvalidState { expected, actual });
        }
        Ok(())
    }

    fn reply(&mut self, step: &mut Step, reply: Reply) {
        let (to, kind) = match reply {
            Reply::Grant(to) => (to, MessageKind::Grant),
            Reply::Failed(to) => (to, MessageKind::Failed),
            Reply::Inquire(to) => (to, MessageKind::Inquire),
            Reply::Nothing => return,
        };
        debug!(node = %self.id, to = %to, kind = %kind, voted_for = ?self.voter.voted_for(), "Voter reply");
        self.send(step, to, kind);
    }

    fn send(&mut self, step: &mut Step, to: NodeId, kind: MessageKind) {
        let ts = self.clock.tick();
        step.push(to, Message::new(kind, self.id, ts));
    }

    /// One send event: every quorum member gets the same stamp.
    fn multicast(&mut self, step: &mut Step, kind: MessageKind) -> Timestamp {
        let ts = self.clock.tick();
        let message = Message::new(kind, self.id, ts);
        for member in self.quorum.iter() {
            step.push(member, message);
        }
        ts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: u32, n: u32) -> Node {
        Node::new(NodeId(id), n).unwrap()
    }

    fn only(step: &Step) -> Envelope {
        assert_eq!(step.outbox.len(), 1, "expected one message, got {:?}", step.outbox);
        step.outbox[0]
    }

    fn request(from: u32, ts: Timestamp) -> Message {
        Message::new(MessageKind::Request, NodeId(from), ts)
    }

    #[test]
    fn request_multicasts_to_quorum_with_one_stamp() {
        let mut n0 = node(0, 4);
        let step = n0.request_critical_section().unwrap();

        let targets: Vec<_> = step.outbox.iter().map(|e| e.to).collect();
        assert_eq!(targets, vec![NodeId(0), NodeId(1), NodeId(2)]);
        assert!(step
            .outbox
            .iter()
            .all(|e| e.message == Message::new(MessageKind::Request, NodeId(0), 1)));
        assert_eq!(n0.phase(), Phase::Requesting);
        assert_eq!(n0.status().own_request, Some(RequestStamp::new(1, NodeId(0))));
    }

    #[test]
    fn second_request_while_outstanding_rejected() {
        let mut n0 = node(0, 4);
        n0.request_critical_section().unwrap();
        assert!(matches!(
            n0.request_critical_section(),
            Err(Error::InvalidState {
                expected: Phase::Idle,
                actual: Phase::Requesting
            })
        ));
    }

    #[test]
    fn exit_without_entering_rejected() {
        let mut n0 = node(0, 4);
        assert!(matches!(n0.exit_critical_section(), Err(Error::InvalidState { .. })));
    }

    #[test]
    fn contention_lower_timestamp_wins_the_vote() {
        // Node 0 votes for 1 and 2. B = node 2 at ts 3, A = node 1 at ts 5.
        let mut voter = node(0, 4);

        let grant = only(&voter.handle(request(2, 3)).unwrap());
        assert_eq!(grant.to, NodeId(2));
        assert_eq!(grant.message.kind(), MessageKind::Grant);

        let failed = only(&voter.handle(request(1, 5)).unwrap());
        assert_eq!(failed.to, NodeId(1));
        assert_eq!(failed.message.kind(), MessageKind::Failed);
        assert_eq!(voter.status().queued, 1);

        // B releases; A is next in line.
        let release = Message::new(MessageKind::Release, NodeId(2), 20);
        let next = only(&voter.handle(release).unwrap());
        assert_eq!((next.to, next.message.kind()), (NodeId(1), MessageKind::Grant));
    }

    #[test]
    fn contention_late_higher_priority_request_inquires_holder() {
        let mut voter = node(0, 4);
        voter.handle(request(1, 5)).unwrap();

        let inquire = only(&voter.handle(request(2, 3)).unwrap());
        assert_eq!((inquire.to, inquire.message.kind()), (NodeId(1), MessageKind::Inquire));
        assert_eq!(voter.status().voted_for, Some(RequestStamp::new(5, NodeId(1))));
    }

    #[test]
    fn yield_chain_moves_vote_to_higher_priority() {
        // X = node 0. A = node 2 requests (1, 2); B = node 1 requests (1, 1).
        let mut x = node(0, 4);
        let mut a = node(2, 4);
        let mut b = node(1, 4);

        let a_req = a.request_critical_section().unwrap().outbox[0].message;
        let b_req = b.request_critical_section().unwrap().outbox[0].message;
        assert!(b_req.stamp().precedes(&a_req.stamp()));

        let grant = only(&x.handle(a_req).unwrap());
        assert_eq!(grant.to, NodeId(2));
        let step = a.handle(grant.message).unwrap();
        assert!(!step.entered_critical_section);

        let inquire = only(&x.handle(b_req).unwrap());
        assert_eq!((inquire.to, inquire.message.kind()), (NodeId(2), MessageKind::Inquire));

        // A is still waiting on nodes 2 and 3, so it hands the vote back.
        let yielded = only(&a.handle(inquire.message).unwrap());
        assert_eq!((yielded.to, yielded.message.kind()), (NodeId(0), MessageKind::Yield));
        assert!(a.status().yielded);
        assert!(a.status().grants.is_empty());

        let regrant = only(&x.handle(yielded.message).unwrap());
        assert_eq!((regrant.to, regrant.message.kind()), (NodeId(1), MessageKind::Grant));
        assert_eq!(x.status().voted_for, Some(b_req.stamp()));
        assert_eq!(x.status().queued, 1);
    }

    #[test]
    fn inquire_inside_critical_section_is_deferred() {
        let mut solo = node(0, 1);
        let req = solo.request_critical_section().unwrap().outbox[0].message;
        let grant = only(&solo.handle(req).unwrap()).message;
        assert!(solo.handle(grant).unwrap().entered_critical_section);

        let inquire = Message::new(MessageKind::Inquire, NodeId(0), 50);
        assert!(solo.handle(inquire).unwrap().outbox.is_empty());
        assert!(solo.in_critical_section());
        assert_eq!(solo.status().deferred_inquiries, vec![NodeId(0)]);
    }

    #[test]
    fn exit_releases_to_quorum() {
        let mut solo = node(0, 1);
        let req = solo.request_critical_section().unwrap().outbox[0].message;
        let grant = only(&solo.handle(req).unwrap()).message;
        solo.handle(grant).unwrap();

        let release = only(&solo.exit_critical_section().unwrap());
        assert_eq!(release.message.kind(), MessageKind::Release);
        assert_eq!(solo.phase(), Phase::Idle);

        // Own voter frees the vote.
        assert!(solo.handle(release.message).unwrap().outbox.is_empty());
        assert_eq!(solo.status().voted_for, None);
    }

    #[test]
    fn receive_advances_clock_past_sender() {
        let mut voter = node(0, 4);
        let grant = only(&voter.handle(request(1, 41)).unwrap());
        // observe -> 42, tick for GRANT -> 43
        assert_eq!(grant.message.timestamp(), 43);
        assert_eq!(voter.clock(), 43);
    }

    #[test]
    fn unknown_sender_discarded_without_state_change() {
        let mut voter = node(0, 4);
        let before = voter.status();
        assert!(matches!(
            voter.handle(request(9, 100)),
            Err(Error::UnknownSender { num_nodes: 4, .. })
        ));
        assert_eq!(voter.status(), before);
    }

    #[test]
    fn non_quorum_sender_discarded() {
        // Node 3 shares neither row nor column with node 0 in a 2x2 grid.
        let mut voter = node(0, 4);
        assert!(matches!(
            voter.handle(request(3, 1)),
            Err(Error::NotInQuorum { .. })
        ));
        assert_eq!(voter.clock(), 0);
    }

    #[test]
    fn grant_without_request_discarded() {
        let mut n0 = node(0, 4);
        let grant = Message::new(MessageKind::Grant, NodeId(1), 3);
        assert!(matches!(
            n0.handle(grant),
            Err(Error::UnexpectedMessage {
                kind: MessageKind::Grant,
                phase: Phase::Idle,
                ..
            })
        ));
        assert_eq!(n0.status().grants, Vec::<NodeId>::new());
    }

    #[test]
    fn failed_keeps_request_alive() {
        let mut n0 = node(0, 4);
        n0.request_critical_section().unwrap();
        let failed = Message::new(MessageKind::Failed, NodeId(2), 4);
        assert!(n0.handle(failed).unwrap().outbox.is_empty());
        assert_eq!(n0.phase(), Phase::Requesting);
        assert_eq!(n0.status().failed, vec![NodeId(2)]);
    }
}
