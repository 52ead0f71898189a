//! Voter role: how a node hands out its single vote to quorum peers.
//!
//! A voter holds at most one vote. The vote moves only when its holder
//! returns it (YIELD before entering the critical section, RELEASE after
//! leaving it), so no two requesters can count the same vote at once.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::message::RequestStamp;
use crate::NodeId;

/// What the voter wants sent in response to an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Reply {
    Grant(NodeId),
    Failed(NodeId),
    Inquire(NodeId),
    Nothing,
}

#[derive(Debug, Default)]
pub(crate) struct Voter {
    /// Request currently holding the vote.
    voted_for: Option<RequestStamp>,
    /// An INQUIRE is outstanding for the current vote.
    inquired: bool,
    /// Deferred requests, highest priority (lowest stamp) first.
    queue: BinaryHeap<Reverse<RequestStamp>>,
}

impl Voter {
    pub(crate) fn voted_for(&self) -> Option<RequestStamp> {
        self.voted_for
    }

    pub(crate) fn queued(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn is_inquired(&self) -> bool {
        self.inquired
    }

    pub(crate) fn on_request(&mut self, request: RequestStamp) -> Reply {
        let Some(current) = self.voted_for else {
            return self.grant(request);
        };

        self.queue.push(Reverse(request));

        if request.precedes(&current) {
            if self.inquired {
                Reply::Nothing
            } else {
                self.inquired = true;
                Reply::Inquire(current.node)
            }
        } else {
            Reply::Failed(request.node)
        }
    }

    /// Returns `None` if `from` does not hold the vote (stale YIELD).
    pub(crate) fn on_yield(&mut self, from: NodeId) -> Option<Reply> {
        let current = self.voted_for.filter(|v| v.node == from)?;
        self.voted_for = None;
        self.inquired = false;
        // The yielded request keeps its original priority.
        self.queue.push(Reverse(current));
        Some(self.grant_next())
    }

    pub(crate) fn on_release(&mut self, from: NodeId) -> Reply {
        self.queue.retain(|Reverse(r)| r.node != from);

        match self.voted_for {
            Some(current) if current.node == from => {
                self.voted_for = None;
                self.inquired = false;
                self.grant_next()
            }
            Some(_) => Reply::Nothing,
            None => self.grant_next(),
        }
    }

    fn grant_next(&mut self) -> Reply {
        match self.queue.pop() {
            Some(Reverse(next)) => self.grant(next),
            None => Reply::Nothing,
        }
    }

    fn grant(&mut self, request: RequestStamp) -> Reply {
        self.voted_for = Some(request);
        self.inquired = false;
        Reply::Grant(request.node)
    }
}
