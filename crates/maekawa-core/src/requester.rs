//! Requester role: a node's own pursuit of the critical section.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

use crate::message::RequestStamp;
use crate::{NodeId, Quorum};

/// Requester-side phase of a node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// No request outstanding.
    #[default]
    Idle,
    /// REQUEST sent to the quorum, collecting votes.
    Requesting,
    /// Every quorum member has voted for this node.
    InCriticalSection,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Requesting => write!(f, "requesting"),
            Self::InCriticalSection => write!(f, "in critical section"),
        }
    }
}

/// How an INQUIRE was answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Inquiry {
    /// Vote handed back; reply YIELD.
    Yield,
    /// Vote in use inside the critical section; RELEASE will answer it.
    Deferred,
    /// The inquired vote is not held (already yielded or released).
    Stale,
}

#[derive(Debug, Default)]
pub(crate) struct Requester {
    phase: Phase,
    own_request: Option<RequestStamp>,
    grants: BTreeSet<NodeId>,
    /// Members that answered FAILED and have not granted since.
    failed: BTreeSet<NodeId>,
    /// A vote was handed back and must be granted again.
    yielded: bool,
    deferred: BTreeSet<NodeId>,
}

impl Requester {
    pub(crate) fn phase(&self) -> Phase {
        self.phase
    }

    pub(crate) fn own_request(&self) -> Option<RequestStamp> {
        self.own_request
    }

    pub(crate) fn grants(&self) -> &BTreeSet<NodeId> {
        &self.grants
    }

    pub(crate) fn failed(&self) -> &BTreeSet<NodeId> {
        &self.failed
    }

    pub(crate) fn has_yielded(&self) -> bool {
        self.yielded
    }

    pub(crate) fn deferred(&self) -> &BTreeSet<NodeId> {
        &self.deferred
    }

    /// Idle → Requesting. Caller checks the phase.
    pub(crate) fn begin(&mut self, request: RequestStamp) {
        debug_assert_eq!(self.phase, Phase::Idle);
        *self = Self {
            phase: Phase::Requesting,
            own_request: Some(request),
            ..Self::default()
        };
    }

    /// InCriticalSection → Idle, dropping all bookkeeping of the request.
    pub(crate) fn finish(&mut self) -> Option<RequestStamp> {
        debug_assert_eq!(self.phase, Phase::InCriticalSection);
        let done = self.own_request;
        *self = Self::default();
        done
    }

    /// Count a vote; returns true when the quorum is complete.
    pub(crate) fn on_grant(&mut self, from: NodeId, quorum: &Quorum) -> bool {
        debug_assert_eq!(self.phase, Phase::Requesting);
        self.grants.insert(from);
        self.failed.remove(&from);
        self.yielded = false;

        if quorum.is_satisfied_by(&self.grants) {
            self.phase = Phase::InCriticalSection;
            return true;
        }
        false
    }

    pub(crate) fn on_failed(&mut self, from: NodeId) {
        debug_assert_eq!(self.phase, Phase::Requesting);
        self.failed.insert(from);
    }

    pub(crate) fn on_inquire(&mut self, from: NodeId) -> Inquiry {
        match self.phase {
            Phase::Requesting if self.grants.remove(&from) => {
                self.yielded = true;
                Inquiry::Yield
            }
            Phase::InCriticalSection => {
                self.deferred.insert(from);
                Inquiry::Deferred
            }
            _ => Inquiry::Stale,
        }
    }
}
