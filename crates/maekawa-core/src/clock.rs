//! Lamport logical clock.

/// A Lamport timestamp.
pub type Timestamp = u64;

/// Per-node logical clock.
///
/// The value never decreases and is always at least the highest timestamp
/// the node has sent or received.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LamportClock {
    time: Timestamp,
}

impl LamportClock {
    /// Clock starting at zero.
    pub const fn new() -> Self {
        Self { time: 0 }
    }

    /// Current value without advancing.
    pub const fn now(&self) -> Timestamp {
        self.time
    }

    /// Advance for a send event and return the stamp to use.
    pub fn tick(&mut self) -> Timestamp {
        self.time += 1;
        self.time
    }

    /// Merge a received timestamp: `local = max(local, remote) + 1`.
    pub fn observe(&mut self, remote: Timestamp) -> Timestamp {
        self.time = self.time.max(remote) + 1;
        self.time
    }
}
