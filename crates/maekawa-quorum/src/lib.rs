//! Maekawa Quorums
//!
//! Grid-based quorum construction for Maekawa's distributed mutual exclusion.
//!
//! # Grid Scheme
//!
//! The `N` node identities are laid out row-major in a grid with
//! `ceil(sqrt(N))` columns. Only the final row may be short. A node's quorum
//! is every identity in its row plus every identity in its column, itself
//! included, so `|Quorum(i)| <= 2 * ceil(sqrt(N)) - 1`.
//!
//! # Intersection
//!
//! For nodes `i = (r, c)` and `j = (r', c')`:
//! - both in full rows: cell `(r, c')` exists and lies in both quorums
//! - only `i` in the short row: cell `(r', c)` exists because row `r'` is full
//! - both in the short row: they share the row
//!
//! So any two quorums intersect without padding. [`verify_intersection`]
//! checks this exhaustively for a given population.

mod error;
mod grid;
mod quorum;

pub use error::{QuorumError, Result};
pub use grid::{grid_columns, GridLayout};
pub use quorum::{build_quorum, max_quorum_size, verify_intersection, Quorum};

/// Identity of a node in the population `[0, N)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(transparent)
)]
pub struct NodeId(pub u32);

impl NodeId {
    /// Index of this node, usable for slice lookups.
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl From<u32> for NodeId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
