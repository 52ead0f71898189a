//! Quorum sets: a node's grid row plus its grid column.

use std::collections::BTreeSet;

use crate::error::{QuorumError, Result};
use crate::grid::{grid_columns, GridLayout};
use crate::NodeId;

/// Upper bound on quorum size for a population: `2 * ceil(sqrt(N)) - 1`.
pub const fn max_quorum_size(num_nodes: u32) -> usize {
    let k = grid_columns(num_nodes) as usize;
    if k == 0 {
        0
    } else {
        2 * k - 1
    }
}

/// The fixed set of nodes whose votes a node needs to enter the critical section.
///
/// Always contains its owner. Computed once at startup and never changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quorum {
    owner: NodeId,
    members: BTreeSet<NodeId>,
}

impl Quorum {
    /// Node this quorum belongs to.
    pub const fn owner(&self) -> NodeId {
        self.owner
    }

    /// Members in ascending identity order.
    pub fn members(&self) -> &BTreeSet<NodeId> {
        &self.members
    }

    pub fn iter(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.members.iter().copied()
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.members.contains(&node)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Never true for a built quorum; provided for API completeness.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Members shared with another quorum.
    pub fn intersection<'a>(&'a self, other: &'a Quorum) -> impl Iterator<Item = NodeId> + 'a {
        self.members.intersection(&other.members).copied()
    }

    /// True once every member appears in `votes`.
    pub fn is_satisfied_by(&self, votes: &BTreeSet<NodeId>) -> bool {
        self.members.is_subset(votes)
    }
}

impl<'a> IntoIterator for &'a Quorum {
    type Item = &'a NodeId;
    type IntoIter = std::collections::btree_set::Iter<'a, NodeId>;

    fn into_iter(self) -> Self::IntoIter {
        self.members.iter()
    }
}

/// Build the quorum of `node` in a population of `num_nodes`.
///
/// # Examples
///
/// ```
/// use maekawa_quorum::{build_quorum, NodeId};
///
/// // 2x2 grid: row {0, 1}, column {0, 2}
/// let q = build_quorum(NodeId(0), 4).unwrap();
/// assert_eq!(q.iter().collect::<Vec<_>>(), vec![NodeId(0), NodeId(1), NodeId(2)]);
/// ```
pub fn build_quorum(node: NodeId, num_nodes: u32) -> Result<Quorum> {
    let grid = GridLayout::new(num_nodes)?;
    let (row, column) = grid.position(node)?;

    let members = grid.row(row).chain(grid.column(column)).collect();

    Ok(Quorum {
        owner: node,
        members,
    })
}

/// Check every pair of quorums in a population for a shared member.
///
/// O(N^2 * sqrt(N)); meant for startup validation and tests.
pub fn verify_intersection(num_nodes: u32) -> Result<()> {
    let quorums = (0..num_nodes)
        .map(|i| build_quorum(NodeId(i), num_nodes))
        .collect::<Result<Vec<_>>>()?;

    for (i, a) in quorums.iter().enumerate() {
        for b in &quorums[i + 1..] {
            if a.intersection(b).next().is_none() {
                return Err(QuorumError::Disjoint {
                    a: a.owner(),
                    b: b.owner(),
                });
            }
        }
    }
    Ok(())
}
