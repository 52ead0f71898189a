//! Row-major grid layout of node identities.
//!
//! ```text
//! N = 7, columns = 3
//!
//!   col: 0  1  2
//! row 0: 0  1  2
//! row 1: 3  4  5
//! row 2: 6          <- short final row
//! ```

use crate::error::{QuorumError, Result};
use crate::NodeId;

/// Number of grid columns for a population: `ceil(sqrt(num_nodes))`.
///
/// # Examples
///
/// ```
/// use maekawa_quorum::grid_columns;
///
/// assert_eq!(grid_columns(1), 1);
/// assert_eq!(grid_columns(4), 2);
/// assert_eq!(grid_columns(5), 3);
/// assert_eq!(grid_columns(9), 3);
/// ```
pub const fn grid_columns(num_nodes: u32) -> u32 {
    let n = num_nodes as u64;
    let mut k: u64 = 0;
    while k * k < n {
        k += 1;
    }
    k as u32
}

/// Placement of `num_nodes` identities into a grid with `ceil(sqrt(N))` columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridLayout {
    num_nodes: u32,
    columns: u32,
}

impl GridLayout {
    /// Lay out a population of `num_nodes` identities.
    pub fn new(num_nodes: u32) -> Result<Self> {
        if num_nodes == 0 {
            return Err(QuorumError::EmptyCluster);
        }
        Ok(Self {
            num_nodes,
            columns: grid_columns(num_nodes),
        })
    }

    /// Population size.
    pub const fn num_nodes(&self) -> u32 {
        self.num_nodes
    }

    /// Number of columns (width of every full row).
    pub const fn columns(&self) -> u32 {
        self.columns
    }

    /// Number of rows, counting a short final row.
    pub const fn rows(&self) -> u32 {
        self.num_nodes.div_ceil(self.columns)
    }

    /// `(row, column)` of a node.
    pub fn position(&self, node: NodeId) -> Result<(u32, u32)> {
        self.check(node)?;
        Ok((node.0 / self.columns, node.0 % self.columns))
    }

    /// Node at `(row, column)`, if that cell is occupied.
    pub fn at(&self, row: u32, column: u32) -> Option<NodeId> {
        if column >= self.columns {
            return None;
        }
        let id = row.checked_mul(self.columns)?.checked_add(column)?;
        (id < self.num_nodes).then_some(NodeId(id))
    }

    /// Occupied cells of a row.
    pub fn row(&self, row: u32) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.columns).filter_map(move |c| self.at(row, c))
    }

    /// Occupied cells of a column.
    pub fn column(&self, column: u32) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.rows()).filter_map(move |r| self.at(r, column))
    }

    fn check(&self, node: NodeId) -> Result<()> {
        if node.0 >= self.num_nodes {
            return Err(QuorumError::NodeOutOfRange {
                node,
                num_nodes: self.num_nodes,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn columns_are_ceil_sqrt() {
        let cases = [(1, 1), (2, 2), (3, 2), (4, 2), (5, 3), (9, 3), (10, 4), (16, 4), (17, 5)];
        for (n, expected) in cases {
            assert_eq!(grid_columns(n), expected, "grid_columns({})", n);
        }
    }

    #[test]
    fn empty_population_rejected() {
        assert_eq!(GridLayout::new(0), Err(QuorumError::EmptyCluster));
    }

    #[test]
    fn short_final_row() {
        let grid = GridLayout::new(7).unwrap();
        assert_eq!(grid.columns(), 3);
        assert_eq!(grid.rows(), 3);
        assert_eq!(grid.row(2).collect::<Vec<_>>(), vec![NodeId(6)]);
        assert_eq!(grid.column(1).collect::<Vec<_>>(), vec![NodeId(1), NodeId(4)]);
        assert_eq!(grid.at(2, 1), None);
    }

    #[test]
    fn positions_are_row_major() {
        let grid = GridLayout::new(4).unwrap();
        assert_eq!(grid.position(NodeId(0)).unwrap(), (0, 0));
        assert_eq!(grid.position(NodeId(1)).unwrap(), (0, 1));
        assert_eq!(grid.position(NodeId(2)).unwrap(), (1, 0));
        assert_eq!(grid.position(NodeId(3)).unwrap(), (1, 1));
        assert!(matches!(
            grid.position(NodeId(4)),
            Err(QuorumError::NodeOutOfRange { .. })
        ));
    }
}
