//! Sequential prefix sums that give every fragment a disjoint output range.
//!
//! ```text
//!   fragment:       0      1      2
//!   polys cells:    4      0      7
//!   cell offset:    0      4      4     total 11
//! ```
//!
//! This is the only totally ordered step of a merge; the parallel remap
//! afterwards writes each fragment into exactly the ranges computed here.

use super::cells::{Topologies, Topology};

/// Where one fragment's cells of one topology land in the output.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FragmentRange {
  /// First output cell index, counted within the topology.
  pub cell: usize,
  /// First output connectivity index, counted within the topology.
  pub connectivity: usize,
  /// First output cell-data tuple, counted over all topologies.
  pub cell_data: usize,
}

/// Per-topology prefix sums over fragments.
#[derive(Clone, Debug, Default)]
pub struct OffsetManager {
  /// `ranges[topology][fragment]`
  ranges: [Vec<FragmentRange>; 4],
  cells: [usize; 4],
  connectivity: [usize; 4],
}

impl OffsetManager {
  /// Prefix sums over `fragments`, in topology order then fragment order.
  pub fn compute<'a>(fragments: impl IntoIterator<Item = &'a Topologies> + Clone) -> Self {
    let mut manager = Self::default();
    let mut cell_data = 0;
    for topology in Topology::ALL {
      let t = topology.index();
      for cells in fragments.clone() {
        let array = cells.get(topology);
        manager.ranges[t].push(FragmentRange {
          cell: manager.cells[t],
          connectivity: manager.connectivity[t],
          cell_data,
        });
        manager.cells[t] += array.len();
        manager.connectivity[t] += array.connectivity_len();
        cell_data += array.len();
      }
    }
    manager
  }

  #[inline]
  pub fn range(&self, topology: Topology, fragment: usize) -> FragmentRange {
    self.ranges[topology.index()][fragment]
  }

  /// Output cell count for one topology.
  #[inline]
  pub fn cells(&self, topology: Topology) -> usize {
    self.cells[topology.index()]
  }

  #[inline]
  pub fn connectivity(&self, topology: Topology) -> usize {
    self.connectivity[topology.index()]
  }

  /// Cells over all topologies, which is also the cell-data tuple count.
  pub fn total_cells(&self) -> usize {
    self.cells.iter().sum()
  }

  /// Offset of the topology's first cell in the combined cell-data table.
  pub fn cell_data_base(&self, topology: Topology) -> usize {
    self.cells[..topology.index()].iter().sum()
  }
}
