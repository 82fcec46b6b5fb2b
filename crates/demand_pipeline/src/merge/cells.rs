//! Cell connectivity and attribute containers.
//!
//! ```text
//!   offsets:       [0, 3, 7, 9]          (len = cells + 1)
//!   connectivity:  [a b c | d e f g | h i]
//!                    cell 0   cell 1   cell 2
//! ```

/// Variable-length cells stored as an offsets array plus flat connectivity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CellArray {
  pub offsets: Vec<u32>,
  pub connectivity: Vec<u32>,
}

impl Default for CellArray {
  fn default() -> Self {
    Self {
      offsets: vec![0],
      connectivity: Vec::new(),
    }
  }
}

impl CellArray {
  pub fn new() -> Self {
    Self::default()
  }

  /// Append one cell made of `points`.
  pub fn push_cell(&mut self, points: &[u32]) {
    self.connectivity.extend_from_slice(points);
    self.offsets.push(self.connectivity.len() as u32);
  }

  /// Point ids of cell `index`.
  ///
  /// # Panics
  /// If `index >= len()`.
  #[inline]
  pub fn cell(&self, index: usize) -> &[u32] {
    let start = self.offsets[index] as usize;
    let end = self.offsets[index + 1] as usize;
    &self.connectivity[start..end]
  }

  pub fn cells(&self) -> impl Iterator<Item = &[u32]> + '_ {
    (0..self.len()).map(move |i| self.cell(i))
  }

  /// Number of cells.
  #[inline]
  pub fn len(&self) -> usize {
    self.offsets.len().saturating_sub(1)
  }

  #[inline]
  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  #[inline]
  pub fn connectivity_len(&self) -> usize {
    self.connectivity.len()
  }
}

// =============================================================================
// Topologies
// =============================================================================

/// Cell topology class. Merged output keeps them in this order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Topology {
  Verts,
  Lines,
  Polys,
  Strips,
}

impl Topology {
  pub const ALL: [Topology; 4] = [Topology::Verts, Topology::Lines, Topology::Polys, Topology::Strips];

  #[inline]
  pub fn index(self) -> usize {
    self as usize
  }
}

/// One [`CellArray`] per topology.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Topologies {
  pub verts: CellArray,
  pub lines: CellArray,
  pub polys: CellArray,
  pub strips: CellArray,
}

impl Topologies {
  pub fn get(&self, topology: Topology) -> &CellArray {
    match topology {
      Topology::Verts => &self.verts,
      Topology::Lines => &self.lines,
      Topology::Polys => &self.polys,
      Topology::Strips => &self.strips,
    }
  }

  pub fn get_mut(&mut self, topology: Topology) -> &mut CellArray {
    match topology {
      Topology::Verts => &mut self.verts,
      Topology::Lines => &mut self.lines,
      Topology::Polys => &mut self.polys,
      Topology::Strips => &mut self.strips,
    }
  }

  /// Cells across all topologies.
  pub fn total_cells(&self) -> usize {
    Topology::ALL.iter().map(|&t| self.get(t).len()).sum()
  }
}

// =============================================================================
// Attributes
// =============================================================================

/// Fixed-width tuples of doubles, one tuple per point or per cell.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AttributeTable {
  pub components: usize,
  pub values: Vec<f64>,
}

impl AttributeTable {
  pub fn new(components: usize) -> Self {
    Self {
      components,
      values: Vec::new(),
    }
  }

  #[inline]
  pub fn tuple_count(&self) -> usize {
    if self.components == 0 {
      0
    } else {
      self.values.len() / self.components
    }
  }

  pub fn push_tuple(&mut self, tuple: &[f64]) {
    debug_assert_eq!(tuple.len(), self.components);
    self.values.extend_from_slice(tuple);
  }

  #[inline]
  pub fn tuple(&self, index: usize) -> &[f64] {
    let c = self.components;
    &self.values[index * c..(index + 1) * c]
  }
}
