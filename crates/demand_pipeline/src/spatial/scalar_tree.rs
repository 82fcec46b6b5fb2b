//! Balanced K-ary min/max tree over per-cell scalar ranges.
//!
//! ```text
//!   level 0                 [0]                      node i's children:
//!   level 1        [1]      [2]      [3]             i*K+1 ..= i*K+K
//!   level 2     [4 5 6]  [7 8 9]  [10 11 12]   <- leaves, leaf_offset = 4
//!                 │
//!                 cells [0, cells_per_leaf)
//! ```
//!
//! Leaves own contiguous cell blocks. The build computes leaf ranges in
//! parallel and pushes each one toward the root with monotonic clamps; a
//! path stops as soon as an ancestor is not extended. Clamps commute, so the
//! final ranges do not depend on interleaving. The build works on atomic
//! scratch and the finished tree is frozen, so a traversal can never observe
//! a half-built range.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::TreeError;
use crate::extent::Extent;
use crate::merge::CellArray;
use crate::smp::{Functor, InitializableFunctor, ThreadLocal, WorkerId, WorkerPool};

use super::config::ScalarTreeConfig;

// =============================================================================
// Sources
// =============================================================================

/// Anything that can report the scalar range of cell `i`.
pub trait CellScalarSource: Sync {
  /// Per-worker scratch reused across cells.
  type Scratch: Send + Default;

  fn cell_count(&self) -> usize;

  /// `(min, max)` of the scalar over the cell.
  fn cell_range(&self, cell: usize, scratch: &mut Self::Scratch) -> (f64, f64);
}

/// Point scalars gathered through cell connectivity.
#[derive(Clone, Copy, Debug)]
pub struct CellArrayScalars<'a> {
  pub cells: &'a CellArray,
  pub scalars: &'a [f64],
}

impl CellScalarSource for CellArrayScalars<'_> {
  type Scratch = Vec<f64>;

  fn cell_count(&self) -> usize {
    self.cells.len()
  }

  fn cell_range(&self, cell: usize, scratch: &mut Vec<f64>) -> (f64, f64) {
    scratch.clear();
    scratch.extend(self.cells.cell(cell).iter().map(|&p| self.scalars[p as usize]));
    min_max(scratch.iter().copied())
  }
}

/// Point scalars on a structured grid; cells are the voxels between points.
///
/// Flat axes count as one cell thick, matching [`Extent::cell_count`].
#[derive(Clone, Copy, Debug)]
pub struct GridCellScalars<'a> {
  pub extent: Extent,
  /// One value per point, x fastest.
  pub values: &'a [f64],
}

impl GridCellScalars<'_> {
  /// Per-axis cell counts.
  fn cell_dims(&self) -> [usize; 3] {
    self.extent.dimensions().map(|d| d.saturating_sub(1).max(1))
  }

  /// Point indices of the corners of `cell`.
  pub fn corners(&self, cell: usize) -> impl Iterator<Item = usize> {
    let [dx, dy, dz] = self.extent.dimensions();
    let [cx, cy, _] = self.cell_dims();
    let (i, j, k) = (cell % cx, (cell / cx) % cy, cell / (cx * cy));
    let span = |d: usize| if d > 1 { 2 } else { 1 };
    let (sx, sy, sz) = (span(dx), span(dy), span(dz));
    (0..sz).flat_map(move |c| {
      (0..sy).flat_map(move |b| (0..sx).map(move |a| (i + a) + dx * ((j + b) + dy * (k + c))))
    })
  }
}

impl CellScalarSource for GridCellScalars<'_> {
  type Scratch = ();

  fn cell_count(&self) -> usize {
    self.extent.cell_count()
  }

  fn cell_range(&self, cell: usize, _: &mut ()) -> (f64, f64) {
    min_max(self.corners(cell).map(|p| self.values[p]))
  }
}

fn min_max(values: impl Iterator<Item = f64>) -> (f64, f64) {
  values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)))
}

// =============================================================================
// Ranges
// =============================================================================

/// Closed scalar interval. An empty node holds `[+inf, -inf]`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScalarRange {
  pub min: f64,
  pub max: f64,
}

impl ScalarRange {
  pub const EMPTY: ScalarRange = ScalarRange {
    min: f64::INFINITY,
    max: f64::NEG_INFINITY,
  };

  #[inline]
  pub fn contains(&self, value: f64) -> bool {
    self.min <= value && value <= self.max
  }

  #[inline]
  pub fn is_empty(&self) -> bool {
    self.min > self.max
  }
}

/// Lower `slot` to `value` if that extends it; `true` if it did.
#[inline]
fn clamp_min(slot: &AtomicU64, value: f64) -> bool {
  slot
    .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
      (value < f64::from_bits(bits)).then_some(value.to_bits())
    })
    .is_ok()
}

#[inline]
fn clamp_max(slot: &AtomicU64, value: f64) -> bool {
  slot
    .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
      (value > f64::from_bits(bits)).then_some(value.to_bits())
    })
    .is_ok()
}

// =============================================================================
// MinMaxTree
// =============================================================================

#[derive(Clone, Debug)]
pub struct MinMaxTree {
  branching: usize,
  levels: u32,
  cell_count: usize,
  cells_per_leaf: usize,
  leaf_offset: usize,
  nodes: Vec<ScalarRange>,
}

impl MinMaxTree {
  /// Build over every cell of `source`.
  #[cfg_attr(feature = "profiling", tracing::instrument(skip_all, name = "scalar_tree::build"))]
  pub fn build<S: CellScalarSource>(
    pool: &WorkerPool,
    source: &S,
    config: &ScalarTreeConfig,
  ) -> Result<Self, TreeError> {
    let branching = config.branching_factor;
    if branching < 2 {
      return Err(TreeError::InvalidBranchingFactor(branching));
    }
    let cell_count = source.cell_count();
    if cell_count == 0 {
      return Err(TreeError::NoCells);
    }

    // Deepen until every leaf holds `branching` cells or the level cap hits;
    // past the cap leaves absorb more cells each.
    let wanted_leaves = (cell_count - 1) / branching + 1;
    let mut levels = 0u32;
    let mut leaves = 1usize;
    while leaves < wanted_leaves && levels < config.max_level {
      leaves *= branching;
      levels += 1;
    }
    let cells_per_leaf = if leaves >= wanted_leaves {
      branching
    } else {
      cell_count.div_ceil(leaves)
    };
    let node_count = (leaves * branching - 1) / (branching - 1);
    let leaf_offset = node_count - leaves;
    let used_leaves = cell_count.div_ceil(cells_per_leaf);

    let mins: Vec<AtomicU64> = (0..node_count)
      .map(|_| AtomicU64::new(f64::INFINITY.to_bits()))
      .collect();
    let maxs: Vec<AtomicU64> = (0..node_count)
      .map(|_| AtomicU64::new(f64::NEG_INFINITY.to_bits()))
      .collect();
    let scratch: ThreadLocal<S::Scratch> = ThreadLocal::for_pool(pool);

    pool.for_each_fn(0, used_leaves, |worker, leaf| {
      let mut scratch = scratch.get_or_init(worker, S::Scratch::default);
      let first = leaf * cells_per_leaf;
      let last = (first + cells_per_leaf).min(cell_count);
      let (lo, hi) = (first..last)
        .map(|cell| source.cell_range(cell, &mut scratch))
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), (a, b)| {
          (lo.min(a), hi.max(b))
        });

      let mut node = leaf_offset + leaf;
      mins[node].store(lo.to_bits(), Ordering::Relaxed);
      maxs[node].store(hi.to_bits(), Ordering::Relaxed);
      while node > 0 {
        node = (node - 1) / branching;
        let lowered = clamp_min(&mins[node], lo);
        let raised = clamp_max(&maxs[node], hi);
        if !lowered && !raised {
          break;
        }
      }
    });

    let nodes: Vec<ScalarRange> = mins
      .into_iter()
      .zip(maxs)
      .map(|(lo, hi)| ScalarRange {
        min: f64::from_bits(lo.into_inner()),
        max: f64::from_bits(hi.into_inner()),
      })
      .collect();

    tracing::debug!(
      cells = cell_count,
      levels,
      leaves,
      cells_per_leaf,
      "scalar tree built"
    );

    Ok(Self {
      branching,
      levels,
      cell_count,
      cells_per_leaf,
      leaf_offset,
      nodes,
    })
  }

  // ===========================================================================
  // Accessors
  // ===========================================================================

  /// Scalar range over every cell.
  #[inline]
  pub fn root_range(&self) -> ScalarRange {
    self.nodes[0]
  }

  #[inline]
  pub fn node_count(&self) -> usize {
    self.nodes.len()
  }

  #[inline]
  pub fn node_range(&self, node: usize) -> Option<ScalarRange> {
    self.nodes.get(node).copied()
  }

  #[inline]
  pub fn leaf_count(&self) -> usize {
    self.nodes.len() - self.leaf_offset
  }

  /// Depth of the leaf level; the root is level 0.
  #[inline]
  pub fn levels(&self) -> u32 {
    self.levels
  }

  #[inline]
  pub fn branching_factor(&self) -> usize {
    self.branching
  }

  #[inline]
  pub fn cells_per_leaf(&self) -> usize {
    self.cells_per_leaf
  }

  #[inline]
  pub fn is_leaf(&self, node: usize) -> bool {
    node >= self.leaf_offset
  }

  /// Child node ids of an internal node.
  pub fn children(&self, node: usize) -> std::ops::Range<usize> {
    if self.is_leaf(node) {
      return 0..0;
    }
    let first = node * self.branching + 1;
    first..first + self.branching
  }

  /// Cells owned by a leaf (empty for internal or unused leaves).
  pub fn leaf_cells(&self, node: usize) -> std::ops::Range<usize> {
    if !self.is_leaf(node) {
      return 0..0;
    }
    let first = ((node - self.leaf_offset) * self.cells_per_leaf).min(self.cell_count);
    let last = (first + self.cells_per_leaf).min(self.cell_count);
    first..last
  }

  // ===========================================================================
  // Queries
  // ===========================================================================

  /// Cells whose leaf range brackets `value`, ascending.
  pub fn candidate_cells(&self, value: f64) -> CandidateCells<'_> {
    CandidateCells {
      tree: self,
      value,
      stack: vec![0],
      current: 0..0,
    }
  }

  /// Cells whose own scalar range contains `value`.
  pub fn cells_containing<S: CellScalarSource>(&self, source: &S, value: f64) -> Vec<usize> {
    let mut scratch = S::Scratch::default();
    self
      .candidate_cells(value)
      .filter(|&cell| {
        let (lo, hi) = source.cell_range(cell, &mut scratch);
        lo <= value && value <= hi
      })
      .collect()
  }

  /// Call `functor` for every candidate cell, fanning subtrees out as tasks.
  #[cfg_attr(feature = "profiling", tracing::instrument(skip_all, name = "scalar_tree::traverse"))]
  pub fn traverse_parallel<F: Functor + ?Sized>(&self, pool: &WorkerPool, value: f64, functor: &F) {
    self.traverse_with(pool, value, &|_: WorkerId| {}, functor);
  }

  /// Like [`MinMaxTree::traverse_parallel`], running `init` once per worker.
  pub fn traverse_parallel_init<F: InitializableFunctor + ?Sized>(&self, pool: &WorkerPool, value: f64, functor: &F) {
    self.traverse_with(pool, value, &|worker: WorkerId| functor.ensure_initialized(worker), functor);
  }

  fn traverse_with<F, P>(&self, pool: &WorkerPool, value: f64, prepare: &P, functor: &F)
  where
    F: Functor + ?Sized,
    P: Fn(WorkerId) + Sync,
  {
    pool.install(|| {
      rayon::scope(|scope| self.visit(scope, pool, 0, value, prepare, functor));
    });
  }

  fn visit<'s, F, P>(
    &'s self,
    scope: &rayon::Scope<'s>,
    pool: &'s WorkerPool,
    node: usize,
    value: f64,
    prepare: &'s P,
    functor: &'s F,
  ) where
    F: Functor + ?Sized,
    P: Fn(WorkerId) + Sync,
  {
    if !self.nodes[node].contains(value) {
      return;
    }
    if self.is_leaf(node) {
      let worker = pool.current_worker();
      prepare(worker);
      for cell in self.leaf_cells(node) {
        functor.execute(worker, cell);
      }
      return;
    }
    for child in self.children(node) {
      if self.is_leaf(child) {
        self.visit(scope, pool, child, value, prepare, functor);
      } else {
        scope.spawn(move |scope| self.visit(scope, pool, child, value, prepare, functor));
      }
    }
  }
}

/// Iterator returned by [`MinMaxTree::candidate_cells`].
#[derive(Debug)]
pub struct CandidateCells<'a> {
  tree: &'a MinMaxTree,
  value: f64,
  stack: Vec<usize>,
  current: std::ops::Range<usize>,
}

impl Iterator for CandidateCells<'_> {
  type Item = usize;

  fn next(&mut self) -> Option<usize> {
    loop {
      if let Some(cell) = self.current.next() {
        return Some(cell);
      }
      let node = self.stack.pop()?;
      if !self.tree.nodes[node].contains(self.value) {
        continue;
      }
      if self.tree.is_leaf(node) {
        self.current = self.tree.leaf_cells(node);
      } else {
        self.stack.extend(self.tree.children(node).rev());
      }
    }
  }
}

#[cfg(test)]
#[path = "scalar_tree_test.rs"]
mod scalar_tree_test;
