//! Structured extents, piece requests, and the translator between them.
//!
//! A dataset is either structured (addressed by a 6-integer point box) or
//! piece-based (addressed by piece index, piece count, and ghost level).
//!
//! ```text
//!   whole extent (0,9, 0,9, 0,0)       4 pieces, ghost 0
//!   +---------+---------+             +----+----+
//!   |         |         |             | 2  | 3  |
//!   |    update extent  |    ---->    +----+----+
//!   |         |         |             | 0  | 1  |
//!   +---------+---------+             +----+----+
//! ```
//!
//! Extents are inclusive point ranges: `(0, 9)` is ten points and nine cells.
//! An axis with `min > max` makes the whole extent empty.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::metadata::{MetadataObject, ObjectRef};

// =============================================================================
// Extent
// =============================================================================

/// Axis-aligned inclusive point box `(x0, x1, y0, y1, z0, z1)`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Extent(pub [i32; 6]);

impl Extent {
  /// Canonical empty extent used when nothing is known about the domain.
  pub const EMPTY: Extent = Extent([0, -1, 0, -1, 0, -1]);

  pub const fn new(x0: i32, x1: i32, y0: i32, y1: i32, z0: i32, z1: i32) -> Self {
    Self([x0, x1, y0, y1, z0, z1])
  }

  #[inline]
  pub fn as_array(&self) -> [i32; 6] {
    self.0
  }

  /// Inclusive `(min, max)` along one axis.
  #[inline]
  pub fn axis(&self, axis: usize) -> (i32, i32) {
    (self.0[axis * 2], self.0[axis * 2 + 1])
  }

  /// Empty if any axis has `min > max`.
  #[inline]
  pub fn is_empty(&self) -> bool {
    (0..3).any(|a| {
      let (lo, hi) = self.axis(a);
      lo > hi
    })
  }

  /// True if `other` lies entirely within `self`, component-wise.
  ///
  /// Containment is purely numeric: callers decide how empty extents are
  /// treated.
  pub fn contains(&self, other: &Extent) -> bool {
    (0..3).all(|a| {
      let (lo, hi) = self.axis(a);
      let (olo, ohi) = other.axis(a);
      olo >= lo && ohi <= hi
    })
  }

  /// Overlap of two extents (may be empty).
  pub fn intersect(&self, other: &Extent) -> Extent {
    let mut out = [0; 6];
    for a in 0..3 {
      out[a * 2] = self.0[a * 2].max(other.0[a * 2]);
      out[a * 2 + 1] = self.0[a * 2 + 1].min(other.0[a * 2 + 1]);
    }
    Extent(out)
  }

  /// Point counts per axis (zero for empty axes).
  pub fn dimensions(&self) -> [usize; 3] {
    let mut dims = [0usize; 3];
    for (a, dim) in dims.iter_mut().enumerate() {
      let (lo, hi) = self.axis(a);
      *dim = if hi >= lo {
        (i64::from(hi) - i64::from(lo) + 1) as usize
      } else {
        0
      };
    }
    dims
  }

  /// Total number of points, saturating at `usize::MAX`.
  pub fn point_count(&self) -> usize {
    if self.is_empty() {
      return 0;
    }
    self.dimensions().iter().fold(1, |n, &d| n.saturating_mul(d))
  }

  /// Number of cells, treating flat axes as one cell thick.
  pub fn cell_count(&self) -> usize {
    if self.is_empty() {
      return 0;
    }
    self
      .dimensions()
      .iter()
      .map(|&d| d.saturating_sub(1).max(1))
      .fold(1, |n, d| n.saturating_mul(d))
  }

  /// Grow by `layers` on every non-flat side, clipped to `bounds`.
  pub fn grow(&self, layers: i32, bounds: &Extent) -> Extent {
    if layers <= 0 || self.is_empty() {
      return *self;
    }
    let mut out = self.0;
    for a in 0..3 {
      let (lo, hi) = bounds.axis(a);
      if lo == hi {
        continue;
      }
      out[a * 2] = out[a * 2].saturating_sub(layers).max(lo);
      out[a * 2 + 1] = out[a * 2 + 1].saturating_add(layers).min(hi);
    }
    Extent(out)
  }
}

impl fmt::Debug for Extent {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Extent{}", self)
  }
}

impl fmt::Display for Extent {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let e = &self.0;
    write!(f, "({}, {}, {}, {}, {}, {})", e[0], e[1], e[2], e[3], e[4], e[5])
  }
}

impl From<[i32; 6]> for Extent {
  fn from(value: [i32; 6]) -> Self {
    Self(value)
  }
}

// =============================================================================
// Pieces
// =============================================================================

/// One of `count` partitions of an unstructured dataset plus halo layers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PieceRequest {
  pub piece: i32,
  pub count: i32,
  pub ghost: i32,
}

impl PieceRequest {
  /// The whole dataset as a single piece.
  pub const WHOLE: PieceRequest = PieceRequest {
    piece: 0,
    count: 1,
    ghost: 0,
  };

  pub const fn new(piece: i32, count: i32, ghost: i32) -> Self {
    Self {
      piece,
      count,
      ghost,
    }
  }

  /// A negative piece index means "no explicit piece requested".
  #[inline]
  pub fn is_explicit(&self) -> bool {
    self.piece >= 0
  }
}

/// Which representation a dataset uses to address sub-regions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ExtentType {
  /// Addressed by a 6-integer point box.
  Structured,
  /// Addressed by (piece, count, ghost).
  Pieces,
}

/// What a data object actually holds, in its own representation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataExtent {
  Structured(Extent),
  Pieces(PieceRequest),
}

impl DataExtent {
  pub fn extent_type(&self) -> ExtentType {
    match self {
      DataExtent::Structured(_) => ExtentType::Structured,
      DataExtent::Pieces(_) => ExtentType::Pieces,
    }
  }
}

// =============================================================================
// Translation
// =============================================================================

/// Converts piece requests into structured extents.
///
/// Stored in metadata as an owned object so producers can install their own
/// partitioning scheme.
pub trait ExtentTranslator: Send + Sync + fmt::Debug {
  /// Extent covering `request` within `whole`, grown by the ghost level.
  /// Pieces that receive no cells map to [`Extent::EMPTY`].
  fn piece_to_extent(&self, whole: &Extent, request: &PieceRequest) -> Extent;
}

/// Default translator: recursive bisection along the longest axis.
///
/// Splits cells, so neighbouring pieces share one boundary plane of points
/// and every cell of the whole extent belongs to exactly one piece.
#[derive(Clone, Copy, Debug, Default)]
pub struct BlockTranslator;

impl BlockTranslator {
  /// Owned handle suitable for the translator metadata key.
  pub fn shared() -> ObjectRef {
    Arc::new(BlockTranslator)
  }

  fn split(extent: Extent, piece: i32, count: i32) -> Extent {
    if count <= 1 {
      return extent;
    }

    // Longest axis by cell count; widths near the full i32 range need i64.
    let width = |a: usize| {
      let (lo, hi) = extent.axis(a);
      i64::from(hi) - i64::from(lo)
    };
    let mut axis = None;
    let mut best_cells = 1;
    for a in 0..3 {
      let cells = width(a);
      if cells > best_cells {
        best_cells = cells;
        axis = Some(a);
      }
    }

    let Some(axis) = axis else {
      // Nothing left to split: the first piece keeps the block.
      return if piece == 0 { extent } else { Extent::EMPTY };
    };

    let left_count = count / 2;
    let right_count = count - left_count;
    let cells = width(axis);
    let left_cells = (cells * i64::from(left_count) / i64::from(count)).clamp(1, cells - 1);
    let mid = (i64::from(extent.axis(axis).0) + left_cells) as i32;

    let mut left = extent;
    left.0[axis * 2 + 1] = mid;
    let mut right = extent;
    right.0[axis * 2] = mid;

    if piece < left_count {
      Self::split(left, piece, left_count)
    } else {
      Self::split(right, piece - left_count, right_count)
    }
  }
}

impl ExtentTranslator for BlockTranslator {
  fn piece_to_extent(&self, whole: &Extent, request: &PieceRequest) -> Extent {
    if whole.is_empty() || request.piece < 0 || request.count <= 0 || request.piece >= request.count {
      return Extent::EMPTY;
    }
    let block = Self::split(*whole, request.piece, request.count);
    if block.is_empty() {
      return block;
    }
    block.grow(request.ghost, whole)
  }
}

impl MetadataObject for BlockTranslator {
  fn type_name(&self) -> &'static str {
    "BlockTranslator"
  }

  fn as_any(&self) -> &dyn Any {
    self
  }

  fn deep_clone(&self) -> ObjectRef {
    Arc::new(*self)
  }

  fn as_extent_translator(&self) -> Option<&dyn ExtentTranslator> {
    Some(self)
  }
}

#[cfg(test)]
#[path = "extent_test.rs"]
mod extent_test;
