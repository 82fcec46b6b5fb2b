//! Build parameters for the point octree and the min/max scalar tree.

/// Configuration for [`PointOctree`](super::PointOctree) construction.
#[derive(Clone, Debug)]
pub struct OctreeConfig {
  /// A region holding more points than this is split into eight.
  pub max_points_per_region: usize,

  /// Expand the root to a cube so every region is cube-shaped.
  pub create_cubic_octants: bool,

  /// Hard limit on subdivision depth. A region at this depth stays a leaf
  /// whatever its point count, so no leaf side is shorter than the root side
  /// over `2^max_depth` (about a millionth of it at the default of 20).
  pub max_depth: u32,

  /// Subtrees with at least this many points build their children in parallel.
  pub parallel_threshold: usize,

  /// Relative padding applied to the root box so boundary points fall inside.
  pub fudge_factor: f64,
}

impl OctreeConfig {
  /// Split threshold, never below one.
  #[inline]
  pub fn get_max_points_per_region(&self) -> usize {
    self.max_points_per_region.max(1)
  }

  /// Absolute padding for a root box whose longest side is `longest_side`.
  #[inline]
  pub fn get_padding(&self, longest_side: f64) -> f64 {
    if longest_side > 0.0 {
      longest_side * self.fudge_factor
    } else {
      self.fudge_factor
    }
  }
}

impl Default for OctreeConfig {
  fn default() -> Self {
    Self {
      max_points_per_region: 100,
      create_cubic_octants: true,
      max_depth: 20,
      parallel_threshold: 4096,
      fudge_factor: 1e-6,
    }
  }
}

/// Configuration for [`MinMaxTree`](super::MinMaxTree) construction.
#[derive(Clone, Debug)]
pub struct ScalarTreeConfig {
  /// Children per internal node, and cells per leaf while depth allows.
  pub branching_factor: usize,

  /// Deepest level; past it leaves absorb more cells each.
  pub max_level: u32,
}

impl Default for ScalarTreeConfig {
  fn default() -> Self {
    Self {
      branching_factor: 3,
      max_level: 20,
    }
  }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;
