//! Uniform bucket grid shared by every locator taking part in one merge.

use glam::DVec3;

use crate::spatial::Aabb;

/// Default target occupancy when sizing a grid from a point estimate.
pub const DEFAULT_POINTS_PER_BUCKET: usize = 3;

/// Uniform spatial hash over a fixed box.
///
/// Points outside the box clamp to the nearest edge bucket, so every point
/// has a bucket.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BucketGrid {
  bounds: Aabb,
  divisions: [usize; 3],
}

impl BucketGrid {
  /// Grid over `bounds` with explicit per-axis divisions (each at least 1).
  pub fn new(bounds: Aabb, divisions: [usize; 3]) -> Self {
    Self {
      bounds,
      divisions: divisions.map(|d| d.max(1)),
    }
  }

  /// Grid sized so roughly `points_per_bucket` of `estimate` points share a bucket.
  ///
  /// Divisions follow the box aspect ratio; flat axes get one division.
  pub fn for_points(bounds: Aabb, estimate: usize, points_per_bucket: usize) -> Self {
    let target_buckets = (estimate / points_per_bucket.max(1)).max(1) as f64;
    let size = bounds.size();
    let axes: Vec<f64> = [size.x, size.y, size.z].into_iter().filter(|&s| s > 0.0).collect();
    if axes.is_empty() {
      return Self::new(bounds, [1, 1, 1]);
    }

    let volume: f64 = axes.iter().product();
    let side = (volume / target_buckets).powf(1.0 / axes.len() as f64);
    let per_axis = |s: f64| {
      if s > 0.0 && side > 0.0 {
        ((s / side).round() as usize).max(1)
      } else {
        1
      }
    };
    Self::new(bounds, [per_axis(size.x), per_axis(size.y), per_axis(size.z)])
  }

  #[inline]
  pub fn bounds(&self) -> Aabb {
    self.bounds
  }

  #[inline]
  pub fn divisions(&self) -> [usize; 3] {
    self.divisions
  }

  #[inline]
  pub fn bucket_count(&self) -> usize {
    self.divisions.iter().product()
  }

  /// Per-axis bucket coordinates of `point`.
  #[inline]
  pub fn bucket_coords(&self, point: DVec3) -> [usize; 3] {
    let min = self.bounds.min.to_array();
    let max = self.bounds.max.to_array();
    let p = point.to_array();
    std::array::from_fn(|axis| {
      let div = self.divisions[axis];
      let width = max[axis] - min[axis];
      if width <= 0.0 {
        return 0;
      }
      let t = (p[axis] - min[axis]) / width * div as f64;
      if t <= 0.0 {
        0
      } else {
        (t as usize).min(div - 1)
      }
    })
  }

  /// Linear bucket index of `point`, x fastest.
  #[inline]
  pub fn bucket_index(&self, point: DVec3) -> usize {
    let [i, j, k] = self.bucket_coords(point);
    let [nx, ny, _] = self.divisions;
    i + nx * (j + ny * k)
  }
}
