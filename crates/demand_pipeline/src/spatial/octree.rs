//! Point octree with region-based nearest-neighbour queries.
//!
//! ```text
//!   root (padded, optionally cubic)
//!   ├── octant 0 ── leaf (region 0)   point ids [0, 37)
//!   ├── octant 1 ── split
//!   │   ├── leaf (region 1)            point ids [37, 101)
//!   │   └── ...
//!   └── octant 7 ── leaf (region 15)   ...
//! ```
//!
//! Point ids are reordered so every node owns a contiguous slice of
//! `order`; leaves are numbered in depth-first order and those numbers are
//! the region ids used by the per-region queries.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use glam::DVec3;
use rayon::prelude::*;

use super::bounds::Aabb;
use super::config::OctreeConfig;
use crate::smp::WorkerPool;

#[derive(Clone, Debug)]
struct Node {
  bounds: Aabb,
  /// Tight box around the points below this node; `None` when empty.
  data_bounds: Option<Aabb>,
  start: usize,
  end: usize,
  /// Index of the first of eight consecutive children.
  first_child: Option<usize>,
  region: Option<usize>,
}

impl Node {
  fn placeholder(bounds: Aabb) -> Self {
    Self {
      bounds,
      data_bounds: None,
      start: 0,
      end: 0,
      first_child: None,
      region: None,
    }
  }

  #[inline]
  fn is_empty(&self) -> bool {
    self.start == self.end
  }
}

/// Recursive build result before flattening into the node arena.
struct BuildNode {
  bounds: Aabb,
  len: usize,
  children: Option<Vec<BuildNode>>,
}

/// Heap entry ordered so the nearest candidate pops first.
#[derive(Clone, Copy, Debug)]
struct Nearest {
  dist2: f64,
  index: usize,
}

impl PartialEq for Nearest {
  fn eq(&self, other: &Self) -> bool {
    self.cmp(other) == Ordering::Equal
  }
}

impl Eq for Nearest {}

impl PartialOrd for Nearest {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl Ord for Nearest {
  fn cmp(&self, other: &Self) -> Ordering {
    other
      .dist2
      .total_cmp(&self.dist2)
      .then_with(|| other.index.cmp(&self.index))
  }
}

/// Octree over a fixed point set.
#[derive(Clone, Debug)]
pub struct PointOctree {
  points: Vec<DVec3>,
  order: Vec<u32>,
  nodes: Vec<Node>,
  regions: Vec<usize>,
}

impl PointOctree {
  // ===========================================================================
  // Construction
  // ===========================================================================

  /// Build on the current rayon pool.
  #[cfg_attr(feature = "profiling", tracing::instrument(skip_all, name = "octree::build"))]
  pub fn build(points: Vec<DVec3>, config: &OctreeConfig) -> Self {
    debug_assert!(points.len() <= u32::MAX as usize, "point ids are 32-bit");

    let mut tree = PointOctree {
      order: (0..points.len() as u32).collect(),
      points,
      nodes: Vec::new(),
      regions: Vec::new(),
    };

    let Some(tight) = Aabb::from_points(tree.points.iter().copied()) else {
      return tree;
    };
    let root_box = if config.create_cubic_octants {
      tight.to_cube()
    } else {
      tight
    };
    let root_box = root_box.padded(config.get_padding(root_box.size().max_element()));

    let root = build_node(&tree.points, &mut tree.order, root_box, 0, config);
    tree.nodes.push(Node::placeholder(root_box));
    tree.flatten(root, 0, 0);

    tracing::debug!(
      points = tree.points.len(),
      regions = tree.regions.len(),
      nodes = tree.nodes.len(),
      "octree built"
    );
    tree
  }

  /// Build with `pool`'s worker threads.
  pub fn build_in(pool: &WorkerPool, points: Vec<DVec3>, config: &OctreeConfig) -> Self {
    pool.install(|| Self::build(points, config))
  }

  fn flatten(&mut self, build: BuildNode, index: usize, start: usize) {
    let end = start + build.len;
    match build.children {
      None => {
        let region = self.regions.len();
        self.regions.push(index);
        let data_bounds = Aabb::from_points(self.order[start..end].iter().map(|&id| self.points[id as usize]));
        self.nodes[index] = Node {
          bounds: build.bounds,
          data_bounds,
          start,
          end,
          first_child: None,
          region: Some(region),
        };
      }
      Some(children) => {
        let first = self.nodes.len();
        self.nodes.extend(children.iter().map(|c| Node::placeholder(c.bounds)));

        let mut child_start = start;
        let mut data_bounds: Option<Aabb> = None;
        for (i, child) in children.into_iter().enumerate() {
          let len = child.len;
          self.flatten(child, first + i, child_start);
          child_start += len;
          if let Some(b) = self.nodes[first + i].data_bounds {
            data_bounds = Some(data_bounds.map_or(b, |d| d.union(&b)));
          }
        }

        self.nodes[index] = Node {
          bounds: build.bounds,
          data_bounds,
          start,
          end,
          first_child: Some(first),
          region: None,
        };
      }
    }
  }

  // ===========================================================================
  // Regions
  // ===========================================================================

  #[inline]
  pub fn point_count(&self) -> usize {
    self.points.len()
  }

  #[inline]
  pub fn points(&self) -> &[DVec3] {
    &self.points
  }

  /// Point ids in leaf order. Octants are visited depth-first in Morton
  /// order, so this is a Z-curve through the point set.
  #[inline]
  pub fn sorted_point_ids(&self) -> &[u32] {
    &self.order
  }

  /// Padded root box, `None` for an empty tree.
  pub fn bounds(&self) -> Option<Aabb> {
    self.nodes.first().map(|n| n.bounds)
  }

  #[inline]
  pub fn region_count(&self) -> usize {
    self.regions.len()
  }

  /// Spatial box of a region.
  pub fn region_bounds(&self, region: usize) -> Option<Aabb> {
    self.regions.get(region).map(|&n| self.nodes[n].bounds)
  }

  /// Tight box around a region's points; `None` if the region is empty.
  pub fn region_data_bounds(&self, region: usize) -> Option<Aabb> {
    self.regions.get(region).and_then(|&n| self.nodes[n].data_bounds)
  }

  pub fn region_point_ids(&self, region: usize) -> Option<&[u32]> {
    self
      .regions
      .get(region)
      .map(|&n| &self.order[self.nodes[n].start..self.nodes[n].end])
  }

  /// Region whose box contains `point`, or `None` outside the root box.
  pub fn region_containing(&self, point: DVec3) -> Option<usize> {
    let root = self.nodes.first()?;
    if !root.bounds.contains_point(point) {
      return None;
    }
    self.nodes[self.descend(point)].region
  }

  /// Leaf reached by following octants of `point` from the root.
  fn descend(&self, point: DVec3) -> usize {
    let mut index = 0;
    while let Some(first) = self.nodes[index].first_child {
      index = first + self.nodes[index].bounds.octant_of(point);
    }
    index
  }

  // ===========================================================================
  // Nearest queries
  // ===========================================================================

  /// Closest point id and its squared distance.
  pub fn closest_point(&self, point: DVec3) -> Option<(u32, f64)> {
    self.nearest(point, f64::INFINITY)
  }

  /// Closest point no farther than `radius`.
  pub fn closest_point_within_radius(&self, point: DVec3, radius: f64) -> Option<(u32, f64)> {
    self.nearest(point, radius * radius)
  }

  /// Closest point among one region's points.
  pub fn closest_point_in_region(&self, region: usize, point: DVec3) -> Option<(u32, f64)> {
    let ids = self.region_point_ids(region)?;
    let mut best = None;
    let mut limit = f64::INFINITY;
    self.scan(ids, point, &mut best, &mut limit);
    best
  }

  /// Search starts in the leaf the query falls into, then visits nodes in
  /// order of distance until the next node is farther than the best hit.
  fn nearest(&self, point: DVec3, limit2: f64) -> Option<(u32, f64)> {
    if self.nodes.is_empty() || self.points.is_empty() {
      return None;
    }
    let root_box = self.nodes[0].bounds;
    let seed = self.descend(root_box.clamp_point(point));

    let mut best = None;
    let mut limit = limit2;
    let seed_node = &self.nodes[seed];
    self.scan(&self.order[seed_node.start..seed_node.end], point, &mut best, &mut limit);

    let mut heap = BinaryHeap::new();
    if let Some(d) = self.node_distance(0, point) {
      heap.push(Nearest { dist2: d, index: 0 });
    }
    while let Some(Nearest { dist2, index }) = heap.pop() {
      if dist2 > limit {
        break;
      }
      let node = &self.nodes[index];
      match node.first_child {
        None if index != seed => {
          self.scan(&self.order[node.start..node.end], point, &mut best, &mut limit);
        }
        None => {}
        Some(first) => {
          for child in first..first + 8 {
            if let Some(d) = self.node_distance(child, point) {
              if d <= limit {
                heap.push(Nearest { dist2: d, index: child });
              }
            }
          }
        }
      }
    }
    best
  }

  #[inline]
  fn node_distance(&self, index: usize, point: DVec3) -> Option<f64> {
    let node = &self.nodes[index];
    if node.is_empty() {
      return None;
    }
    node.data_bounds.map(|b| b.distance_squared_to_point(point))
  }

  /// Accept strictly closer points, or the first point at the limit itself.
  fn scan(&self, ids: &[u32], point: DVec3, best: &mut Option<(u32, f64)>, limit: &mut f64) {
    for &id in ids {
      let d = self.points[id as usize].distance_squared(point);
      if d < *limit || (best.is_none() && d <= *limit) {
        *best = Some((id, d));
        *limit = d;
      }
    }
  }

  /// The `n` closest point ids, nearest first.
  pub fn closest_n_points(&self, point: DVec3, n: usize) -> Vec<u32> {
    if n == 0 || self.nodes.is_empty() {
      return Vec::new();
    }

    // Max-heap of the current best n; the worst sits on top.
    let mut found: BinaryHeap<(OrderedDist, u32)> = BinaryHeap::with_capacity(n + 1);
    let mut frontier = BinaryHeap::new();
    if let Some(d) = self.node_distance(0, point) {
      frontier.push(Nearest { dist2: d, index: 0 });
    }

    while let Some(Nearest { dist2, index }) = frontier.pop() {
      if found.len() == n && found.peek().is_some_and(|(w, _)| dist2 > w.0) {
        break;
      }
      let node = &self.nodes[index];
      match node.first_child {
        None => {
          for &id in &self.order[node.start..node.end] {
            let d = self.points[id as usize].distance_squared(point);
            found.push((OrderedDist(d), id));
            if found.len() > n {
              found.pop();
            }
          }
        }
        Some(first) => {
          for child in first..first + 8 {
            if let Some(d) = self.node_distance(child, point) {
              frontier.push(Nearest { dist2: d, index: child });
            }
          }
        }
      }
    }

    let mut out = found.into_vec();
    out.sort();
    out.into_iter().map(|(_, id)| id).collect()
  }

  // ===========================================================================
  // Range queries
  // ===========================================================================

  /// Every point within `radius` of `point` (inclusive), unordered.
  pub fn points_within_radius(&self, point: DVec3, radius: f64) -> Vec<u32> {
    let r2 = radius * radius;
    let mut out = Vec::new();
    if self.nodes.is_empty() {
      return out;
    }
    let mut stack = vec![0usize];
    while let Some(index) = stack.pop() {
      match self.node_distance(index, point) {
        Some(d) if d <= r2 => {}
        _ => continue,
      }
      let node = &self.nodes[index];
      match node.first_child {
        None => out.extend(
          self.order[node.start..node.end]
            .iter()
            .copied()
            .filter(|&id| self.points[id as usize].distance_squared(point) <= r2),
        ),
        Some(first) => stack.extend(first..first + 8),
      }
    }
    out
  }

  /// Every point inside `area` (boundary inclusive), unordered.
  pub fn points_in_area(&self, area: &Aabb) -> Vec<u32> {
    let mut out = Vec::new();
    if self.nodes.is_empty() {
      return out;
    }
    let mut stack = vec![0usize];
    while let Some(index) = stack.pop() {
      let node = &self.nodes[index];
      let Some(data) = node.data_bounds else {
        continue;
      };
      if !area.overlaps(&data) {
        continue;
      }
      let ids = &self.order[node.start..node.end];
      if area.contains_aabb(&data) {
        out.extend_from_slice(ids);
        continue;
      }
      match node.first_child {
        None => out.extend(
          ids
            .iter()
            .copied()
            .filter(|&id| area.contains_point(self.points[id as usize])),
        ),
        Some(first) => stack.extend(first..first + 8),
      }
    }
    out
  }
}

/// Total-ordered squared distance for the result heap.
#[derive(Clone, Copy, Debug, PartialEq)]
struct OrderedDist(f64);

impl Eq for OrderedDist {}

impl PartialOrd for OrderedDist {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl Ord for OrderedDist {
  fn cmp(&self, other: &Self) -> Ordering {
    self.0.total_cmp(&other.0)
  }
}

fn build_node(points: &[DVec3], ids: &mut [u32], bounds: Aabb, depth: u32, config: &OctreeConfig) -> BuildNode {
  let len = ids.len();
  if len <= config.get_max_points_per_region() || depth >= config.max_depth {
    return BuildNode {
      bounds,
      len,
      children: None,
    };
  }

  let mut counts = [0usize; 8];
  for &id in ids.iter() {
    counts[bounds.octant_of(points[id as usize])] += 1;
  }
  ids.sort_unstable_by_key(|&id| bounds.octant_of(points[id as usize]));

  let mut slices: Vec<(usize, &mut [u32])> = Vec::with_capacity(8);
  let mut rest = ids;
  for (octant, &count) in counts.iter().enumerate() {
    let (head, tail) = std::mem::take(&mut rest).split_at_mut(count);
    slices.push((octant, head));
    rest = tail;
  }

  let child = |(octant, slice): (usize, &mut [u32])| build_node(points, slice, bounds.octant(octant), depth + 1, config);
  let children: Vec<BuildNode> = if len >= config.parallel_threshold {
    slices.into_par_iter().map(child).collect()
  } else {
    slices.into_iter().map(child).collect()
  };

  BuildNode {
    bounds,
    len,
    children: Some(children),
  }
}

#[cfg(test)]
#[path = "octree_test.rs"]
mod octree_test;
