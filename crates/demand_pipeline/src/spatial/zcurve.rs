//! Z-curve reordering of poly data.
//!
//! ```text
//!   points ──► octree, one point per leaf ──► leaf order = new point ids
//!   cells  ──► centroids ──► octree ──► leaf order, grouped by topology
//! ```
//!
//! Points that are close in space end up close in memory, so parallel
//! passes over contiguous index ranges touch compact regions.

use glam::DVec3;
use rayon::prelude::*;
use smallvec::SmallVec;

use super::config::OctreeConfig;
use super::octree::PointOctree;
use crate::error::MergeError;
use crate::merge::{AttributeTable, PolyData, Topologies, Topology};
use crate::smp::WorkerPool;

/// Coincident points stop splitting here and share a leaf.
const SORT_MAX_DEPTH: u32 = 50;

/// A reordered copy plus the permutations that produced it.
#[derive(Clone, Debug, Default)]
pub struct ZCurveOrder {
  pub data: PolyData,
  /// `point_order[new] = old`
  pub point_order: Vec<u32>,
  /// `cell_order[new] = old`, both counted over all topologies in order.
  pub cell_order: Vec<u32>,
}

/// Sort the points of `input` along a Z-curve, then its cells by centroid.
///
/// Cells stay inside their topology and are renumbered to the new point
/// ids; both attribute tables follow their elements.
#[cfg_attr(feature = "profiling", tracing::instrument(skip_all, name = "zcurve::reorder"))]
pub fn z_curve_reorder(pool: &WorkerPool, input: &PolyData) -> Result<ZCurveOrder, MergeError> {
  input.check_tuple_counts()?;
  let config = OctreeConfig {
    max_points_per_region: 1,
    max_depth: SORT_MAX_DEPTH,
    ..OctreeConfig::default()
  };

  let point_order = PointOctree::build_in(pool, input.points.clone(), &config)
    .sorted_point_ids()
    .to_vec();
  let mut old_to_new = vec![0u32; point_order.len()];
  for (new, &old) in point_order.iter().enumerate() {
    old_to_new[old as usize] = new as u32;
  }

  // Global cell index -> (topology, index within it).
  let cells: Vec<(Topology, usize)> = Topology::ALL
    .iter()
    .flat_map(|&t| (0..input.cells.get(t).len()).map(move |i| (t, i)))
    .collect();
  let centroids: Vec<DVec3> = pool.install(|| {
    cells
      .par_iter()
      .map(|&(t, i)| centroid(&input.points, input.cells.get(t).cell(i)))
      .collect()
  });
  let mut cell_order = PointOctree::build_in(pool, centroids, &config)
    .sorted_point_ids()
    .to_vec();
  cell_order.sort_by_key(|&old| cells[old as usize].0.index());

  let mut sorted = Topologies::default();
  for &old in &cell_order {
    let (t, i) = cells[old as usize];
    let ids: SmallVec<[u32; 8]> = input.cells.get(t).cell(i).iter().map(|&id| old_to_new[id as usize]).collect();
    sorted.get_mut(t).push_cell(&ids);
  }

  let (points, point_data, cell_data) = pool.install(|| {
    let points: Vec<DVec3> = point_order.par_iter().map(|&old| input.points[old as usize]).collect();
    (
      points,
      permute_tuples(&input.point_data, &point_order),
      permute_tuples(&input.cell_data, &cell_order),
    )
  });

  tracing::debug!(points = point_order.len(), cells = cell_order.len(), "z-curve reorder");
  Ok(ZCurveOrder {
    data: PolyData {
      points,
      point_data,
      cells: sorted,
      cell_data,
    },
    point_order,
    cell_order,
  })
}

fn centroid(points: &[DVec3], ids: &[u32]) -> DVec3 {
  if ids.is_empty() {
    return DVec3::ZERO;
  }
  ids.iter().map(|&id| points[id as usize]).sum::<DVec3>() / ids.len() as f64
}

/// Tuple `order[i]` of `table` becomes tuple `i`.
fn permute_tuples(table: &AttributeTable, order: &[u32]) -> AttributeTable {
  let c = table.components;
  if c == 0 {
    return AttributeTable::new(0);
  }
  let mut values = vec![0.0; order.len() * c];
  values
    .par_chunks_mut(c)
    .zip(order.par_iter())
    .for_each(|(out, &old)| out.copy_from_slice(table.tuple(old as usize)));
  AttributeTable { components: c, values }
}

#[cfg(test)]
#[path = "zcurve_test.rs"]
mod zcurve_test;
