use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use super::*;
use crate::smp::PoolConfig;

const SIDE: usize = 6;

fn pool() -> WorkerPool {
  WorkerPool::new(&PoolConfig {
    threads: 3,
    grain: 8,
    ..Default::default()
  })
  .unwrap()
}

fn tag(p: DVec3) -> f64 {
  p.x + 10.0 * p.y + 100.0 * p.z
}

/// Shuffled lattice with a line to every +x neighbour and a vertex on every
/// point of the z = 0 layer. Cell data is the input cell index.
fn shuffled_lattice(seed: u64) -> PolyData {
  let mut lattice: Vec<[usize; 3]> = (0..SIDE * SIDE * SIDE)
    .map(|n| [n % SIDE, (n / SIDE) % SIDE, n / (SIDE * SIDE)])
    .collect();
  lattice.shuffle(&mut StdRng::seed_from_u64(seed));

  let mut id_of = vec![0u32; lattice.len()];
  let mut poly = PolyData {
    point_data: AttributeTable::new(1),
    cell_data: AttributeTable::new(1),
    ..PolyData::default()
  };
  for (id, &[i, j, k]) in lattice.iter().enumerate() {
    id_of[i + SIDE * (j + SIDE * k)] = id as u32;
    let p = DVec3::new(i as f64, j as f64, k as f64);
    poly.points.push(p);
    poly.point_data.push_tuple(&[tag(p)]);
  }
  for &[i, j, k] in &lattice {
    let at = |i: usize| id_of[i + SIDE * (j + SIDE * k)];
    if k == 0 {
      poly.cells.verts.push_cell(&[at(i)]);
    }
    if i + 1 < SIDE {
      poly.cells.lines.push_cell(&[at(i), at(i + 1)]);
    }
  }
  for cell in 0..poly.cells.total_cells() {
    poly.cell_data.push_tuple(&[cell as f64]);
  }
  poly
}

/// Cells of every topology in output order, as coordinates.
fn cell_points(poly: &PolyData) -> Vec<Vec<DVec3>> {
  Topology::ALL
    .iter()
    .flat_map(|&t| poly.cells.get(t).cells())
    .map(|cell| cell.iter().map(|&id| poly.points[id as usize]).collect())
    .collect()
}

fn path_length(points: &[DVec3]) -> f64 {
  points.windows(2).map(|w| w[0].distance(w[1])).sum()
}

fn is_permutation(order: &[u32]) -> bool {
  let mut sorted = order.to_vec();
  sorted.sort_unstable();
  sorted.iter().enumerate().all(|(i, &id)| i as u32 == id)
}

// =========================================================================
// Batch 1: Reordering
// =========================================================================

#[test]
fn test_points_and_point_data_follow_the_curve() {
  let input = shuffled_lattice(1);
  let sorted = z_curve_reorder(&pool(), &input).unwrap();

  assert!(is_permutation(&sorted.point_order));
  for (new, &old) in sorted.point_order.iter().enumerate() {
    let p = sorted.data.points[new];
    assert_eq!(p, input.points[old as usize]);
    assert_eq!(sorted.data.point_data.tuple(new), &[tag(p)]);
  }
  assert!(
    path_length(&sorted.data.points) < path_length(&input.points) / 2.0,
    "neighbours in memory should be neighbours in space"
  );
}

#[test]
fn test_cells_keep_geometry_topology_and_data() {
  let input = shuffled_lattice(2);
  let sorted = z_curve_reorder(&pool(), &input).unwrap();

  assert!(is_permutation(&sorted.cell_order));
  for t in Topology::ALL {
    assert_eq!(sorted.data.cells.get(t).len(), input.cells.get(t).len());
  }

  let before = cell_points(&input);
  let after = cell_points(&sorted.data);
  for (new, &old) in sorted.cell_order.iter().enumerate() {
    assert_eq!(after[new], before[old as usize], "cell {new} came from {old}");
    assert_eq!(sorted.data.cell_data.tuple(new), &[old as f64]);
  }
}

#[test]
fn test_coincident_points_are_all_kept() {
  let mut input = PolyData {
    points: vec![DVec3::splat(0.25); 40],
    ..PolyData::default()
  };
  input.points.push(DVec3::ONE);
  input.cells.verts.push_cell(&[40]);
  let sorted = z_curve_reorder(&pool(), &input).unwrap();

  assert!(is_permutation(&sorted.point_order));
  let vert = sorted.data.cells.verts.cell(0)[0];
  assert_eq!(sorted.data.points[vert as usize], DVec3::ONE);
}

#[test]
fn test_empty_input_reorders_to_empty() {
  let sorted = z_curve_reorder(&pool(), &PolyData::default()).unwrap();
  assert!(sorted.data.points.is_empty());
  assert!(sorted.point_order.is_empty() && sorted.cell_order.is_empty());
}

#[test]
fn test_short_attribute_table_is_rejected() {
  let mut input = shuffled_lattice(3);
  input.point_data.values.pop();
  let points = input.points.len();
  let err = z_curve_reorder(&pool(), &input).unwrap_err();
  assert_eq!(err, MergeError::TupleCountMismatch {
    fragment: 0,
    kind: "point",
    expected: points,
    found: points - 1,
  });
}
