use std::collections::{HashMap, HashSet};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::*;
use crate::smp::PoolConfig;
use crate::spatial::Aabb;

fn pool(threads: usize) -> WorkerPool {
  WorkerPool::new(&PoolConfig {
    threads,
    grain: 4,
    ..Default::default()
  })
  .unwrap()
}

fn grid() -> BucketGrid {
  BucketGrid::new(Aabb::new(DVec3::ZERO, DVec3::splat(8.0)), [4, 4, 4])
}

fn key(p: DVec3) -> [u64; 3] {
  [p.x.to_bits(), p.y.to_bits(), p.z.to_bits()]
}

/// Lattice points so duplicates across fragments are bit-identical.
fn lattice_point(rng: &mut StdRng) -> DVec3 {
  DVec3::new(
    rng.random_range(0..16) as f64 * 0.5,
    rng.random_range(0..16) as f64 * 0.5,
    rng.random_range(0..4) as f64 * 0.5,
  )
}

/// Fragments of random triangles over a shared lattice; point data is the
/// point's x coordinate, cell data is the fragment index.
fn random_fragments(seed: u64, count: usize, triangles: usize) -> Vec<PolyFragment> {
  let mut rng = StdRng::seed_from_u64(seed);
  (0..count)
    .map(|f| {
      let mut fragment = PolyFragment::new(grid(), 1, 1);
      for _ in 0..triangles {
        let ids: Vec<u32> = (0..3)
          .map(|_| {
            let p = lattice_point(&mut rng);
            fragment.add_point(p, &[p.x])
          })
          .collect();
        fragment.add_cell(Topology::Polys, &ids, &[f as f64]);
      }
      fragment
    })
    .collect()
}

// =========================================================================
// Batch 1: Point merge
// =========================================================================

/// Distinct output count equals distinct input coordinates, and each
/// (fragment, local id) maps to the merged point with the same coordinates.
#[test]
fn test_merge_deduplicates_across_fragments() {
  let pool = pool(4);
  for seed in 0..8 {
    let fragments = random_fragments(seed, 5, 40);
    let distinct: HashSet<[u64; 3]> = fragments
      .iter()
      .flat_map(|f| f.points.points().iter().copied().map(key))
      .collect();

    let result = merge_fragments(&pool, &fragments, &MergeOptions::default()).unwrap();
    let out = &result.output;

    assert_eq!(out.point_count(), distinct.len(), "seed {seed}");
    let unique_out: HashSet<[u64; 3]> = out.points.iter().copied().map(key).collect();
    assert_eq!(unique_out.len(), out.point_count(), "output holds duplicates");

    for (f, fragment) in fragments.iter().enumerate() {
      assert_eq!(result.point_maps[f].len(), fragment.points.len());
      for (local, &p) in fragment.points.points().iter().enumerate() {
        let merged = result.point_maps[f][local] as usize;
        assert!(same_point(out.points[merged], p));
        assert_eq!(out.point_data.tuple(merged), &[p.x]);
      }
    }
    assert!(result.buckets_merged > 0);
  }
}

#[test]
fn test_single_thread_pool_merges_everything() {
  let pool = pool(1);
  let fragments = random_fragments(99, 3, 25);
  let distinct: HashSet<[u64; 3]> = fragments
    .iter()
    .flat_map(|f| f.points.points().iter().copied().map(key))
    .collect();
  let result = merge_fragments(&pool, &fragments, &MergeOptions::default()).unwrap();
  assert_eq!(result.output.point_count(), distinct.len());
}

#[test]
fn test_seeded_merge_keeps_first_fragment_ids() {
  let pool = pool(3);
  let fragments = random_fragments(7, 4, 30);
  let result = merge_fragments(&pool, &fragments, &MergeOptions { seeded: true }).unwrap();

  let seed_len = fragments[0].points.len();
  let identity: Vec<u32> = (0..seed_len as u32).collect();
  assert_eq!(result.point_maps[0], identity);
  for (local, &p) in fragments[0].points.points().iter().enumerate() {
    assert!(same_point(result.output.points[local], p));
  }
  // Later fragments reuse seed ids for shared coordinates.
  let seed_ids: HashMap<[u64; 3], u32> = fragments[0]
    .points
    .points()
    .iter()
    .enumerate()
    .map(|(i, &p)| (key(p), i as u32))
    .collect();
  for (f, fragment) in fragments.iter().enumerate().skip(1) {
    for (local, &p) in fragment.points.points().iter().enumerate() {
      if let Some(&id) = seed_ids.get(&key(p)) {
        assert_eq!(result.point_maps[f][local], id);
      } else {
        assert!(result.point_maps[f][local] as usize >= seed_len);
      }
    }
  }
}

#[test]
fn test_no_fragments_yields_empty_output() {
  let result = merge_fragments(&pool(2), &[], &MergeOptions::default()).unwrap();
  assert_eq!(result.output, PolyData::default());
  assert!(result.point_maps.is_empty());
}

// =========================================================================
// Batch 2: Cells
// =========================================================================

#[test]
fn test_cells_reference_merged_points() {
  let pool = pool(4);
  let fragments = random_fragments(3, 6, 20);
  let result = merge_fragments(&pool, &fragments, &MergeOptions::default()).unwrap();
  let out = &result.output;

  assert_eq!(out.cells.polys.len(), 6 * 20);
  assert_eq!(out.cell_data.tuple_count(), 6 * 20);

  // Fragment order is kept inside a topology.
  let mut cell = 0;
  for (f, fragment) in fragments.iter().enumerate() {
    for local_cell in fragment.cells.polys.cells() {
      let merged_cell = out.cells.polys.cell(cell);
      assert_eq!(merged_cell.len(), local_cell.len());
      for (&m, &l) in merged_cell.iter().zip(local_cell) {
        assert!((m as usize) < out.point_count());
        assert!(same_point(out.points[m as usize], fragment.points.points()[l as usize]));
      }
      assert_eq!(out.cell_data.tuple(cell), &[f as f64]);
      cell += 1;
    }
  }
}

/// Output cells are verts, then lines, polys, strips; cell data follows.
#[test]
fn test_cell_data_follows_topology_order() {
  let pool = pool(2);
  let mut fragments = Vec::new();
  for f in 0..2 {
    let mut fragment = PolyFragment::new(grid(), 0, 1);
    let a = fragment.add_point(DVec3::new(f as f64, 0.0, 0.0), &[]);
    let b = fragment.add_point(DVec3::new(f as f64, 1.0, 0.0), &[]);
    let c = fragment.add_point(DVec3::new(f as f64 + 0.5, 1.0, 0.0), &[]);
    fragment.add_cell(Topology::Verts, &[a], &[10.0 + f as f64]);
    fragment.add_cell(Topology::Lines, &[a, b], &[20.0 + f as f64]);
    fragment.add_cell(Topology::Strips, &[a, b, c], &[40.0 + f as f64]);
    fragments.push(fragment);
  }

  let out = merge_fragments(&pool, &fragments, &MergeOptions::default())
    .unwrap()
    .output;

  assert_eq!(out.cells.verts.len(), 2);
  assert_eq!(out.cells.lines.len(), 2);
  assert!(out.cells.polys.is_empty());
  assert_eq!(out.cells.strips.len(), 2);
  assert_eq!(out.cells.strips.offsets, vec![0, 3, 6]);
  assert_eq!(out.cell_data.values, vec![10.0, 11.0, 20.0, 21.0, 40.0, 41.0]);
}

// =========================================================================
// Batch 3: Errors
// =========================================================================

#[test]
fn test_attribute_mismatch_is_rejected() {
  let fragments = vec![PolyFragment::new(grid(), 1, 0), PolyFragment::new(grid(), 2, 0)];
  let err = merge_fragments(&pool(1), &fragments, &MergeOptions::default()).unwrap_err();
  assert_eq!(err, MergeError::AttributeMismatch {
    fragment: 1,
    kind: "point",
    expected: 1,
    found: 2,
  });
}

#[test]
fn test_tuple_count_mismatch_is_rejected() {
  let mut fragments = random_fragments(5, 2, 6);
  let points = fragments[1].points.len();
  fragments[1].point_data.values.push(0.0);
  let err = merge_fragments(&pool(2), &fragments, &MergeOptions::default()).unwrap_err();
  assert_eq!(err, MergeError::TupleCountMismatch {
    fragment: 1,
    kind: "point",
    expected: points,
    found: points + 1,
  });

  // The first fragment is checked too, and cells count across topologies.
  let mut fragments = random_fragments(5, 2, 6);
  fragments[0].cell_data.values.pop();
  let err = merge_fragments(&pool(2), &fragments, &MergeOptions::default()).unwrap_err();
  assert_eq!(err, MergeError::TupleCountMismatch {
    fragment: 0,
    kind: "cell",
    expected: 6,
    found: 5,
  });
}

#[test]
fn test_grid_mismatch_is_rejected() {
  let other = BucketGrid::new(Aabb::new(DVec3::ZERO, DVec3::ONE), [2, 2, 2]);
  let fragments = vec![PolyFragment::new(grid(), 0, 0), PolyFragment::new(other, 0, 0)];
  let err = merge_fragments(&pool(1), &fragments, &MergeOptions::default()).unwrap_err();
  assert_eq!(err, MergeError::GridMismatch { fragment: 1 });
}

// =========================================================================
// Batch 4: Bucket claims
// =========================================================================

/// Under many workers racing on the same buckets, exactly one claim per
/// bucket succeeds, over repeated runs with shuffled attempt orders.
#[test]
fn test_bucket_claim_exclusivity() {
  let pool = pool(8);
  let mut rng = StdRng::seed_from_u64(2024);
  for _ in 0..25 {
    let buckets = rng.random_range(1..64);
    let attempts_per_bucket = rng.random_range(2..12);
    let mut schedule: Vec<usize> = (0..buckets * attempts_per_bucket).map(|i| i % buckets).collect();
    for i in (1..schedule.len()).rev() {
      schedule.swap(i, rng.random_range(0..=i));
    }

    let claims = BucketClaims::new(buckets);
    let wins: Vec<AtomicU32> = (0..buckets).map(|_| AtomicU32::new(0)).collect();
    pool.for_each_fn(0, schedule.len(), |_, i| {
      let bucket = schedule[i];
      if claims.try_claim(bucket) {
        wins[bucket].fetch_add(1, Ordering::Relaxed);
      }
    });

    for bucket in 0..buckets {
      assert_eq!(wins[bucket].load(Ordering::Relaxed), 1, "bucket {bucket}");
      assert_eq!(claims.attempts(bucket) as usize, attempts_per_bucket);
    }
  }
}
