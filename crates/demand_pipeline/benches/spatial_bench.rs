//! Spatial index benchmarks.
//!
//! Compares:
//! 1. **octree_build**: rayon-pool build vs the worker pool build, uniform vs clustered points
//! 2. **octree_query**: closest point, closest N, radius query vs brute force
//! 3. **scalar_tree**: min/max tree build and candidate cell traversal vs scanning every cell
//!
//! Run with: cargo bench -p demand_pipeline --bench spatial_bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use demand_pipeline::spatial::{CellScalarSource, GridCellScalars, MinMaxTree, OctreeConfig, PointOctree, ScalarTreeConfig};
use demand_pipeline::{Extent, PoolConfig, WorkerPool};
use glam::DVec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

// =============================================================================
// Fixtures
// =============================================================================

fn uniform_points(n: usize, seed: u64) -> Vec<DVec3> {
  let mut rng = StdRng::seed_from_u64(seed);
  (0..n)
    .map(|_| {
      DVec3::new(
        rng.random_range(0.0..100.0),
        rng.random_range(0.0..100.0),
        rng.random_range(0.0..100.0),
      )
    })
    .collect()
}

/// Eight tight blobs; stresses deep subdivision.
fn clustered_points(n: usize, seed: u64) -> Vec<DVec3> {
  let mut rng = StdRng::seed_from_u64(seed);
  let centers: Vec<DVec3> = (0..8)
    .map(|c| DVec3::new((c & 1) as f64, ((c >> 1) & 1) as f64, (c >> 2) as f64) * 80.0 + 10.0)
    .collect();
  (0..n)
    .map(|i| {
      let offset = DVec3::new(
        rng.random_range(-0.5..0.5),
        rng.random_range(-0.5..0.5),
        rng.random_range(-0.5..0.5),
      );
      centers[i % centers.len()] + offset
    })
    .collect()
}

/// Distance-from-center field on an `n`^3 point lattice.
fn sphere_field(n: i32) -> (Extent, Vec<f64>) {
  let extent = Extent::new(0, n - 1, 0, n - 1, 0, n - 1);
  let center = (n - 1) as f64 * 0.5;
  let mut values = Vec::with_capacity(extent.point_count());
  for k in 0..n {
    for j in 0..n {
      for i in 0..n {
        let d = DVec3::new(i as f64, j as f64, k as f64) - DVec3::splat(center);
        values.push(d.length());
      }
    }
  }
  (extent, values)
}

fn pool() -> WorkerPool {
  WorkerPool::new(&PoolConfig::default()).expect("pool")
}

// =============================================================================
// Octree
// =============================================================================

fn bench_octree_build(c: &mut Criterion) {
  let mut group = c.benchmark_group("octree_build");
  group.sample_size(20);
  let pool = pool();
  let config = OctreeConfig::default();

  for n in [10_000usize, 200_000] {
    let uniform = uniform_points(n, 7);
    let clustered = clustered_points(n, 7);

    group.bench_with_input(BenchmarkId::new("uniform", n), &uniform, |b, points| {
      b.iter(|| PointOctree::build(black_box(points.clone()), &config))
    });

    group.bench_with_input(BenchmarkId::new("uniform_worker_pool", n), &uniform, |b, points| {
      b.iter(|| PointOctree::build_in(&pool, black_box(points.clone()), &config))
    });

    group.bench_with_input(BenchmarkId::new("clustered", n), &clustered, |b, points| {
      b.iter(|| PointOctree::build(black_box(points.clone()), &config))
    });
  }

  group.finish();
}

fn bench_octree_query(c: &mut Criterion) {
  let mut group = c.benchmark_group("octree_query");
  let points = uniform_points(100_000, 11);
  let tree = PointOctree::build(points.clone(), &OctreeConfig::default());
  let probes = uniform_points(256, 12);

  group.bench_function("closest_point", |b| {
    b.iter(|| {
      for probe in &probes {
        black_box(tree.closest_point(black_box(*probe)));
      }
    })
  });

  group.bench_function("closest_point_brute_force", |b| {
    b.iter(|| {
      for probe in &probes {
        let best = points
          .iter()
          .enumerate()
          .map(|(id, p)| (id, p.distance_squared(*probe)))
          .min_by(|a, b| a.1.total_cmp(&b.1));
        black_box(best);
      }
    })
  });

  group.bench_function("closest_16", |b| {
    b.iter(|| {
      for probe in &probes {
        black_box(tree.closest_n_points(black_box(*probe), 16));
      }
    })
  });

  group.bench_function("within_radius_5", |b| {
    b.iter(|| {
      for probe in &probes {
        black_box(tree.points_within_radius(black_box(*probe), 5.0));
      }
    })
  });

  group.finish();
}

// =============================================================================
// Min/max scalar tree
// =============================================================================

fn bench_scalar_tree(c: &mut Criterion) {
  let mut group = c.benchmark_group("scalar_tree");
  group.sample_size(20);
  let pool = pool();
  let (extent, values) = sphere_field(96);
  let source = GridCellScalars {
    extent,
    values: &values,
  };

  for branching in [3usize, 8] {
    let config = ScalarTreeConfig {
      branching_factor: branching,
      ..Default::default()
    };
    group.bench_with_input(BenchmarkId::new("build", branching), &config, |b, config| {
      b.iter(|| MinMaxTree::build(&pool, black_box(&source), config).expect("build"))
    });
  }

  let tree = MinMaxTree::build(&pool, &source, &ScalarTreeConfig::default()).expect("build");
  let iso = 30.0;

  group.bench_function("candidate_cells", |b| {
    b.iter(|| tree.candidate_cells(black_box(iso)).count())
  });

  group.bench_function("cells_containing", |b| {
    b.iter(|| tree.cells_containing(&source, black_box(iso)).len())
  });

  group.bench_function("scan_all_cells", |b| {
    b.iter(|| {
      (0..source.cell_count())
        .filter(|&cell| {
          let (lo, hi) = source.cell_range(cell, &mut ());
          lo <= iso && iso <= hi
        })
        .count()
    })
  });

  group.finish();
}

criterion_group!(benches, bench_octree_build, bench_octree_query, bench_scalar_tree);
criterion_main!(benches);
