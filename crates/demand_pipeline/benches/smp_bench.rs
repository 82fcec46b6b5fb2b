//! SMP substrate benchmarks.
//!
//! Compares:
//! 1. **for_each**: closure body over a flat range, at several grain sizes
//! 2. **thread_local**: per-worker accumulation then reduction vs a serial sum
//! 3. **merge**: fragment merge with heavy boundary duplication vs disjoint fragments
//!
//! Run with: cargo bench -p demand_pipeline --bench smp_bench

use std::sync::atomic::{AtomicU64, Ordering};

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use demand_pipeline::merge::{merge_fragments, BucketGrid, MergeOptions, PolyFragment, Topology};
use demand_pipeline::spatial::Aabb;
use demand_pipeline::{PoolConfig, ThreadLocal, WorkerPool};
use glam::DVec3;

// =============================================================================
// Fixtures
// =============================================================================

fn pool(threads: usize, grain: usize) -> WorkerPool {
  WorkerPool::new(&PoolConfig {
    threads,
    thread_name_prefix: "bench".to_string(),
    grain,
  })
  .expect("pool")
}

/// Cheap arithmetic so the scheduler overhead stays visible.
#[inline]
fn work(index: usize) -> u64 {
  let x = index as u64;
  x.wrapping_mul(0x9E37_79B9_7F4A_7C15).rotate_left(17) ^ x
}

/// Slab fragments over a `side`x`side` lattice of quads. Adjacent slabs share
/// their boundary row when `overlap` is set.
fn slab_fragments(slabs: usize, side: usize, overlap: bool) -> Vec<PolyFragment> {
  let height = (slabs * side) as f64;
  let bounds = Aabb::new(DVec3::ZERO, DVec3::new(side as f64, height + slabs as f64, 0.0));
  let estimate = slabs * side * side;
  let grid = BucketGrid::for_points(bounds, estimate, 8);

  (0..slabs)
    .map(|slab| {
      let mut fragment = PolyFragment::new(grid, 1, 0);
      // Disjoint slabs get a one-row gap so no point coincides.
      let base = (if overlap { slab * (side - 1) } else { slab * (side + 1) }) as f64;
      for j in 0..side - 1 {
        for i in 0..side - 1 {
          let corners = [(i, j), (i + 1, j), (i + 1, j + 1), (i, j + 1)];
          let ids: Vec<u32> = corners
            .iter()
            .map(|&(x, y)| {
              let p = DVec3::new(x as f64, base + y as f64, 0.0);
              fragment.add_point(p, &[p.x + p.y])
            })
            .collect();
          fragment.add_cell(Topology::Polys, &ids, &[]);
        }
      }
      fragment
    })
    .collect()
}

// =============================================================================
// for_each
// =============================================================================

fn bench_for_each(c: &mut Criterion) {
  let mut group = c.benchmark_group("for_each");
  let n = 1 << 20;

  group.bench_function("serial", |b| {
    b.iter(|| {
      let mut acc = 0u64;
      for i in 0..n {
        acc ^= work(black_box(i));
      }
      acc
    })
  });

  for grain in [64, 1024, 16384] {
    let pool = pool(0, grain);
    group.bench_with_input(BenchmarkId::new("grain", grain), &grain, |b, _| {
      b.iter(|| {
        let acc = AtomicU64::new(0);
        pool.for_each_fn(0, n, |_, i| {
          acc.fetch_xor(work(black_box(i)), Ordering::Relaxed);
        });
        acc.into_inner()
      })
    });
  }

  group.finish();
}

// =============================================================================
// ThreadLocal
// =============================================================================

fn bench_thread_local(c: &mut Criterion) {
  let mut group = c.benchmark_group("thread_local");
  let n = 1 << 20;
  let pool = pool(0, 4096);

  group.bench_function("serial_sum", |b| {
    b.iter(|| (0..n).map(|i| work(black_box(i)) & 0xFF).sum::<u64>())
  });

  group.bench_function("per_worker_sum", |b| {
    b.iter(|| {
      let sums = ThreadLocal::for_pool(&pool);
      pool.for_each_fn(0, n, |worker, i| {
        *sums.get_or_init(worker, || 0u64) += work(black_box(i)) & 0xFF;
      });
      sums.into_values().into_iter().sum::<u64>()
    })
  });

  group.finish();
}

// =============================================================================
// Merge
// =============================================================================

fn bench_merge(c: &mut Criterion) {
  let mut group = c.benchmark_group("merge");
  group.sample_size(20);
  let pool = pool(0, 64);

  for slabs in [4usize, 16] {
    let shared = slab_fragments(slabs, 64, true);
    let disjoint = slab_fragments(slabs, 64, false);

    group.bench_with_input(BenchmarkId::new("shared_rows", slabs), &shared, |b, fragments| {
      b.iter(|| merge_fragments(&pool, black_box(fragments), &MergeOptions::default()).expect("merge"))
    });

    group.bench_with_input(BenchmarkId::new("disjoint", slabs), &disjoint, |b, fragments| {
      b.iter(|| merge_fragments(&pool, black_box(fragments), &MergeOptions::default()).expect("merge"))
    });

    group.bench_with_input(BenchmarkId::new("seeded", slabs), &shared, |b, fragments| {
      b.iter(|| merge_fragments(&pool, black_box(fragments), &MergeOptions { seeded: true }).expect("merge"))
    });
  }

  group.finish();
}

criterion_group!(benches, bench_for_each, bench_thread_local, bench_merge);
criterion_main!(benches);
