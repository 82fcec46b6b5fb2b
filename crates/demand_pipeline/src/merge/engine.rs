//! Parallel merge of per-worker poly fragments into one deduplicated result.
//!
//! ```text
//!   fragment 0      fragment 1      fragment 2         (one per worker)
//!   LocalPointSet   LocalPointSet   LocalPointSet
//!        │               │               │
//!        └──── bucket b claimed by exactly one worker ────┐
//!                                                         ▼
//!              scan bucket b of every fragment, compare bitwise,
//!              reserve fresh ids with one fetch_add per (bucket, fragment)
//!                                                         │
//!   prefix sums (OffsetManager) ──► disjoint output ranges per fragment
//!                                                         │
//!              remap connectivity in parallel, one fragment per task
//! ```
//!
//! Points, point data and id maps are written through atomics because the
//! output slot a worker writes is only known after its reservation. Cells
//! are written through plain `&mut` slices carved up front, so no worker can
//! touch another's range.

use std::any::Any;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};

use glam::DVec3;
use smallvec::SmallVec;

use super::cells::{AttributeTable, CellArray, Topologies, Topology};
use super::grid::BucketGrid;
use super::locator::{same_point, LocalPointSet};
use super::offsets::OffsetManager;
use crate::error::MergeError;
use crate::pipeline::Payload;
use crate::smp::{Task, WorkerId, WorkerPool};

// =============================================================================
// Inputs and outputs
// =============================================================================

/// Points, attributes and cells produced by one worker, with local ids.
#[derive(Clone, Debug)]
pub struct PolyFragment {
  pub points: LocalPointSet,
  /// One tuple per local point.
  pub point_data: AttributeTable,
  pub cells: Topologies,
  /// One tuple per cell, verts first, then lines, polys, strips.
  pub cell_data: AttributeTable,
}

impl PolyFragment {
  pub fn new(grid: BucketGrid, point_components: usize, cell_components: usize) -> Self {
    Self {
      points: LocalPointSet::new(grid),
      point_data: AttributeTable::new(point_components),
      cells: Topologies::default(),
      cell_data: AttributeTable::new(cell_components),
    }
  }

  /// Insert a point, recording `data` only when it is new.
  pub fn add_point(&mut self, point: DVec3, data: &[f64]) -> u32 {
    let (id, inserted) = self.points.insert_unique(point);
    if inserted {
      self.point_data.push_tuple(data);
    }
    id
  }

  /// Append a cell.
  ///
  /// Cell data must be added in topology order; mixing topologies is only
  /// valid when `cell_components == 0`.
  pub fn add_cell(&mut self, topology: Topology, points: &[u32], data: &[f64]) {
    self.cells.get_mut(topology).push_cell(points);
    self.cell_data.push_tuple(data);
  }
}

/// Merged poly data with global point ids.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PolyData {
  pub points: Vec<DVec3>,
  pub point_data: AttributeTable,
  pub cells: Topologies,
  pub cell_data: AttributeTable,
}

impl Payload for PolyData {
  fn as_any(&self) -> &dyn Any {
    self
  }
}

impl PolyData {
  #[inline]
  pub fn point_count(&self) -> usize {
    self.points.len()
  }

  /// Attribute tables against the point and cell counts; a lone dataset
  /// reports itself as fragment 0.
  pub fn check_tuple_counts(&self) -> Result<(), MergeError> {
    check_tuple_counts(0, [
      ("point", &self.point_data, self.points.len()),
      ("cell", &self.cell_data, self.cells.total_cells()),
    ])
  }

  /// Append another merged result without deduplication.
  pub fn append(&mut self, other: &PolyData) {
    let base = self.points.len() as u32;
    self.points.extend_from_slice(&other.points);
    if self.point_data.components == 0 {
      self.point_data.components = other.point_data.components;
    }
    self.point_data.values.extend_from_slice(&other.point_data.values);
    if self.cell_data.components == 0 {
      self.cell_data.components = other.cell_data.components;
    }
    self.cell_data.values.extend_from_slice(&other.cell_data.values);
    for topology in Topology::ALL {
      let target = self.cells.get_mut(topology);
      for cell in other.cells.get(topology).cells() {
        let shifted: SmallVec<[u32; 8]> = cell.iter().map(|&id| id + base).collect();
        target.push_cell(&shifted);
      }
    }
  }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct MergeOptions {
  /// Fragment 0's point ids are already final: its points keep their ids
  /// and the others are merged into it.
  pub seeded: bool,
}

#[derive(Debug)]
pub struct MergeResult {
  pub output: PolyData,
  /// `point_maps[fragment][local_id]` is the merged id.
  pub point_maps: Vec<Vec<u32>>,
  /// Buckets merged, one claim each.
  pub buckets_merged: usize,
}

// =============================================================================
// Bucket claims
// =============================================================================

/// One claim counter per bucket. The worker whose increment observes zero
/// owns the bucket.
#[derive(Debug)]
pub struct BucketClaims {
  counters: Box<[AtomicU32]>,
}

impl BucketClaims {
  pub fn new(buckets: usize) -> Self {
    Self {
      counters: (0..buckets).map(|_| AtomicU32::new(0)).collect(),
    }
  }

  /// `true` for exactly one caller per bucket.
  #[inline]
  pub fn try_claim(&self, bucket: usize) -> bool {
    self.counters[bucket].fetch_add(1, Ordering::AcqRel) == 0
  }

  /// Claim attempts made on `bucket` so far.
  pub fn attempts(&self, bucket: usize) -> u32 {
    self.counters[bucket].load(Ordering::Acquire)
  }

  #[inline]
  pub fn len(&self) -> usize {
    self.counters.len()
  }

  #[inline]
  pub fn is_empty(&self) -> bool {
    self.counters.is_empty()
  }
}

// =============================================================================
// Point merge task
// =============================================================================

struct PointMergeTask<'a> {
  fragments: &'a [PolyFragment],
  first_merged: usize,
  /// Occupied bucket indices; claims are indexed by position in this list.
  buckets: Vec<usize>,
  claims: BucketClaims,
  next_id: AtomicUsize,
  merged: AtomicUsize,
  coords: Vec<AtomicU64>,
  point_data: Vec<AtomicU64>,
  components: usize,
  maps: Vec<Vec<AtomicU32>>,
}

impl PointMergeTask<'_> {
  fn write_point(&self, id: usize, point: DVec3, data: &[f64]) {
    for (axis, v) in point.to_array().into_iter().enumerate() {
      self.coords[3 * id + axis].store(v.to_bits(), Ordering::Relaxed);
    }
    let c = self.components;
    for (k, v) in data.iter().enumerate() {
      self.point_data[c * id + k].store(v.to_bits(), Ordering::Relaxed);
    }
  }

  fn merge_bucket(&self, bucket: usize) {
    let mut known: SmallVec<[(u32, DVec3); 8]> = SmallVec::new();
    if self.first_merged == 1 {
      let seed = &self.fragments[0];
      for &local in seed.points.bucket(bucket) {
        known.push((local, seed.points.points()[local as usize]));
      }
    }

    for f in self.first_merged..self.fragments.len() {
      let fragment = &self.fragments[f];
      let locals = fragment.points.bucket(bucket);
      if locals.is_empty() {
        continue;
      }

      // Resolve against what is already merged; unresolved points become
      // fresh ids handed out in one batch.
      let mut resolved: SmallVec<[Result<u32, usize>; 8]> = SmallVec::new();
      let mut fresh: SmallVec<[(u32, DVec3); 8]> = SmallVec::new();
      for &local in locals {
        let p = fragment.points.points()[local as usize];
        if let Some(&(out, _)) = known.iter().find(|(_, q)| same_point(*q, p)) {
          resolved.push(Ok(out));
        } else if let Some(k) = fresh.iter().position(|(_, q)| same_point(*q, p)) {
          resolved.push(Err(k));
        } else {
          resolved.push(Err(fresh.len()));
          fresh.push((local, p));
        }
      }

      let base = self.next_id.fetch_add(fresh.len(), Ordering::Relaxed);
      let c = fragment.point_data.components;
      for (k, &(local, p)) in fresh.iter().enumerate() {
        let id = base + k;
        let data = if c == 0 { &[][..] } else { fragment.point_data.tuple(local as usize) };
        self.write_point(id, p, data);
        known.push((id as u32, p));
      }

      let map = &self.maps[f];
      for (&local, r) in locals.iter().zip(&resolved) {
        let out = match *r {
          Ok(out) => out,
          Err(k) => (base + k) as u32,
        };
        map[local as usize].store(out, Ordering::Relaxed);
      }
    }
  }
}

impl Task for PointMergeTask<'_> {
  fn execute(&self, _worker: WorkerId, _slot: usize) {
    for (claim, &bucket) in self.buckets.iter().enumerate() {
      if self.claims.try_claim(claim) {
        tracing::trace!(bucket, "bucket claimed");
        self.merge_bucket(bucket);
        self.merged.fetch_add(1, Ordering::Relaxed);
      }
    }
  }
}

// =============================================================================
// Cell remap
// =============================================================================

/// One fragment's pre-assigned output ranges for one topology.
#[derive(Default)]
struct TopologySlice<'a> {
  offsets: &'a mut [u32],
  connectivity: &'a mut [u32],
  cell_data: &'a mut [f64],
}

#[derive(Default)]
struct RemapJob<'a> {
  topologies: [TopologySlice<'a>; 4],
}

fn remap_fragment(fragment: &PolyFragment, map: &[u32], base: [usize; 4], job: &mut RemapJob<'_>) {
  let c = fragment.cell_data.components;
  let mut local_cell = 0;
  for topology in Topology::ALL {
    let array = fragment.cells.get(topology);
    let slice = &mut job.topologies[topology.index()];
    let conn_base = base[topology.index()] as u32;

    for (out, &end) in slice.offsets.iter_mut().zip(&array.offsets[1..]) {
      *out = conn_base + end;
    }
    for (out, &local) in slice.connectivity.iter_mut().zip(&array.connectivity) {
      *out = map[local as usize];
    }
    if c > 0 {
      let from = local_cell * c;
      slice
        .cell_data
        .copy_from_slice(&fragment.cell_data.values[from..from + array.len() * c]);
    }
    local_cell += array.len();
  }
}

// =============================================================================
// Entry point
// =============================================================================

/// Merge `fragments` into one point set with rewritten cell connectivity.
///
/// Two points merge iff their coordinates are bit-identical. Every fragment
/// must share one bucket grid and one attribute layout.
#[cfg_attr(feature = "profiling", tracing::instrument(skip_all, name = "merge::fragments"))]
pub fn merge_fragments(
  pool: &WorkerPool,
  fragments: &[PolyFragment],
  options: &MergeOptions,
) -> Result<MergeResult, MergeError> {
  let Some(first) = fragments.first() else {
    return Ok(MergeResult {
      output: PolyData::default(),
      point_maps: Vec::new(),
      buckets_merged: 0,
    });
  };
  validate(fragments)?;

  let point_components = first.point_data.components;
  let cell_components = first.cell_data.components;
  let upper_bound: usize = fragments.iter().map(|f| f.points.len()).sum();
  if upper_bound > u32::MAX as usize {
    return Err(MergeError::TooManyPoints(upper_bound));
  }

  // =========================================================================
  // Points
  // =========================================================================

  let mut buckets: Vec<usize> = fragments.iter().flat_map(|f| f.points.occupied_buckets()).collect();
  buckets.sort_unstable();
  buckets.dedup();

  let seeded = options.seeded;
  let task = PointMergeTask {
    fragments,
    first_merged: usize::from(seeded),
    claims: BucketClaims::new(buckets.len()),
    buckets,
    next_id: AtomicUsize::new(0),
    merged: AtomicUsize::new(0),
    coords: (0..3 * upper_bound).map(|_| AtomicU64::new(0)).collect(),
    point_data: (0..point_components * upper_bound).map(|_| AtomicU64::new(0)).collect(),
    components: point_components,
    maps: fragments
      .iter()
      .map(|f| (0..f.points.len()).map(|_| AtomicU32::new(0)).collect())
      .collect(),
  };

  if seeded {
    for (local, &p) in first.points.points().iter().enumerate() {
      let data = if point_components == 0 { &[][..] } else { first.point_data.tuple(local) };
      task.write_point(local, p, data);
      task.maps[0][local].store(local as u32, Ordering::Relaxed);
    }
    task.next_id.store(first.points.len(), Ordering::Relaxed);
  }

  pool.parallel(&task, pool.threads(), 0);

  let PointMergeTask {
    next_id,
    merged,
    coords,
    point_data,
    maps,
    ..
  } = task;
  let point_count = next_id.into_inner();
  let buckets_merged = merged.into_inner();

  let to_f64 = |a: AtomicU64| f64::from_bits(a.into_inner());
  let mut coords = coords.into_iter().map(to_f64);
  let points: Vec<DVec3> = (0..point_count)
    .map(|_| {
      let mut xyz = [0.0; 3];
      for v in &mut xyz {
        *v = coords.next().unwrap_or_default();
      }
      DVec3::from_array(xyz)
    })
    .collect();
  let point_values: Vec<f64> = point_data
    .into_iter()
    .take(point_components * point_count)
    .map(to_f64)
    .collect();
  let point_maps: Vec<Vec<u32>> = maps
    .into_iter()
    .map(|m| m.into_iter().map(AtomicU32::into_inner).collect())
    .collect();

  // =========================================================================
  // Cells
  // =========================================================================

  let offsets = OffsetManager::compute(fragments.iter().map(|f| &f.cells));
  let mut cells = Topologies::default();
  for topology in Topology::ALL {
    *cells.get_mut(topology) = CellArray {
      offsets: vec![0; offsets.cells(topology) + 1],
      connectivity: vec![0; offsets.connectivity(topology)],
    };
  }
  let mut cell_values = vec![0.0; cell_components * offsets.total_cells()];

  let mut jobs: Vec<RemapJob> = (0..fragments.len()).map(|_| RemapJob::default()).collect();
  {
    let Topologies {
      verts,
      lines,
      polys,
      strips,
    } = &mut cells;
    let mut data_rest: &mut [f64] = &mut cell_values;
    for (topology, array) in Topology::ALL.into_iter().zip([verts, lines, polys, strips]) {
      let mut offsets_rest: &mut [u32] = &mut array.offsets[1..];
      let mut conn_rest: &mut [u32] = &mut array.connectivity;
      for (job, fragment) in jobs.iter_mut().zip(fragments) {
        let local = fragment.cells.get(topology);
        let (o, rest) = std::mem::take(&mut offsets_rest).split_at_mut(local.len());
        offsets_rest = rest;
        let (k, rest) = std::mem::take(&mut conn_rest).split_at_mut(local.connectivity_len());
        conn_rest = rest;
        let (d, rest) = std::mem::take(&mut data_rest).split_at_mut(local.len() * cell_components);
        data_rest = rest;
        job.topologies[topology.index()] = TopologySlice {
          offsets: o,
          connectivity: k,
          cell_data: d,
        };
      }
    }
  }

  pool.parallel_each_mut(&mut jobs, 0, |_, f, job| {
    let base = Topology::ALL.map(|t| offsets.range(t, f).connectivity);
    remap_fragment(&fragments[f], &point_maps[f], base, job);
  });
  drop(jobs);

  tracing::debug!(
    fragments = fragments.len(),
    points = point_count,
    cells = offsets.total_cells(),
    buckets_merged,
    "fragments merged"
  );

  Ok(MergeResult {
    output: PolyData {
      points,
      point_data: AttributeTable {
        components: point_components,
        values: point_values,
      },
      cells,
      cell_data: AttributeTable {
        components: cell_components,
        values: cell_values,
      },
    },
    point_maps,
    buckets_merged,
  })
}

fn validate(fragments: &[PolyFragment]) -> Result<(), MergeError> {
  for (i, fragment) in fragments.iter().enumerate() {
    check_tuple_counts(i, [
      ("point", &fragment.point_data, fragment.points.len()),
      ("cell", &fragment.cell_data, fragment.cells.total_cells()),
    ])?;
  }

  let first = &fragments[0];
  for (i, fragment) in fragments.iter().enumerate().skip(1) {
    if fragment.points.grid() != first.points.grid() {
      return Err(MergeError::GridMismatch { fragment: i });
    }
    if fragment.point_data.components != first.point_data.components {
      return Err(MergeError::AttributeMismatch {
        fragment: i,
        kind: "point",
        expected: first.point_data.components,
        found: fragment.point_data.components,
      });
    }
    if fragment.cell_data.components != first.cell_data.components {
      return Err(MergeError::AttributeMismatch {
        fragment: i,
        kind: "cell",
        expected: first.cell_data.components,
        found: fragment.cell_data.components,
      });
    }
  }
  Ok(())
}

/// Every non-empty table must hold exactly one tuple per element.
pub(crate) fn check_tuple_counts(
  fragment: usize,
  tables: [(&'static str, &AttributeTable, usize); 2],
) -> Result<(), MergeError> {
  for (kind, table, expected) in tables {
    if table.components > 0 && table.tuple_count() != expected {
      return Err(MergeError::TupleCountMismatch {
        fragment,
        kind,
        expected,
        found: table.tuple_count(),
      });
    }
  }
  Ok(())
}

#[cfg(test)]
#[path = "engine_test.rs"]
mod engine_test;
