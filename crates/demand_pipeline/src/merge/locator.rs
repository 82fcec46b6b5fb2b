//! Point locators keyed by a [`BucketGrid`].
//!
//! [`LocalPointSet`] is the per-worker locator: owned by one worker, no
//! synchronization, later combined by [`merge_fragments`](super::merge_fragments).
//! [`SharedPointLocator`] is the lock-based alternative for inserting a raw
//! point stream from many workers directly into one set.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};

use glam::DVec3;
use smallvec::SmallVec;

use super::grid::BucketGrid;
use crate::error::MergeError;
use crate::smp::WorkerPool;

/// Bit-identical coordinate comparison (`-0.0 != 0.0`, equal NaNs match).
#[inline]
pub fn same_point(a: DVec3, b: DVec3) -> bool {
  a.x.to_bits() == b.x.to_bits() && a.y.to_bits() == b.y.to_bits() && a.z.to_bits() == b.z.to_bits()
}

// =============================================================================
// LocalPointSet
// =============================================================================

/// Deduplicated point set with local ids `0..len`, bucketed on a shared grid.
#[derive(Clone, Debug)]
pub struct LocalPointSet {
  grid: BucketGrid,
  points: Vec<DVec3>,
  buckets: HashMap<usize, SmallVec<[u32; 4]>>,
}

impl LocalPointSet {
  pub fn new(grid: BucketGrid) -> Self {
    Self {
      grid,
      points: Vec::new(),
      buckets: HashMap::new(),
    }
  }

  /// Local id of `point`, inserting it if no bit-identical point exists.
  ///
  /// Returns `(id, inserted)`.
  pub fn insert_unique(&mut self, point: DVec3) -> (u32, bool) {
    let bucket = self.grid.bucket_index(point);
    let ids = self.buckets.entry(bucket).or_default();
    if let Some(&id) = ids.iter().find(|&&id| same_point(self.points[id as usize], point)) {
      return (id, false);
    }
    let id = self.points.len() as u32;
    self.points.push(point);
    ids.push(id);
    (id, true)
  }

  /// Insert without a duplicate check.
  pub fn insert_point(&mut self, point: DVec3) -> u32 {
    let id = self.points.len() as u32;
    self.points.push(point);
    self.buckets.entry(self.grid.bucket_index(point)).or_default().push(id);
    id
  }

  #[inline]
  pub fn grid(&self) -> &BucketGrid {
    &self.grid
  }

  #[inline]
  pub fn points(&self) -> &[DVec3] {
    &self.points
  }

  #[inline]
  pub fn len(&self) -> usize {
    self.points.len()
  }

  #[inline]
  pub fn is_empty(&self) -> bool {
    self.points.is_empty()
  }

  /// Local ids in `bucket`, in insertion order.
  pub fn bucket(&self, bucket: usize) -> &[u32] {
    self.buckets.get(&bucket).map_or(&[][..], |ids| ids.as_slice())
  }

  /// Indices of the buckets holding at least one point.
  pub fn occupied_buckets(&self) -> impl Iterator<Item = usize> + '_ {
    self.buckets.keys().copied()
  }
}

// =============================================================================
// SharedPointLocator
// =============================================================================

/// Concurrent deduplicating locator with one lock per bucket.
///
/// Ids are handed out by an atomic counter, so they are unique but depend
/// on arrival order.
#[derive(Debug)]
pub struct SharedPointLocator {
  grid: BucketGrid,
  buckets: Box<[Mutex<SmallVec<[(u32, DVec3); 4]>>]>,
  next_id: AtomicU32,
}

impl SharedPointLocator {
  pub fn new(grid: BucketGrid) -> Self {
    Self {
      buckets: (0..grid.bucket_count()).map(|_| Mutex::new(SmallVec::new())).collect(),
      grid,
      next_id: AtomicU32::new(0),
    }
  }

  /// Id of `point`, inserting it if absent. Safe to call from many workers.
  ///
  /// Returns `(id, inserted)`.
  pub fn insert_unique(&self, point: DVec3) -> Result<(u32, bool), MergeError> {
    let mut bucket = self.buckets[self.grid.bucket_index(point)]
      .lock()
      .unwrap_or_else(PoisonError::into_inner);
    if let Some(&(id, _)) = bucket.iter().find(|(_, p)| same_point(*p, point)) {
      return Ok((id, false));
    }
    let id = self
      .next_id
      .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_add(1))
      .map_err(|n| MergeError::TooManyPoints(n as usize + 1))?;
    bucket.push((id, point));
    Ok((id, true))
  }

  /// Insert every input in parallel, returning each input's id.
  pub fn insert_all(&self, pool: &WorkerPool, inputs: &[DVec3]) -> Result<Vec<u32>, MergeError> {
    let ids: Vec<AtomicU32> = (0..inputs.len()).map(|_| AtomicU32::new(0)).collect();
    let overflow = AtomicBool::new(false);
    pool.for_each_fn(0, inputs.len(), |_, i| match self.insert_unique(inputs[i]) {
      Ok((id, _)) => ids[i].store(id, Ordering::Relaxed),
      Err(_) => overflow.store(true, Ordering::Relaxed),
    });
    if overflow.into_inner() {
      return Err(MergeError::TooManyPoints(inputs.len()));
    }
    Ok(ids.into_iter().map(AtomicU32::into_inner).collect())
  }

  #[inline]
  pub fn len(&self) -> usize {
    self.next_id.load(Ordering::Relaxed) as usize
  }

  #[inline]
  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Points indexed by id.
  pub fn into_points(self) -> Vec<DVec3> {
    let mut points = vec![DVec3::ZERO; self.len()];
    for bucket in self.buckets.into_vec() {
      for (id, p) in bucket.into_inner().unwrap_or_else(PoisonError::into_inner) {
        points[id as usize] = p;
      }
    }
    points
  }
}

#[cfg(test)]
#[path = "locator_test.rs"]
mod locator_test;
