//! Per-worker owned state.
//!
//! ```text
//!   ThreadLocal<T>  (slot_count = threads + 1)
//!   ┌────────┬────────┬────────┬────────┐
//!   │ slot 0 │ slot 1 │  ...   │ caller │
//!   │ T      │ (none) │        │ T      │
//!   └────────┴────────┴────────┴────────┘
//!     created lazily, at most once per slot
//! ```
//!
//! During a parallel section each worker only touches its own slot, so the
//! per-slot lock is never contended. After the section the owner takes the
//! values out with exclusive access and no locking.

use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

use super::pool::{WorkerId, WorkerPool};

/// One lazily-created `T` per worker slot.
#[derive(Debug)]
pub struct ThreadLocal<T> {
  slots: Box<[OnceLock<Mutex<T>>]>,
}

impl<T> ThreadLocal<T> {
  /// Storage with `slots` empty slots.
  pub fn new(slots: usize) -> Self {
    Self {
      slots: (0..slots).map(|_| OnceLock::new()).collect(),
    }
  }

  /// Storage sized for every worker of `pool`, plus the calling thread.
  pub fn for_pool(pool: &WorkerPool) -> Self {
    Self::new(pool.slot_count())
  }

  #[inline]
  pub fn slot_count(&self) -> usize {
    self.slots.len()
  }

  /// Create the worker's value if absent and lock it.
  ///
  /// A slot is constructed at most once; later calls return the existing
  /// value and drop `value`.
  ///
  /// # Panics
  /// If `worker` is outside the slot range.
  pub fn construct(&self, worker: WorkerId, value: T) -> MutexGuard<'_, T> {
    self.get_or_init(worker, || value)
  }

  /// The worker's value, creating it with `init` on first access.
  ///
  /// # Panics
  /// If `worker` is outside the slot range.
  pub fn get_or_init(&self, worker: WorkerId, init: impl FnOnce() -> T) -> MutexGuard<'_, T> {
    let slot = &self.slots[worker.index()];
    slot
      .get_or_init(|| Mutex::new(init()))
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
  }

  /// The worker's value if it was constructed.
  pub fn lookup(&self, worker: WorkerId) -> Option<MutexGuard<'_, T>> {
    self
      .slots
      .get(worker.index())?
      .get()
      .map(|m| m.lock().unwrap_or_else(PoisonError::into_inner))
  }

  /// Number of slots constructed so far.
  pub fn constructed(&self) -> usize {
    self.slots.iter().filter(|s| s.get().is_some()).count()
  }

  /// Constructed values from slot `skip` on, with exclusive access.
  pub fn iter_mut(&mut self, skip: usize) -> impl Iterator<Item = (WorkerId, &mut T)> + '_ {
    self
      .slots
      .iter_mut()
      .enumerate()
      .skip(skip)
      .filter_map(|(i, slot)| {
        slot
          .get_mut()
          .map(|m| (WorkerId(i), m.get_mut().unwrap_or_else(PoisonError::into_inner)))
      })
  }

  /// Consume the storage, yielding constructed values in slot order.
  pub fn into_values(self) -> Vec<T> {
    self
      .slots
      .into_vec()
      .into_iter()
      .filter_map(|slot| slot.into_inner())
      .map(|m| m.into_inner().unwrap_or_else(PoisonError::into_inner))
      .collect()
  }
}

#[cfg(test)]
#[path = "thread_local_test.rs"]
mod thread_local_test;
