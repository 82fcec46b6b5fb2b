//! Units of parallel work.
//!
//! A [`Functor`] is the per-index body of a parallel-for. Functors that need
//! per-thread setup (scratch buffers, thread-local accumulators) implement
//! [`InitializableFunctor`]; the pool then calls `init` exactly once per
//! worker before that worker's first index.

use std::sync::atomic::{AtomicBool, Ordering};

use super::pool::WorkerId;

/// Per-index body of a parallel loop.
///
/// Shared by reference across workers, so mutable scratch must live in
/// [`ThreadLocal`](super::ThreadLocal) storage or atomics.
pub trait Functor: Sync {
  fn execute(&self, worker: WorkerId, index: usize);
}

/// Functor with a one-time per-worker initializer.
pub trait InitializableFunctor: Functor {
  fn init(&self, worker: WorkerId);

  fn init_flags(&self) -> &InitFlags;

  /// Run `init` if this worker has not yet done so.
  fn ensure_initialized(&self, worker: WorkerId) {
    let flags = self.init_flags();
    if !flags.is_initialized(worker) {
      self.init(worker);
      flags.mark_initialized(worker);
    }
  }
}

/// Adapter turning a closure into a [`Functor`].
pub struct FnFunctor<F>(pub F);

impl<F> Functor for FnFunctor<F>
where
  F: Fn(WorkerId, usize) + Sync,
{
  #[inline]
  fn execute(&self, worker: WorkerId, index: usize) {
    (self.0)(worker, index)
  }
}

// =============================================================================
// InitFlags
// =============================================================================

/// Write-once "initialized" flag per worker slot.
///
/// Each flag is only ever written by its own worker, so relaxed ordering is
/// enough: the write is sequenced before any later read on that thread.
#[derive(Debug)]
pub struct InitFlags {
  flags: Box<[AtomicBool]>,
}

impl InitFlags {
  /// Flags for `slots` workers, all clear.
  pub fn new(slots: usize) -> Self {
    Self {
      flags: (0..slots).map(|_| AtomicBool::new(false)).collect(),
    }
  }

  /// Flag for `worker`. Indices past the end belong to threads outside the
  /// pool and share the last (caller) slot.
  #[inline]
  fn slot(&self, worker: WorkerId) -> Option<&AtomicBool> {
    let last = self.flags.len().checked_sub(1)?;
    self.flags.get(worker.index().min(last))
  }

  #[inline]
  pub fn is_initialized(&self, worker: WorkerId) -> bool {
    self.slot(worker).is_some_and(|f| f.load(Ordering::Relaxed))
  }

  #[inline]
  pub fn mark_initialized(&self, worker: WorkerId) {
    if let Some(f) = self.slot(worker) {
      f.store(true, Ordering::Relaxed);
    }
  }

  /// Number of workers that have run their initializer.
  pub fn initialized_count(&self) -> usize {
    self.flags.iter().filter(|f| f.load(Ordering::Relaxed)).count()
  }

  /// Clear every flag; requires exclusive access so no worker is mid-run.
  pub fn reset(&mut self) {
    for f in self.flags.iter_mut() {
      *f.get_mut() = false;
    }
  }
}

#[cfg(test)]
#[path = "functor_test.rs"]
mod functor_test;
