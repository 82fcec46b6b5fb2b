//! Fixed-size worker pool on top of rayon.
//!
//! All entry points are synchronous: the caller blocks at the fork-join
//! barrier until every spawned unit of work has finished.
//!
//! # Usage
//!
//! ```ignore
//! let pool = WorkerPool::new(&PoolConfig::default())?;
//!
//! // Flat data-parallel loop over [0, n).
//! pool.for_each_fn(0, n, |worker, i| { /* ... */ });
//!
//! // One coarse task per slot, skipping slot 0.
//! pool.parallel(&merge_task, slot_count, 1);
//! ```

use rayon::prelude::*;

use super::functor::{FnFunctor, Functor, InitializableFunctor};
use crate::error::PoolError;

// =============================================================================
// WorkerId
// =============================================================================

/// Index of the worker executing a unit of work.
///
/// Pool threads are `0..threads`; any thread outside the pool (the caller
/// of a synchronous entry point, for instance) maps to the extra slot
/// `threads`. Thread-local storage therefore needs [`WorkerPool::slot_count`]
/// slots.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(pub usize);

impl WorkerId {
  #[inline]
  pub fn index(self) -> usize {
    self.0
  }
}

// =============================================================================
// Configuration
// =============================================================================

/// Worker pool configuration.
#[derive(Clone, Debug)]
pub struct PoolConfig {
  /// Worker thread count. `0` means hardware concurrency.
  pub threads: usize,

  /// Prefix for worker thread names (`{prefix}-{index}`).
  pub thread_name_prefix: String,

  /// Minimum indices handed to one worker at a time by `for_each`.
  pub grain: usize,
}

impl PoolConfig {
  /// Resolved thread count.
  pub fn get_threads(&self) -> usize {
    if self.threads == 0 {
      std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
    } else {
      self.threads
    }
  }

  /// Grain size never below one.
  #[inline]
  pub fn get_grain(&self) -> usize {
    self.grain.max(1)
  }
}

impl Default for PoolConfig {
  fn default() -> Self {
    Self {
      threads: 0,
      thread_name_prefix: "smp-worker".to_string(),
      grain: 64,
    }
  }
}

// =============================================================================
// Coarse tasks
// =============================================================================

/// A unit of fork-join work addressed by slot rather than by loop index.
pub trait Task: Sync {
  fn execute(&self, worker: WorkerId, slot: usize);
}

// =============================================================================
// WorkerPool
// =============================================================================

/// Fixed OS-thread pool executing index ranges and task groups.
pub struct WorkerPool {
  pool: rayon::ThreadPool,
  threads: usize,
  grain: usize,
}

impl WorkerPool {
  /// Build a pool with named worker threads.
  pub fn new(config: &PoolConfig) -> Result<Self, PoolError> {
    let threads = config.get_threads();
    let prefix = config.thread_name_prefix.clone();
    let pool = rayon::ThreadPoolBuilder::new()
      .num_threads(threads)
      .thread_name(move |i| format!("{prefix}-{i}"))
      .build()?;

    tracing::debug!(threads, grain = config.get_grain(), "worker pool started");

    Ok(Self {
      pool,
      threads,
      grain: config.get_grain(),
    })
  }

  /// Pool sized to hardware concurrency.
  pub fn with_default_threads() -> Result<Self, PoolError> {
    Self::new(&PoolConfig::default())
  }

  #[inline]
  pub fn threads(&self) -> usize {
    self.threads
  }

  /// Slots needed by per-worker storage: one per pool thread plus the caller.
  #[inline]
  pub fn slot_count(&self) -> usize {
    self.threads + 1
  }

  #[inline]
  pub fn grain(&self) -> usize {
    self.grain
  }

  /// Worker id of the calling thread.
  #[inline]
  pub fn current_worker(&self) -> WorkerId {
    WorkerId(self.pool.current_thread_index().unwrap_or(self.threads))
  }

  /// Run `op` inside the pool so nested rayon calls use its threads.
  pub fn install<R: Send>(&self, op: impl FnOnce() -> R + Send) -> R {
    self.pool.install(op)
  }

  // ===========================================================================
  // Parallel-for
  // ===========================================================================

  /// Apply `functor` to every index in `[first, last)`.
  ///
  /// Only this range is partitioned; nested axes are the functor's business.
  #[cfg_attr(feature = "profiling", tracing::instrument(skip_all, name = "smp::for_each"))]
  pub fn for_each<F: Functor + ?Sized>(&self, first: usize, last: usize, functor: &F) {
    self.for_each_chunked(first, last, |_| {}, functor);
  }

  /// Like [`WorkerPool::for_each`], calling `init` once per worker first.
  #[cfg_attr(feature = "profiling", tracing::instrument(skip_all, name = "smp::for_each_init"))]
  pub fn for_each_init<F: InitializableFunctor + ?Sized>(&self, first: usize, last: usize, functor: &F) {
    self.for_each_chunked(first, last, |worker| functor.ensure_initialized(worker), functor);
  }

  /// Closure form of [`WorkerPool::for_each`].
  pub fn for_each_fn<F>(&self, first: usize, last: usize, body: F)
  where
    F: Fn(WorkerId, usize) + Sync,
  {
    self.for_each(first, last, &FnFunctor(body));
  }

  fn for_each_chunked<F, P>(&self, first: usize, last: usize, prepare: P, functor: &F)
  where
    F: Functor + ?Sized,
    P: Fn(WorkerId) + Sync,
  {
    if first >= last {
      return;
    }
    let grain = self.grain;
    let chunks = (last - first).div_ceil(grain);

    self.pool.install(|| {
      (0..chunks).into_par_iter().for_each(|chunk| {
        let worker = self.current_worker();
        prepare(worker);
        let begin = first + chunk * grain;
        let end = (begin + grain).min(last);
        for index in begin..end {
          functor.execute(worker, index);
        }
      });
    });
  }

  // ===========================================================================
  // Fork-join tasks
  // ===========================================================================

  /// Run `task` once for every slot in `skip..slots`, in parallel.
  #[cfg_attr(feature = "profiling", tracing::instrument(skip_all, name = "smp::parallel"))]
  pub fn parallel<T: Task + ?Sized>(&self, task: &T, slots: usize, skip: usize) {
    if skip >= slots {
      return;
    }
    self.pool.install(|| {
      (skip..slots).into_par_iter().for_each(|slot| {
        task.execute(self.current_worker(), slot);
      });
    });
  }

  /// Give each item in `items[skip..]` to `body` exclusively, in parallel.
  pub fn parallel_each_mut<T, F>(&self, items: &mut [T], skip: usize, body: F)
  where
    T: Send,
    F: Fn(WorkerId, usize, &mut T) + Sync,
  {
    if skip >= items.len() {
      return;
    }
    self.pool.install(|| {
      items[skip..]
        .par_iter_mut()
        .enumerate()
        .for_each(|(offset, item)| body(self.current_worker(), skip + offset, item));
    });
  }

  /// Run independent closures concurrently and collect their results in
  /// submission order.
  pub fn fork_join<R, F>(&self, tasks: Vec<F>) -> Vec<R>
  where
    R: Send,
    F: FnOnce() -> R + Send,
  {
    match tasks.len() {
      0 => Vec::new(),
      1 => tasks.into_iter().map(|t| t()).collect(),
      _ => self
        .pool
        .install(|| tasks.into_par_iter().map(|t| t()).collect()),
    }
  }
}

impl std::fmt::Debug for WorkerPool {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("WorkerPool")
      .field("threads", &self.threads)
      .field("grain", &self.grain)
      .finish()
  }
}

#[cfg(test)]
#[path = "pool_test.rs"]
mod pool_test;
