use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::*;
use crate::smp::{InitFlags, ThreadLocal};

fn pool(threads: usize, grain: usize) -> WorkerPool {
  WorkerPool::new(&PoolConfig {
    threads,
    grain,
    ..PoolConfig::default()
  })
  .expect("pool")
}

// =========================================================================
// Batch 1: Configuration
// =========================================================================

#[test]
fn test_default_config_uses_hardware_concurrency() {
  let config = PoolConfig::default();
  assert!(config.get_threads() >= 1);
  assert_eq!(config.get_grain(), 64);
}

#[test]
fn test_zero_grain_is_clamped() {
  let config = PoolConfig {
    grain: 0,
    ..PoolConfig::default()
  };
  assert_eq!(config.get_grain(), 1);
}

#[test]
fn test_slot_count_includes_caller() {
  let p = pool(3, 8);
  assert_eq!(p.threads(), 3);
  assert_eq!(p.slot_count(), 4);
  assert_eq!(p.current_worker(), WorkerId(3), "test thread is outside the pool");
}

#[test]
fn test_worker_threads_are_named() {
  let p = WorkerPool::new(&PoolConfig {
    threads: 2,
    thread_name_prefix: "named".to_string(),
    ..PoolConfig::default()
  })
  .unwrap();
  let name = p.install(|| std::thread::current().name().map(str::to_string));
  assert!(name.unwrap_or_default().starts_with("named-"));
}

// =========================================================================
// Batch 2: Parallel-for
// =========================================================================

/// Every index in the half-open range is visited exactly once.
#[test]
fn test_for_each_visits_each_index_once() {
  let p = pool(4, 7);
  let hits: Vec<AtomicUsize> = (0..1000).map(|_| AtomicUsize::new(0)).collect();

  p.for_each_fn(10, 990, |_, i| {
    hits[i].fetch_add(1, Ordering::Relaxed);
  });

  for (i, h) in hits.iter().enumerate() {
    let expected = usize::from((10..990).contains(&i));
    assert_eq!(h.load(Ordering::Relaxed), expected, "index {i}");
  }
}

#[test]
fn test_for_each_empty_range_is_noop() {
  let p = pool(2, 4);
  let calls = AtomicUsize::new(0);
  p.for_each_fn(5, 5, |_, _| {
    calls.fetch_add(1, Ordering::Relaxed);
  });
  p.for_each_fn(9, 3, |_, _| {
    calls.fetch_add(1, Ordering::Relaxed);
  });
  assert_eq!(calls.load(Ordering::Relaxed), 0);
}

#[test]
fn test_for_each_runs_on_pool_workers() {
  let p = pool(3, 1);
  let max_worker = AtomicUsize::new(0);
  p.for_each_fn(0, 200, |worker, _| {
    max_worker.fetch_max(worker.index(), Ordering::Relaxed);
  });
  assert!(max_worker.load(Ordering::Relaxed) < 3, "loop bodies never run on the caller slot");
}

/// Thread-local accumulation summed after the loop equals the serial sum.
#[test]
fn test_for_each_with_thread_local_sum() {
  let p = pool(4, 16);
  let tls: ThreadLocal<u64> = ThreadLocal::for_pool(&p);

  p.for_each_fn(0, 10_000, |worker, i| {
    *tls.get_or_init(worker, || 0) += i as u64;
  });

  let total: u64 = tls.into_values().into_iter().sum();
  assert_eq!(total, (0..10_000u64).sum());
}

struct CountingInit {
  flags: InitFlags,
  inits: AtomicUsize,
  visits: AtomicUsize,
}

impl Functor for CountingInit {
  fn execute(&self, worker: WorkerId, _index: usize) {
    assert!(self.flags.is_initialized(worker), "init runs before the first index");
    self.visits.fetch_add(1, Ordering::Relaxed);
  }
}

impl InitializableFunctor for CountingInit {
  fn init(&self, _worker: WorkerId) {
    self.inits.fetch_add(1, Ordering::Relaxed);
  }

  fn init_flags(&self) -> &InitFlags {
    &self.flags
  }
}

/// `init` runs exactly once per worker that touched the functor.
#[test]
fn test_for_each_init_runs_once_per_worker() {
  let p = pool(4, 3);
  let functor = CountingInit {
    flags: InitFlags::new(p.slot_count()),
    inits: AtomicUsize::new(0),
    visits: AtomicUsize::new(0),
  };

  p.for_each_init(0, 5000, &functor);
  p.for_each_init(0, 5000, &functor);

  assert_eq!(functor.visits.load(Ordering::Relaxed), 10_000);
  assert_eq!(functor.inits.load(Ordering::Relaxed), functor.flags.initialized_count());
  assert!(functor.inits.load(Ordering::Relaxed) <= p.threads());
}

// =========================================================================
// Batch 3: Fork-join tasks
// =========================================================================

struct RecordSlots {
  seen: Mutex<Vec<usize>>,
}

impl Task for RecordSlots {
  fn execute(&self, _worker: WorkerId, slot: usize) {
    self.seen.lock().unwrap().push(slot);
  }
}

#[test]
fn test_parallel_skips_leading_slots() {
  let p = pool(2, 1);
  let task = RecordSlots {
    seen: Mutex::new(Vec::new()),
  };

  p.parallel(&task, 6, 2);

  let mut seen = task.seen.into_inner().unwrap();
  seen.sort();
  assert_eq!(seen, vec![2, 3, 4, 5]);
}

#[test]
fn test_parallel_skip_past_end_is_noop() {
  let p = pool(2, 1);
  let task = RecordSlots {
    seen: Mutex::new(Vec::new()),
  };
  p.parallel(&task, 3, 3);
  assert!(task.seen.into_inner().unwrap().is_empty());
}

#[test]
fn test_parallel_each_mut_gives_exclusive_items() {
  let p = pool(3, 1);
  let mut items = vec![0usize; 8];
  p.parallel_each_mut(&mut items, 1, |_, slot, item| *item = slot * 10);
  assert_eq!(items, vec![0, 10, 20, 30, 40, 50, 60, 70]);
}

#[test]
fn test_fork_join_preserves_submission_order() {
  let p = pool(4, 1);
  let tasks: Vec<_> = (0..16usize).map(|i| move || i * i).collect();
  let results = p.fork_join(tasks);
  assert_eq!(results, (0..16usize).map(|i| i * i).collect::<Vec<_>>());
}

#[test]
fn test_fork_join_empty() {
  let p = pool(1, 1);
  let tasks: Vec<fn() -> u8> = Vec::new();
  assert!(p.fork_join(tasks).is_empty());
}
