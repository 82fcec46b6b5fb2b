//! Shared-memory parallel substrate.
//!
//! - [`WorkerPool`]: fixed worker threads running parallel-for loops and
//!   fork-join task groups
//! - [`ThreadLocal`]: one owned value per worker, created lazily
//! - [`Functor`] / [`InitializableFunctor`]: per-index loop bodies, with
//!   optional one-time per-worker setup
//! - [`Task`]: coarse unit of work addressed by slot

mod functor;
mod pool;
mod thread_local;

pub use functor::{FnFunctor, Functor, InitFlags, InitializableFunctor};
pub use pool::{PoolConfig, Task, WorkerId, WorkerPool};
pub use thread_local::ThreadLocal;
