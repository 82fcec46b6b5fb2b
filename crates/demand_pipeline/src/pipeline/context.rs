//! Explicit execution context handed to a pipeline at construction.
//!
//! Holds what would otherwise be process-wide state: the worker pool, the
//! execution strategy, the default extent translator, and the error channel.

use std::fmt;
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::error::{PipelineError, PoolError};
use crate::extent::BlockTranslator;
use crate::metadata::ObjectRef;
use crate::smp::WorkerPool;

/// How a stage forwards the data phase to its upstream branches.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ForwardMode {
  /// One branch after another on the calling thread.
  Serial,
  /// Independent branches as fork-join tasks on the pool.
  ForkJoin,
}

/// Chooses the forwarding mode for a stage with `branches` independent
/// upstream subgraphs.
pub trait ExecutionStrategy: Send + Sync + fmt::Debug {
  fn forward_mode(&self, branches: usize) -> ForwardMode;

  fn name(&self) -> &'static str;
}

/// Every stage runs on the calling thread.
#[derive(Clone, Copy, Debug, Default)]
pub struct SerialStrategy;

impl ExecutionStrategy for SerialStrategy {
  fn forward_mode(&self, _branches: usize) -> ForwardMode {
    ForwardMode::Serial
  }

  fn name(&self) -> &'static str {
    "serial"
  }
}

/// Fans the data phase of independent upstream branches out over the pool.
#[derive(Clone, Copy, Debug)]
pub struct ParallelUpstreamStrategy {
  /// Fewer independent branches than this are run serially.
  pub min_branches: usize,
}

impl Default for ParallelUpstreamStrategy {
  fn default() -> Self {
    Self { min_branches: 2 }
  }
}

impl ExecutionStrategy for ParallelUpstreamStrategy {
  fn forward_mode(&self, branches: usize) -> ForwardMode {
    if branches >= self.min_branches.max(2) {
      ForwardMode::ForkJoin
    } else {
      ForwardMode::Serial
    }
  }

  fn name(&self) -> &'static str {
    "parallel-upstream"
  }
}

// =============================================================================
// PipelineContext
// =============================================================================

pub struct PipelineContext {
  pool: Arc<WorkerPool>,
  strategy: Arc<dyn ExecutionStrategy>,
  translator: ObjectRef,
  errors_tx: Sender<PipelineError>,
  errors_rx: Receiver<PipelineError>,
}

impl PipelineContext {
  /// Serial strategy and block translator over `pool`.
  pub fn new(pool: Arc<WorkerPool>) -> Self {
    let (errors_tx, errors_rx) = unbounded();
    Self {
      pool,
      strategy: Arc::new(SerialStrategy),
      translator: BlockTranslator::shared(),
      errors_tx,
      errors_rx,
    }
  }

  /// Context over a fresh pool sized to hardware concurrency.
  pub fn with_default_pool() -> Result<Self, PoolError> {
    Ok(Self::new(Arc::new(WorkerPool::with_default_threads()?)))
  }

  pub fn with_strategy(mut self, strategy: impl ExecutionStrategy + 'static) -> Self {
    self.strategy = Arc::new(strategy);
    self
  }

  /// Translator installed on structured outputs that lack one.
  pub fn with_translator(mut self, translator: ObjectRef) -> Self {
    self.translator = translator;
    self
  }

  #[inline]
  pub fn pool(&self) -> &Arc<WorkerPool> {
    &self.pool
  }

  #[inline]
  pub fn strategy(&self) -> &dyn ExecutionStrategy {
    self.strategy.as_ref()
  }

  #[inline]
  pub fn default_translator(&self) -> &ObjectRef {
    &self.translator
  }

  /// Receiver for every failure the executive reports.
  pub fn errors(&self) -> Receiver<PipelineError> {
    self.errors_rx.clone()
  }

  /// Drain failures reported so far.
  pub fn take_errors(&self) -> Vec<PipelineError> {
    self.errors_rx.try_iter().collect()
  }

  pub(crate) fn report(&self, error: &PipelineError) {
    tracing::warn!(%error, "pipeline phase failed");
    // The context holds a receiver, so the channel never disconnects.
    let _ = self.errors_tx.send(error.clone());
  }
}

impl fmt::Debug for PipelineContext {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("PipelineContext")
      .field("pool", &self.pool)
      .field("strategy", &self.strategy.name())
      .field("pending_errors", &self.errors_rx.len())
      .finish()
  }
}
