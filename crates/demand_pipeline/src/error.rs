//! Error types shared across the crate.
//!
//! Executive failures carry enough context (stage name, port, offending
//! extents) to be reported through the pipeline error channel without the
//! receiver needing access to the pipeline itself.

use std::sync::Arc;

use thiserror::Error;

use crate::extent::{Extent, ExtentType};

/// Boxed error returned by algorithm callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure raised while driving a pipeline through its phases.
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
  // ---------------------------------------------------------------------------
  // Configuration errors
  // ---------------------------------------------------------------------------
  /// A metadata entry required by the output's data representation is absent.
  #[error("stage `{stage}` output {port}: missing required key `{key}`")]
  MissingKey {
    stage: String,
    port: usize,
    key: &'static str,
  },

  // ---------------------------------------------------------------------------
  // Range errors
  // ---------------------------------------------------------------------------
  /// A non-empty update extent reaches outside the whole extent.
  #[error("stage `{stage}` output {port}: update extent {update} is outside whole extent {whole}")]
  ExtentOutOfRange {
    stage: String,
    port: usize,
    update: Extent,
    whole: Extent,
  },

  // ---------------------------------------------------------------------------
  // Contract violations
  // ---------------------------------------------------------------------------
  /// The output has no data object to validate or fill.
  #[error("stage `{stage}` output {port}: no data object")]
  MissingDataObject { stage: String, port: usize },

  /// The algorithm left a data object of the wrong representation.
  #[error("stage `{stage}` output {port}: expected {expected:?} data, found {found:?}")]
  WrongDataKind {
    stage: String,
    port: usize,
    expected: ExtentType,
    found: ExtentType,
  },

  /// The algorithm callback itself failed.
  #[error("stage `{stage}` failed during {phase}: {source}")]
  Algorithm {
    stage: String,
    phase: &'static str,
    #[source]
    source: Arc<dyn std::error::Error + Send + Sync + 'static>,
  },

  // ---------------------------------------------------------------------------
  // Topology errors
  // ---------------------------------------------------------------------------
  /// Stage handle does not exist in this pipeline.
  #[error("unknown stage index {0}")]
  UnknownStage(u32),

  /// Stage handle was issued by a different pipeline.
  #[error("stage handle belongs to pipeline {found}, not {expected}")]
  ForeignStage { expected: u64, found: u64 },

  /// Port index past the stage's declared port count.
  #[error("stage `{stage}` has {count} {direction} port(s), port {port} requested")]
  InvalidPort {
    stage: String,
    direction: &'static str,
    port: usize,
    count: usize,
  },

  /// Connecting the stages would create a cycle.
  #[error("connecting `{producer}` into `{consumer}` would create a cycle")]
  WouldCycle { producer: String, consumer: String },

  /// A required input port has no connection.
  #[error("stage `{stage}` input {port} is not connected")]
  NotConnected { stage: String, port: usize },
}

impl PipelineError {
  /// Wraps an algorithm failure for the given stage and phase.
  pub fn algorithm(stage: &str, phase: &'static str, source: BoxError) -> Self {
    Self::Algorithm {
      stage: stage.to_string(),
      phase,
      source: Arc::from(source),
    }
  }

  /// True for errors raised by output validation (configuration or range).
  pub fn is_validation(&self) -> bool {
    matches!(
      self,
      Self::MissingKey { .. } | Self::ExtentOutOfRange { .. } | Self::MissingDataObject { .. }
    )
  }
}

/// Failure while combining per-thread fragments.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MergeError {
  /// Fragments disagree on the number of attribute components.
  #[error("fragment {fragment} has {found} {kind} components, expected {expected}")]
  AttributeMismatch {
    fragment: usize,
    kind: &'static str,
    expected: usize,
    found: usize,
  },

  /// A fragment's attribute table does not hold one tuple per point or cell.
  #[error("fragment {fragment} has {found} {kind} tuples, expected {expected}")]
  TupleCountMismatch {
    fragment: usize,
    kind: &'static str,
    expected: usize,
    found: usize,
  },

  /// Fragments were hashed into different bucket grids.
  #[error("fragment {fragment} uses a different bucket grid")]
  GridMismatch { fragment: usize },

  /// Merged output would exceed the 32-bit point id space.
  #[error("{0} points exceed the point id range")]
  TooManyPoints(usize),
}

/// Failure while building a spatial or scalar tree.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
  /// Nothing to index.
  #[error("no cells to build a scalar tree over")]
  NoCells,

  /// Branching factor below two cannot form a tree.
  #[error("branching factor {0} is below 2")]
  InvalidBranchingFactor(usize),
}

/// Failure while creating the worker pool.
#[derive(Debug, Error)]
#[error("failed to build worker pool: {0}")]
pub struct PoolError(#[from] pub rayon::ThreadPoolBuildError);
