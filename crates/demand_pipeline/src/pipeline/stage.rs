//! Stage arena: handles, per-stage state, and disjoint views for fork-join.
//!
//! ```text
//!   Pipeline
//!   └── stages: Vec<Stage>          indexed by StageId::index
//!         ├── algorithm             Box<dyn Algorithm>
//!         ├── inputs[i].connections[j] -> PortRef (producer stage, port)
//!         └── outputs[p]            info + data + generated_at
//! ```
//!
//! Connections point upstream by handle, never by reference, so a stage owns
//! only its own ports. The executive walks the graph through
//! [`StageTable`], which is implemented both for the whole arena and for a
//! [`BranchTable`] holding `&mut` to one disjoint upstream subgraph.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use super::algorithm::{Algorithm, InputPort, OutputPort};
use crate::error::PipelineError;
use crate::metrics::ExecutionMetrics;

// =============================================================================
// Handles
// =============================================================================

static PIPELINE_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Opaque pipeline identifier, unique within the process lifetime.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct PipelineId(u64);

impl PipelineId {
  pub fn new() -> Self {
    Self(PIPELINE_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
  }

  pub fn raw(&self) -> u64 {
    self.0
  }
}

impl Default for PipelineId {
  fn default() -> Self {
    Self::new()
  }
}

/// Handle to a stage inside one pipeline.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct StageId {
  pub(crate) pipeline: PipelineId,
  pub(crate) index: u32,
}

impl StageId {
  #[inline]
  pub fn index(&self) -> u32 {
    self.index
  }

  #[inline]
  pub fn pipeline(&self) -> PipelineId {
    self.pipeline
  }

  /// Output port `port` of this stage.
  #[inline]
  pub fn port(self, port: usize) -> PortRef {
    PortRef { stage: self, port }
  }
}

/// One output port of one stage.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct PortRef {
  pub stage: StageId,
  pub port: usize,
}

// =============================================================================
// Stage
// =============================================================================

/// Arena entry: the algorithm plus everything the executive tracks for it.
pub struct Stage {
  pub(crate) id: StageId,
  pub(crate) algorithm: Box<dyn Algorithm>,
  pub(crate) inputs: Vec<InputPort>,
  pub(crate) outputs: Vec<OutputPort>,
  /// Clock tick of the last parameter or topology change.
  pub(crate) modified_at: u64,
  /// Clock tick of the last successful data phase.
  pub(crate) executed_at: u64,
  /// Last data phase reported more remaining.
  pub(crate) continuing: bool,
  /// Pass markers so shared upstream stages run once per pass.
  pub(crate) information_epoch: u64,
  pub(crate) data_epoch: u64,
  pub(crate) custom_epoch: u64,
  pub(crate) metrics: ExecutionMetrics,
}

impl Stage {
  pub(crate) fn new(id: StageId, algorithm: Box<dyn Algorithm>, modified_at: u64) -> Self {
    let inputs = (0..algorithm.input_ports()).map(|_| InputPort::default()).collect();
    let outputs = (0..algorithm.output_ports()).map(|_| OutputPort::default()).collect();
    Self {
      id,
      algorithm,
      inputs,
      outputs,
      modified_at,
      executed_at: 0,
      continuing: false,
      information_epoch: 0,
      data_epoch: 0,
      custom_epoch: 0,
      metrics: ExecutionMetrics::new(),
    }
  }

  #[inline]
  pub fn id(&self) -> StageId {
    self.id
  }

  #[inline]
  pub fn name(&self) -> &str {
    self.algorithm.name()
  }

  #[inline]
  pub fn inputs(&self) -> &[InputPort] {
    &self.inputs
  }

  #[inline]
  pub fn outputs(&self) -> &[OutputPort] {
    &self.outputs
  }

  #[inline]
  pub fn metrics(&self) -> &ExecutionMetrics {
    &self.metrics
  }

  #[inline]
  pub fn is_continuing(&self) -> bool {
    self.continuing
  }

  pub(crate) fn output(&self, port: usize) -> Result<&OutputPort, PipelineError> {
    self.outputs.get(port).ok_or_else(|| self.invalid_port("output", port))
  }

  pub(crate) fn output_mut(&mut self, port: usize) -> Result<&mut OutputPort, PipelineError> {
    let count = self.outputs.len();
    match self.outputs.get_mut(port) {
      Some(output) => Ok(output),
      None => Err(PipelineError::InvalidPort {
        stage: self.algorithm.name().to_string(),
        direction: "output",
        port,
        count,
      }),
    }
  }

  pub(crate) fn invalid_port(&self, direction: &'static str, port: usize) -> PipelineError {
    let count = match direction {
      "input" => self.inputs.len(),
      _ => self.outputs.len(),
    };
    PipelineError::InvalidPort {
      stage: self.name().to_string(),
      direction,
      port,
      count,
    }
  }

  /// Distinct producer stages across every input connection, in port order.
  pub(crate) fn producers(&self) -> Vec<StageId> {
    let mut seen = HashSet::new();
    self
      .inputs
      .iter()
      .flat_map(|input| input.connections.iter())
      .map(|conn| conn.producer.stage)
      .filter(|id| seen.insert(*id))
      .collect()
  }
}

impl std::fmt::Debug for Stage {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Stage")
      .field("id", &self.id)
      .field("name", &self.name())
      .field("modified_at", &self.modified_at)
      .field("executed_at", &self.executed_at)
      .field("continuing", &self.continuing)
      .finish()
  }
}

// =============================================================================
// StageTable
// =============================================================================

/// Lookup surface the executive recurses through.
pub(crate) trait StageTable: Send {
  fn get(&self, id: StageId) -> Option<&Stage>;

  fn get_mut(&mut self, id: StageId) -> Option<&mut Stage>;

  /// Every stage id in the table.
  fn ids(&self) -> Vec<StageId>;

  /// Hand out one table per group. Stages in no group are left out; a stage
  /// listed in several groups goes to the first.
  fn split<'s>(&'s mut self, groups: &[HashSet<StageId>]) -> Vec<BranchTable<'s>>;
}

pub(crate) fn stage(table: &dyn StageTable, id: StageId) -> Result<&Stage, PipelineError> {
  table.get(id).ok_or(PipelineError::UnknownStage(id.index))
}

pub(crate) fn stage_mut(table: &mut dyn StageTable, id: StageId) -> Result<&mut Stage, PipelineError> {
  table.get_mut(id).ok_or(PipelineError::UnknownStage(id.index))
}

/// `id` plus every stage it transitively reads from.
pub(crate) fn upstream_closure(table: &dyn StageTable, id: StageId) -> HashSet<StageId> {
  let mut closure = HashSet::new();
  let mut stack = vec![id];
  while let Some(next) = stack.pop() {
    if !closure.insert(next) {
      continue;
    }
    if let Some(stage) = table.get(next) {
      stack.extend(stage.producers());
    }
  }
  closure
}

fn assign<'s>(
  stages: impl Iterator<Item = &'s mut Stage>,
  groups: &[HashSet<StageId>],
) -> Vec<BranchTable<'s>> {
  let mut tables: Vec<BranchTable<'s>> = groups.iter().map(|_| BranchTable::default()).collect();
  for stage in stages {
    if let Some(slot) = groups.iter().position(|g| g.contains(&stage.id)) {
      tables[slot].stages.insert(stage.id, stage);
    }
  }
  tables
}

impl StageTable for Vec<Stage> {
  fn get(&self, id: StageId) -> Option<&Stage> {
    self.as_slice().get(id.index as usize)
  }

  fn get_mut(&mut self, id: StageId) -> Option<&mut Stage> {
    self.as_mut_slice().get_mut(id.index as usize)
  }

  fn ids(&self) -> Vec<StageId> {
    self.iter().map(|s| s.id).collect()
  }

  fn split<'s>(&'s mut self, groups: &[HashSet<StageId>]) -> Vec<BranchTable<'s>> {
    assign(self.iter_mut(), groups)
  }
}

/// Exclusive view of one upstream subgraph, sent to a fork-join task.
#[derive(Default)]
pub(crate) struct BranchTable<'a> {
  stages: HashMap<StageId, &'a mut Stage>,
}

impl BranchTable<'_> {
  pub(crate) fn len(&self) -> usize {
    self.stages.len()
  }
}

impl StageTable for BranchTable<'_> {
  fn get(&self, id: StageId) -> Option<&Stage> {
    self.stages.get(&id).map(|s| &**s)
  }

  fn get_mut(&mut self, id: StageId) -> Option<&mut Stage> {
    self.stages.get_mut(&id).map(|s| &mut **s)
  }

  fn ids(&self) -> Vec<StageId> {
    self.stages.keys().copied().collect()
  }

  fn split<'s>(&'s mut self, groups: &[HashSet<StageId>]) -> Vec<BranchTable<'s>> {
    assign(self.stages.values_mut().map(|s| &mut **s), groups)
  }
}
