//! [`Pipeline`]: owns the stage arena and drives updates through it.

use std::sync::atomic::{AtomicU64, Ordering};

use super::algorithm::{Algorithm, InputConnection};
use super::context::PipelineContext;
use super::data::DataObject;
use super::executive::{self, Pass};
use super::request::{Phase, Request};
use super::stage::{self, PipelineId, PortRef, Stage, StageId};
use crate::error::PipelineError;
use crate::extent::{Extent, ExtentType, PieceRequest};
use crate::metadata::keys::*;
use crate::metadata::Metadata;
use crate::metrics::ExecutionMetrics;

/// A DAG of stages plus the executive state needed to update it.
///
/// Stages are added by value and addressed by [`StageId`] handles. Every
/// update entry point takes `&mut self`, so at most one update runs per
/// pipeline at a time; the data phase may still fan out over the context's
/// worker pool.
#[derive(Debug)]
pub struct Pipeline {
  id: PipelineId,
  context: PipelineContext,
  stages: Vec<Stage>,
  clock: AtomicU64,
  epoch: u64,
}

impl Pipeline {
  pub fn new(context: PipelineContext) -> Self {
    Self {
      id: PipelineId::new(),
      context,
      stages: Vec::new(),
      clock: AtomicU64::new(0),
      epoch: 0,
    }
  }

  #[inline]
  pub fn id(&self) -> PipelineId {
    self.id
  }

  #[inline]
  pub fn context(&self) -> &PipelineContext {
    &self.context
  }

  pub fn len(&self) -> usize {
    self.stages.len()
  }

  pub fn is_empty(&self) -> bool {
    self.stages.is_empty()
  }

  fn tick(&self) -> u64 {
    self.clock.fetch_add(1, Ordering::SeqCst) + 1
  }

  fn begin_pass(&mut self) -> u64 {
    self.epoch += 1;
    self.epoch
  }

  // ===========================================================================
  // Topology
  // ===========================================================================

  pub fn add_stage(&mut self, algorithm: impl Algorithm + 'static) -> StageId {
    self.add_boxed_stage(Box::new(algorithm))
  }

  pub fn add_boxed_stage(&mut self, algorithm: Box<dyn Algorithm>) -> StageId {
    let id = StageId {
      pipeline: self.id,
      index: self.stages.len() as u32,
    };
    let modified_at = self.tick();
    tracing::debug!(stage = algorithm.name(), index = id.index, "stage added");
    self.stages.push(Stage::new(id, algorithm, modified_at));
    id
  }

  fn check(&self, id: StageId) -> Result<(), PipelineError> {
    if id.pipeline != self.id {
      return Err(PipelineError::ForeignStage {
        expected: self.id.raw(),
        found: id.pipeline.raw(),
      });
    }
    if id.index as usize >= self.stages.len() {
      return Err(PipelineError::UnknownStage(id.index));
    }
    Ok(())
  }

  /// Validated stage lookup.
  pub fn stage(&self, id: StageId) -> Result<&Stage, PipelineError> {
    self.check(id)?;
    stage::stage(&self.stages, id)
  }

  fn stage_mut(&mut self, id: StageId) -> Result<&mut Stage, PipelineError> {
    self.check(id)?;
    stage::stage_mut(&mut self.stages, id)
  }

  /// Feed `producer` into input `input` of `consumer`.
  ///
  /// Fails without changing the graph when either handle or port is invalid
  /// or the connection would close a cycle.
  pub fn connect(&mut self, producer: PortRef, consumer: StageId, input: usize) -> Result<(), PipelineError> {
    let producer_stage = self.stage(producer.stage)?;
    producer_stage.output(producer.port)?;
    let producer_type = producer_stage.algorithm.output_type(producer.port);
    let consumer_stage = self.stage(consumer)?;
    if input >= consumer_stage.inputs.len() {
      return Err(consumer_stage.invalid_port("input", input));
    }
    if stage::upstream_closure(&self.stages, producer.stage).contains(&consumer) {
      return Err(PipelineError::WouldCycle {
        producer: producer_stage.name().to_string(),
        consumer: consumer_stage.name().to_string(),
      });
    }

    let modified_at = self.tick();
    let s = self.stage_mut(consumer)?;
    s.inputs[input].connections.push(InputConnection {
      producer,
      producer_type,
      info: Metadata::new(),
      data: None,
    });
    s.modified_at = modified_at;
    tracing::debug!(
      producer = producer.stage.index,
      port = producer.port,
      consumer = consumer.index,
      input,
      "stages connected"
    );
    Ok(())
  }

  /// Remove the connection from `producer` into `consumer`'s input. Returns
  /// whether one existed.
  pub fn disconnect(&mut self, producer: PortRef, consumer: StageId, input: usize) -> Result<bool, PipelineError> {
    self.check(producer.stage)?;
    let modified_at = self.tick();
    let s = self.stage_mut(consumer)?;
    if input >= s.inputs.len() {
      return Err(s.invalid_port("input", input));
    }
    let connections = &mut s.inputs[input].connections;
    let before = connections.len();
    connections.retain(|c| c.producer != producer);
    let removed = connections.len() != before;
    if removed {
      s.modified_at = modified_at;
    }
    Ok(removed)
  }

  /// Mark a stage's parameters changed so its next data phase re-executes.
  pub fn modified(&mut self, id: StageId) -> Result<(), PipelineError> {
    let tick = self.tick();
    self.stage_mut(id)?.modified_at = tick;
    Ok(())
  }

  /// Mutable access to a stage's algorithm. Marks the stage modified.
  pub fn algorithm_mut(&mut self, id: StageId) -> Result<&mut dyn Algorithm, PipelineError> {
    let tick = self.tick();
    let s = self.stage_mut(id)?;
    s.modified_at = tick;
    Ok(s.algorithm.as_mut())
  }

  // ===========================================================================
  // Phases
  // ===========================================================================

  /// Bring output `port` of `id` up to date, re-running while any stage in
  /// its upstream closure reports more remaining.
  pub fn update(&mut self, id: StageId, port: usize) -> Result<(), PipelineError> {
    self.update_information(id)?;
    loop {
      self.propagate_update_extent(id, port)?;
      self.update_data(id, port)?;
      if !self.upstream_continuing(id) {
        return Ok(());
      }
    }
  }

  pub fn update_information(&mut self, id: StageId) -> Result<(), PipelineError> {
    self.check(id)?;
    let epoch = self.begin_pass();
    let pass = Pass {
      context: &self.context,
      clock: &self.clock,
      epoch,
    };
    executive::update_information(&mut self.stages, &pass, id)
  }

  pub fn propagate_update_extent(&mut self, id: StageId, port: usize) -> Result<(), PipelineError> {
    self.check(id)?;
    let pass = Pass {
      context: &self.context,
      clock: &self.clock,
      epoch: self.epoch,
    };
    executive::propagate_update_extent(&mut self.stages, &pass, id, port)
  }

  pub fn update_data(&mut self, id: StageId, port: usize) -> Result<(), PipelineError> {
    self.stage(id)?.output(port)?;
    let epoch = self.begin_pass();
    let pass = Pass {
      context: &self.context,
      clock: &self.clock,
      epoch,
    };
    executive::update_data(&mut self.stages, &pass, id, port)
  }

  /// Dispatch an arbitrary request at `id`. The three built-in phases route
  /// to their drivers; custom phases travel in the request's direction.
  pub fn process_request(&mut self, id: StageId, request: &Request) -> Result<(), PipelineError> {
    let port = request.from_port.unwrap_or(0);
    match request.phase {
      Phase::Information => self.update_information(id),
      Phase::UpdateExtent => self.propagate_update_extent(id, port),
      Phase::Data => self.update_data(id, port),
      Phase::Custom(_) => {
        self.check(id)?;
        let epoch = self.begin_pass();
        let pass = Pass {
          context: &self.context,
          clock: &self.clock,
          epoch,
        };
        executive::process_custom(&mut self.stages, &pass, id, request)
      }
    }
  }

  pub fn need_to_execute_data(&self, output: PortRef) -> Result<bool, PipelineError> {
    let s = self.stage(output.stage)?;
    s.output(output.port)?;
    Ok(executive::need_to_execute_data(s, output.port))
  }

  pub fn verify_output_information(&self, output: PortRef) -> Result<(), PipelineError> {
    executive::verify_output_information(self.stage(output.stage)?, output.port)
  }

  fn upstream_continuing(&self, id: StageId) -> bool {
    stage::upstream_closure(&self.stages, id)
      .into_iter()
      .filter_map(|s| self.stages.get(s.index as usize))
      .any(|s| s.continuing)
  }

  /// Iterate the chunks delivered to output `port` of `id` while upstream
  /// stages stream. Each item is one propagate + data pass.
  pub fn stream(&mut self, id: StageId, port: usize) -> ChunkStream<'_> {
    ChunkStream {
      pipeline: self,
      stage: id,
      port,
      index: 0,
      started: false,
      done: false,
    }
  }

  // ===========================================================================
  // Request setters
  // ===========================================================================

  /// Request `extent` from a structured output. Returns whether the request
  /// changed.
  pub fn set_update_extent(&mut self, output: PortRef, extent: Extent) -> Result<bool, PipelineError> {
    let info = self.output_info_mut(output)?;
    let changed = info.get(&UPDATE_EXTENT) != Some(extent) || !info.get(&UPDATE_EXTENT_INITIALIZED).unwrap_or(false);
    info.set(&UPDATE_EXTENT, extent);
    info.set(&UPDATE_EXTENT_INITIALIZED, true);
    Ok(changed)
  }

  /// Request the whole extent and the whole dataset as one piece. Requires
  /// the information phase to have run. Calling it twice in a row reports
  /// no change the second time.
  ///
  /// The request is left uninitialised so later information passes keep it
  /// tracking the whole extent until an explicit extent is set.
  pub fn set_update_extent_to_whole_extent(&mut self, output: PortRef) -> Result<bool, PipelineError> {
    let name = self.stage(output.stage)?.name().to_string();
    let info = self.output_info_mut(output)?;
    let whole = info.get(&WHOLE_EXTENT).ok_or(PipelineError::MissingKey {
      stage: name,
      port: output.port,
      key: WHOLE_EXTENT.name(),
    })?;
    let mut changed = info.get(&UPDATE_EXTENT) != Some(whole);
    changed |= executive::requested_piece(info) != PieceRequest::WHOLE;
    info.set(&UPDATE_EXTENT, whole);
    info.set(&UPDATE_EXTENT_INITIALIZED, false);
    executive::set_requested_piece(info, PieceRequest::WHOLE);
    Ok(changed)
  }

  /// Request one piece. On a structured output the piece is also translated
  /// into an update extent with the output's translator.
  pub fn set_update_piece(&mut self, output: PortRef, piece: PieceRequest) -> Result<bool, PipelineError> {
    let kind = self.stage(output.stage)?.algorithm.output_type(output.port);
    let fallback = self.context.default_translator().clone();
    let info = self.output_info_mut(output)?;
    let mut changed = executive::requested_piece(info) != piece;
    executive::set_requested_piece(info, piece);
    if kind == ExtentType::Structured && info.has(&WHOLE_EXTENT) {
      let extent = executive::translate_piece(info, &piece, &fallback);
      changed |= info.get(&UPDATE_EXTENT) != Some(extent);
      info.set(&UPDATE_EXTENT, extent);
      info.set(&UPDATE_EXTENT_INITIALIZED, true);
    }
    Ok(changed)
  }

  pub fn set_update_time_index(&mut self, output: PortRef, index: i32) -> Result<bool, PipelineError> {
    let info = self.output_info_mut(output)?;
    let changed = info.get(&UPDATE_TIME_INDEX) != Some(index);
    info.set(&UPDATE_TIME_INDEX, index);
    Ok(changed)
  }

  pub fn set_update_time_steps(&mut self, output: PortRef, steps: Vec<f64>) -> Result<bool, PipelineError> {
    let info = self.output_info_mut(output)?;
    let changed = info.get(&UPDATE_TIME_STEPS).as_ref() != Some(&steps);
    info.set(&UPDATE_TIME_STEPS, steps);
    Ok(changed)
  }

  /// Ask for structured data cropped to exactly the update extent.
  pub fn set_exact_extent(&mut self, output: PortRef, exact: bool) -> Result<(), PipelineError> {
    self.output_info_mut(output)?.set(&EXACT_EXTENT, exact);
    Ok(())
  }

  // ===========================================================================
  // Accessors
  // ===========================================================================

  pub fn output_info(&self, output: PortRef) -> Result<&Metadata, PipelineError> {
    Ok(&self.stage(output.stage)?.output(output.port)?.info)
  }

  pub fn output_info_mut(&mut self, output: PortRef) -> Result<&mut Metadata, PipelineError> {
    Ok(&mut self.stage_mut(output.stage)?.output_mut(output.port)?.info)
  }

  pub fn output_data(&self, output: PortRef) -> Result<Option<&DataObject>, PipelineError> {
    Ok(self.stage(output.stage)?.output(output.port)?.data.as_ref())
  }

  /// Drop negotiated phase entries from an output.
  pub fn reset_pipeline_information(&mut self, output: PortRef) -> Result<(), PipelineError> {
    self.output_info_mut(output)?.reset_pipeline_entries();
    Ok(())
  }

  pub fn metrics(&self, id: StageId) -> Result<&ExecutionMetrics, PipelineError> {
    Ok(self.stage(id)?.metrics())
  }

  pub fn stages(&self) -> impl Iterator<Item = &Stage> + '_ {
    self.stages.iter()
  }
}

// =============================================================================
// Streaming
// =============================================================================

/// One pass worth of streamed output.
#[derive(Debug, Clone)]
pub struct Chunk {
  /// Zero-based pass number.
  pub index: usize,
  pub data: Option<DataObject>,
  /// More passes will follow.
  pub more_remaining: bool,
}

/// Iterator returned by [`Pipeline::stream`]. Ends after the pass that
/// leaves no stage continuing, or after the first error.
pub struct ChunkStream<'p> {
  pipeline: &'p mut Pipeline,
  stage: StageId,
  port: usize,
  index: usize,
  started: bool,
  done: bool,
}

impl ChunkStream<'_> {
  fn pass(&mut self) -> Result<Chunk, PipelineError> {
    if !self.started {
      self.started = true;
      self.pipeline.update_information(self.stage)?;
    }
    self.pipeline.propagate_update_extent(self.stage, self.port)?;
    self.pipeline.update_data(self.stage, self.port)?;
    let data = self.pipeline.output_data(self.stage.port(self.port))?.cloned();
    let more_remaining = self.pipeline.upstream_continuing(self.stage);
    Ok(Chunk {
      index: self.index,
      data,
      more_remaining,
    })
  }
}

impl Iterator for ChunkStream<'_> {
  type Item = Result<Chunk, PipelineError>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.done {
      return None;
    }
    let result = self.pass();
    match &result {
      Ok(chunk) => self.done = !chunk.more_remaining,
      Err(_) => self.done = true,
    }
    self.index += 1;
    Some(result)
  }
}

#[cfg(test)]
#[path = "graph_test.rs"]
mod graph_test;
