//! Mock algorithms shared by executive tests.
//!
//! Every mock records what it saw into shared [`Recorder`]s so tests can
//! inspect calls after the algorithm has been moved into a pipeline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use glam::DVec3;

use super::algorithm::{Algorithm, InputPort, OutputPort, Production};
use super::data::{DataObject, ScalarGrid};
use super::executive::requested_piece;
use super::request::{Phase, Request};
use super::stage::StageId;
use super::{Pipeline, PipelineContext};
use crate::error::BoxError;
use crate::extent::{Extent, ExtentType, PieceRequest};
use crate::merge::PolyData;
use crate::metadata::keys::*;
use crate::smp::{PoolConfig, WorkerPool};

/// Shared append-only record.
#[derive(Debug)]
pub struct Recorder<T>(Arc<Mutex<Vec<T>>>);

impl<T> Clone for Recorder<T> {
  fn clone(&self) -> Self {
    Self(Arc::clone(&self.0))
  }
}

impl<T> Default for Recorder<T> {
  fn default() -> Self {
    Self(Arc::new(Mutex::new(Vec::new())))
  }
}

impl<T: Clone> Recorder<T> {
  pub fn push(&self, value: T) {
    self.0.lock().unwrap().push(value);
  }

  pub fn all(&self) -> Vec<T> {
    self.0.lock().unwrap().clone()
  }

  pub fn last(&self) -> Option<T> {
    self.0.lock().unwrap().last().cloned()
  }

  pub fn len(&self) -> usize {
    self.0.lock().unwrap().len()
  }

  pub fn clear(&self) {
    self.0.lock().unwrap().clear();
  }
}

/// `"{stage}:{phase}"` entries in call order.
pub type Log = Recorder<String>;

impl Log {
  pub fn count(&self, entry: &str) -> usize {
    self.all().iter().filter(|e| *e == entry).count()
  }

  fn record(&self, stage: &str, request: &Request) {
    self.push(format!("{stage}:{}", request.phase.name()));
  }
}

pub fn grid_value(i: i32, j: i32, k: i32) -> f64 {
  (i + 10 * j + 100 * k) as f64
}

pub fn context(threads: usize) -> PipelineContext {
  let pool = WorkerPool::new(&PoolConfig {
    threads,
    ..PoolConfig::default()
  })
  .unwrap();
  PipelineContext::new(Arc::new(pool))
}

pub fn pipeline() -> Pipeline {
  Pipeline::new(context(2))
}

fn input_grid(inputs: &[InputPort], port: usize) -> Result<&ScalarGrid, BoxError> {
  inputs
    .get(port)
    .and_then(InputPort::data)
    .and_then(DataObject::payload::<ScalarGrid>)
    .ok_or_else(|| format!("input {port} has no grid").into())
}

fn output_data(outputs: &mut [OutputPort]) -> Result<&mut DataObject, BoxError> {
  outputs[0].data_mut().ok_or_else(|| "missing output data object".into())
}

// =============================================================================
// Sources
// =============================================================================

/// Structured source sampling [`grid_value`], offset by `1000 * time index`.
pub struct GridSource {
  pub name: String,
  pub whole: Extent,
  pub time_steps: Option<Vec<f64>>,
  /// Produce the whole extent regardless of the request.
  pub produce_whole: bool,
  pub fail: Arc<AtomicBool>,
  pub log: Log,
  pub requested: Recorder<Extent>,
}

impl GridSource {
  pub fn new(name: &str, whole: Extent) -> Self {
    Self {
      name: name.to_string(),
      whole,
      time_steps: None,
      produce_whole: false,
      fail: Arc::new(AtomicBool::new(false)),
      log: Log::default(),
      requested: Recorder::default(),
    }
  }

  pub fn with_log(mut self, log: &Log) -> Self {
    self.log = log.clone();
    self
  }
}

impl Algorithm for GridSource {
  fn name(&self) -> &str {
    &self.name
  }

  fn output_type(&self, _port: usize) -> ExtentType {
    ExtentType::Structured
  }

  fn process_request(
    &mut self,
    request: &Request,
    _inputs: &mut [InputPort],
    outputs: &mut [OutputPort],
  ) -> Result<Production, BoxError> {
    self.log.record(&self.name, request);
    match request.phase {
      Phase::Information => {
        let info = &mut outputs[0].info;
        info.set(&WHOLE_EXTENT, self.whole);
        if let Some(steps) = &self.time_steps {
          info.set(&TIME_STEPS, steps.clone());
        }
      }
      Phase::Data => {
        if self.fail.load(Ordering::SeqCst) {
          return Err("source failure".into());
        }
        let info = &outputs[0].info;
        let update = info.get(&UPDATE_EXTENT).unwrap_or(Extent::EMPTY);
        let time = info.get(&UPDATE_TIME_INDEX).unwrap_or(0);
        self.requested.push(update);

        let extent = if self.produce_whole { self.whole } else { update };
        let grid = ScalarGrid::from_fn(extent, |i, j, k| grid_value(i, j, k) + 1000.0 * time as f64);
        let data = output_data(outputs)?;
        data.set_payload(grid);
        data.set_produced_extent(extent);
      }
      _ => {}
    }
    Ok(Production::Complete)
  }
}

/// Unstructured source: one point per request at `(piece, count, ghost)`.
pub struct PieceSource {
  pub max_pieces: Option<i32>,
  pub log: Log,
  pub requested: Recorder<PieceRequest>,
}

impl PieceSource {
  pub fn new(max_pieces: Option<i32>) -> Self {
    Self {
      max_pieces,
      log: Log::default(),
      requested: Recorder::default(),
    }
  }
}

impl Algorithm for PieceSource {
  fn name(&self) -> &str {
    "pieces"
  }

  fn output_type(&self, _port: usize) -> ExtentType {
    ExtentType::Pieces
  }

  fn process_request(
    &mut self,
    request: &Request,
    _inputs: &mut [InputPort],
    outputs: &mut [OutputPort],
  ) -> Result<Production, BoxError> {
    self.log.record("pieces", request);
    match request.phase {
      Phase::Information => {
        if let Some(max) = self.max_pieces {
          outputs[0].info.set(&MAXIMUM_NUMBER_OF_PIECES, max);
        }
      }
      Phase::Data => {
        let piece = requested_piece(&outputs[0].info);
        self.requested.push(piece);
        let poly = PolyData {
          points: vec![DVec3::new(piece.piece as f64, piece.count as f64, piece.ghost as f64)],
          ..PolyData::default()
        };
        let data = output_data(outputs)?;
        data.set_payload(poly);
        data.set_produced_piece(piece);
      }
      _ => {}
    }
    Ok(Production::Complete)
  }
}

/// Delivers the requested extent one k-slab per data phase.
pub struct StreamingSource {
  pub whole: Extent,
  next: i32,
  pub log: Log,
  pub continuations: Recorder<bool>,
}

impl StreamingSource {
  pub fn new(whole: Extent) -> Self {
    Self {
      whole,
      next: 0,
      log: Log::default(),
      continuations: Recorder::default(),
    }
  }
}

impl Algorithm for StreamingSource {
  fn name(&self) -> &str {
    "streaming"
  }

  fn output_type(&self, _port: usize) -> ExtentType {
    ExtentType::Structured
  }

  fn process_request(
    &mut self,
    request: &Request,
    _inputs: &mut [InputPort],
    outputs: &mut [OutputPort],
  ) -> Result<Production, BoxError> {
    self.log.record("streaming", request);
    match request.phase {
      Phase::Information => outputs[0].info.set(&WHOLE_EXTENT, self.whole),
      Phase::Data => {
        self.continuations.push(request.is_continuation());
        if !request.is_continuation() {
          self.next = 0;
        }
        let update = outputs[0].info.get(&UPDATE_EXTENT).unwrap_or(Extent::EMPTY);
        let (k0, k1) = update.axis(2);
        let k = k0 + self.next;
        let mut slab = update;
        slab.0[4] = k;
        slab.0[5] = k;
        self.next += 1;

        let data = output_data(outputs)?;
        data.set_payload(ScalarGrid::from_fn(slab, grid_value));
        data.set_produced_extent(slab);
        if k < k1 {
          return Ok(Production::MoreRemaining);
        }
      }
      _ => {}
    }
    Ok(Production::Complete)
  }
}

#[derive(Clone, Copy, Debug)]
pub enum Breakage {
  DropData,
  WrongKind,
}

/// Source that violates the output contract during the data phase.
pub struct BrokenSource(pub Breakage);

impl Algorithm for BrokenSource {
  fn name(&self) -> &str {
    "broken"
  }

  fn output_type(&self, _port: usize) -> ExtentType {
    ExtentType::Structured
  }

  fn process_request(
    &mut self,
    request: &Request,
    _inputs: &mut [InputPort],
    outputs: &mut [OutputPort],
  ) -> Result<Production, BoxError> {
    match request.phase {
      Phase::Information => outputs[0].info.set(&WHOLE_EXTENT, Extent::new(0, 3, 0, 3, 0, 0)),
      Phase::Data => match self.0 {
        Breakage::DropData => outputs[0].data = None,
        Breakage::WrongKind => outputs[0].data = Some(DataObject::new(ExtentType::Pieces)),
      },
      _ => {}
    }
    Ok(Production::Complete)
  }
}

// =============================================================================
// Filters
// =============================================================================

/// Box filter along x: each output point is the mean of the input points
/// within `radius`, clipped to the available input.
pub struct StencilFilter {
  pub name: String,
  pub radius: i32,
  pub log: Log,
  pub received: Recorder<Extent>,
}

impl StencilFilter {
  pub fn new(name: &str, radius: i32) -> Self {
    Self {
      name: name.to_string(),
      radius,
      log: Log::default(),
      received: Recorder::default(),
    }
  }

  pub fn with_log(mut self, log: &Log) -> Self {
    self.log = log.clone();
    self
  }
}

impl Algorithm for StencilFilter {
  fn name(&self) -> &str {
    &self.name
  }

  fn input_ports(&self) -> usize {
    1
  }

  fn output_type(&self, _port: usize) -> ExtentType {
    ExtentType::Structured
  }

  fn process_request(
    &mut self,
    request: &Request,
    inputs: &mut [InputPort],
    outputs: &mut [OutputPort],
  ) -> Result<Production, BoxError> {
    self.log.record(&self.name, request);
    match request.phase {
      Phase::UpdateExtent => {
        let update = outputs[0].info.get(&UPDATE_EXTENT).unwrap_or(Extent::EMPTY);
        let conn = inputs[0].first_mut().ok_or("stencil input not connected")?;
        let whole = conn.info.get(&WHOLE_EXTENT).unwrap_or(Extent::EMPTY);
        if !update.is_empty() {
          conn.info.set(&UPDATE_EXTENT, update.grow(self.radius, &whole));
        }
      }
      Phase::Data => {
        let input = input_grid(inputs, 0)?;
        self.received.push(input.extent);
        let update = outputs[0].info.get(&UPDATE_EXTENT).unwrap_or(Extent::EMPTY);
        let radius = self.radius;
        let grid = ScalarGrid::from_fn(update, |i, j, k| {
          let samples: Vec<f64> = (i - radius..=i + radius)
            .filter_map(|x| input.value_at(x, j, k))
            .collect();
          samples.iter().sum::<f64>() / samples.len().max(1) as f64
        });
        output_data(outputs)?.set_payload(grid);
      }
      _ => {}
    }
    Ok(Production::Complete)
  }
}

/// Pieces-output consumer of a structured input.
pub struct PieceConsumer {
  pub received: Recorder<Extent>,
}

impl PieceConsumer {
  pub fn new() -> Self {
    Self {
      received: Recorder::default(),
    }
  }
}

impl Algorithm for PieceConsumer {
  fn name(&self) -> &str {
    "piece-consumer"
  }

  fn input_ports(&self) -> usize {
    1
  }

  fn output_type(&self, _port: usize) -> ExtentType {
    ExtentType::Pieces
  }

  fn process_request(
    &mut self,
    request: &Request,
    inputs: &mut [InputPort],
    outputs: &mut [OutputPort],
  ) -> Result<Production, BoxError> {
    if request.phase == Phase::Data {
      let grid = input_grid(inputs, 0)?;
      self.received.push(grid.extent);
      let poly = PolyData {
        points: grid.values.iter().map(|v| DVec3::splat(*v)).collect(),
        ..PolyData::default()
      };
      output_data(outputs)?.set_payload(poly);
    }
    Ok(Production::Complete)
  }
}

/// Point-wise sum of two structured inputs over the output request.
pub struct SumFilter {
  pub log: Log,
  pub threads: Recorder<std::thread::ThreadId>,
}

impl SumFilter {
  pub fn new() -> Self {
    Self {
      log: Log::default(),
      threads: Recorder::default(),
    }
  }
}

impl Algorithm for SumFilter {
  fn name(&self) -> &str {
    "sum"
  }

  fn input_ports(&self) -> usize {
    2
  }

  fn output_type(&self, _port: usize) -> ExtentType {
    ExtentType::Structured
  }

  fn process_request(
    &mut self,
    request: &Request,
    inputs: &mut [InputPort],
    outputs: &mut [OutputPort],
  ) -> Result<Production, BoxError> {
    self.log.record("sum", request);
    if request.phase == Phase::Data {
      self.threads.push(std::thread::current().id());
      let (a, b) = (input_grid(inputs, 0)?, input_grid(inputs, 1)?);
      let update = outputs[0].info.get(&UPDATE_EXTENT).unwrap_or(Extent::EMPTY);
      let grid = ScalarGrid::from_fn(update, |i, j, k| {
        a.value_at(i, j, k).unwrap_or(0.0) + b.value_at(i, j, k).unwrap_or(0.0)
      });
      output_data(outputs)?.set_payload(grid);
    }
    Ok(Production::Complete)
  }
}

/// Sink that records every input grid it is handed.
pub struct Accumulator {
  pub chunks: Recorder<Extent>,
  pub sums: Recorder<f64>,
}

impl Accumulator {
  pub fn new() -> Self {
    Self {
      chunks: Recorder::default(),
      sums: Recorder::default(),
    }
  }
}

impl Algorithm for Accumulator {
  fn name(&self) -> &str {
    "accumulator"
  }

  fn input_ports(&self) -> usize {
    1
  }

  fn output_type(&self, _port: usize) -> ExtentType {
    ExtentType::Structured
  }

  fn process_request(
    &mut self,
    request: &Request,
    inputs: &mut [InputPort],
    outputs: &mut [OutputPort],
  ) -> Result<Production, BoxError> {
    if request.phase == Phase::Data {
      let payload = inputs[0]
        .data()
        .and_then(|d| d.payload_arc())
        .cloned()
        .ok_or("accumulator input has no payload")?;
      let grid = input_grid(inputs, 0)?;
      self.chunks.push(grid.extent);
      self.sums.push(grid.values.iter().sum());
      output_data(outputs)?.set_payload_arc(payload);
    }
    Ok(Production::Complete)
  }
}

/// Build `source -> stencil` and return `(pipeline, source, stencil)`.
pub fn source_and_stencil(source: GridSource, radius: i32) -> (Pipeline, StageId, StageId) {
  let mut p = pipeline();
  let log = source.log.clone();
  let src = p.add_stage(source);
  let stencil = p.add_stage(StencilFilter::new("stencil", radius).with_log(&log));
  p.connect(src.port(0), stencil, 0).unwrap();
  (p, src, stencil)
}
