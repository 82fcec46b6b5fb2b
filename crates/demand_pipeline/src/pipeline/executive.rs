//! Phase drivers: the three-pass streaming protocol over a [`StageTable`].
//!
//! ```text
//!   update_information   producers first, then the stage; fills WHOLE_EXTENT,
//!                        translator, request defaults
//!   propagate_update_ext stage first, then producers; consumer requests flow
//!                        upstream, translated across representations
//!   update_data          producers first (serial or fork-join), then the stage
//!                        if its request or inputs changed
//! ```
//!
//! Every pass marks visited stages with the pass epoch so a producer shared
//! by several consumers runs once. Failures are reported on the context's
//! error channel at the stage where they occur and then propagated with `?`.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use web_time::Instant;

use super::algorithm::{OutputPort, Production};
use super::context::{ForwardMode, PipelineContext};
use super::data::DataObject;
use super::request::{Direction, Request};
use super::stage::{self, BranchTable, PortRef, Stage, StageId, StageTable};
use crate::error::PipelineError;
use crate::extent::{DataExtent, Extent, ExtentType, PieceRequest};
use crate::metadata::keys::*;
use crate::metadata::{KeyId, Metadata, ObjectRef};

/// State shared by every stage visited during one top-level call.
pub(crate) struct Pass<'c> {
  pub context: &'c PipelineContext,
  pub clock: &'c AtomicU64,
  pub epoch: u64,
}

impl Pass<'_> {
  fn tick(&self) -> u64 {
    self.clock.fetch_add(1, Ordering::SeqCst) + 1
  }

  fn fail(&self, error: PipelineError) -> PipelineError {
    self.context.report(&error);
    error
  }
}

/// Piece keys copied unchanged from a consumer's request to its inputs.
const PIECE_AND_TIME_KEYS: [KeyId; 5] = [
  UPDATE_PIECE_NUMBER.id(),
  UPDATE_NUMBER_OF_PIECES.id(),
  UPDATE_NUMBER_OF_GHOST_LEVELS.id(),
  UPDATE_TIME_INDEX.id(),
  UPDATE_TIME_STEPS.id(),
];

// =============================================================================
// Request helpers
// =============================================================================

/// Piece request recorded on `info`, defaulting to the whole dataset.
pub(crate) fn requested_piece(info: &Metadata) -> PieceRequest {
  PieceRequest {
    piece: info.get(&UPDATE_PIECE_NUMBER).unwrap_or(0),
    count: info.get(&UPDATE_NUMBER_OF_PIECES).unwrap_or(1),
    ghost: info.get(&UPDATE_NUMBER_OF_GHOST_LEVELS).unwrap_or(0),
  }
}

pub(crate) fn set_requested_piece(info: &mut Metadata, piece: PieceRequest) {
  info.set(&UPDATE_PIECE_NUMBER, piece.piece);
  info.set(&UPDATE_NUMBER_OF_PIECES, piece.count);
  info.set(&UPDATE_NUMBER_OF_GHOST_LEVELS, piece.ghost);
}

/// Structured extent for `piece` of the producer described by `info`.
///
/// No explicit piece means the whole extent. The producer's own translator
/// wins over `fallback`.
pub(crate) fn translate_piece(info: &Metadata, piece: &PieceRequest, fallback: &ObjectRef) -> Extent {
  let whole = info.get(&WHOLE_EXTENT).unwrap_or(Extent::EMPTY);
  if !piece.is_explicit() {
    return whole;
  }
  let translator = info
    .extent_translator(&EXTENT_TRANSLATOR)
    .or_else(|| fallback.as_extent_translator());
  match translator {
    Some(t) => t.piece_to_extent(&whole, piece),
    None => whole,
  }
}

// =============================================================================
// Validation and re-execution decision
// =============================================================================

/// Check that output `port` carries a complete, in-range request.
pub(crate) fn verify_output_information(stage: &Stage, port: usize) -> Result<(), PipelineError> {
  let output = stage.output(port)?;
  let name = || stage.name().to_string();
  let Some(data) = &output.data else {
    return Err(PipelineError::MissingDataObject { stage: name(), port });
  };
  let info = &output.info;
  let missing = |key: &'static str| PipelineError::MissingKey { stage: name(), port, key };

  match data.extent_type() {
    ExtentType::Pieces => {
      if !info.has(&UPDATE_PIECE_NUMBER) {
        return Err(missing(UPDATE_PIECE_NUMBER.name()));
      }
      if !info.has(&UPDATE_NUMBER_OF_PIECES) {
        return Err(missing(UPDATE_NUMBER_OF_PIECES.name()));
      }
      if !info.has(&UPDATE_NUMBER_OF_GHOST_LEVELS) {
        return Err(missing(UPDATE_NUMBER_OF_GHOST_LEVELS.name()));
      }
    }
    ExtentType::Structured => {
      let whole = info.get(&WHOLE_EXTENT).ok_or_else(|| missing(WHOLE_EXTENT.name()))?;
      let update = info.get(&UPDATE_EXTENT).ok_or_else(|| missing(UPDATE_EXTENT.name()))?;
      if !update.is_empty() && !whole.contains(&update) {
        return Err(PipelineError::ExtentOutOfRange {
          stage: name(),
          port,
          update,
          whole,
        });
      }
    }
  }
  Ok(())
}

/// Whether output `port` must be regenerated to satisfy its current request.
///
/// Structured outputs are up to date when the produced extent contains the
/// requested one, or equals it when an exact extent is asked for.
pub(crate) fn need_to_execute_data(stage: &Stage, port: usize) -> bool {
  if stage.continuing {
    return true;
  }
  let Some(output) = stage.outputs.get(port) else {
    return false;
  };
  let Some(data) = &output.data else {
    return true;
  };
  let info = &output.info;

  match data.produced {
    None => return true,
    Some(DataExtent::Pieces(produced)) => {
      if produced != requested_piece(info) {
        return true;
      }
    }
    Some(DataExtent::Structured(produced)) => {
      let update = info.get(&UPDATE_EXTENT).unwrap_or(Extent::EMPTY);
      if info.get(&EXACT_EXTENT).unwrap_or(false) {
        if produced != update {
          return true;
        }
      } else if !update.is_empty() && !produced.contains(&update) {
        return true;
      }
    }
  }

  if let Some(index) = info.get(&UPDATE_TIME_INDEX) {
    if data.time_index != Some(index) {
      return true;
    }
  }
  if let Some(steps) = info.get(&UPDATE_TIME_STEPS) {
    if data.time_steps.as_ref() != Some(&steps) {
      return true;
    }
  }
  false
}

/// Modified since the last run, or an input was regenerated since.
fn is_stale(table: &dyn StageTable, id: StageId) -> Result<bool, PipelineError> {
  let s = stage::stage(table, id)?;
  if s.modified_at > s.executed_at {
    return Ok(true);
  }
  for conn in s.inputs.iter().flat_map(|i| i.connections.iter()) {
    let producer = stage::stage(table, conn.producer.stage)?;
    if producer.output(conn.producer.port)?.generated_at > s.executed_at {
      return Ok(true);
    }
  }
  Ok(false)
}

/// `f` applied to the producer output behind every input connection,
/// shaped like the stage's inputs.
fn producer_views<R>(
  table: &dyn StageTable,
  id: StageId,
  f: impl Fn(&OutputPort) -> R,
) -> Result<Vec<Vec<R>>, PipelineError> {
  let s = stage::stage(table, id)?;
  s.inputs
    .iter()
    .map(|input| {
      input
        .connections
        .iter()
        .map(|conn| -> Result<R, PipelineError> {
          let producer = stage::stage(table, conn.producer.stage)?;
          Ok(f(producer.output(conn.producer.port)?))
        })
        .collect::<Result<Vec<R>, PipelineError>>()
    })
    .collect()
}

/// One port per distinct producer stage, in input order.
fn producer_ports(stage: &Stage) -> Vec<PortRef> {
  let mut seen = HashSet::new();
  stage
    .inputs
    .iter()
    .flat_map(|i| i.connections.iter())
    .map(|conn| conn.producer)
    .filter(|p| seen.insert(p.stage))
    .collect()
}

// =============================================================================
// Information
// =============================================================================

#[cfg_attr(feature = "profiling", tracing::instrument(skip_all, name = "pipeline::update_information"))]
pub(crate) fn update_information(table: &mut dyn StageTable, pass: &Pass, id: StageId) -> Result<(), PipelineError> {
  {
    let s = stage::stage_mut(table, id)?;
    if s.information_epoch == pass.epoch {
      return Ok(());
    }
    s.information_epoch = pass.epoch;
  }

  let producers = stage::stage(table, id)?.producers();
  for producer in producers {
    update_information(table, pass, producer)?;
  }

  let views = producer_views(table, id, |out| out.info.clone())?;
  let s = stage::stage_mut(table, id)?;
  for (input, infos) in s.inputs.iter_mut().zip(views) {
    for (conn, info) in input.connections.iter_mut().zip(infos) {
      conn.info = info;
    }
  }

  for port in 0..s.inputs.len() {
    if s.algorithm.input_required(port) && !s.inputs[port].is_connected() {
      return Err(pass.fail(PipelineError::NotConnected {
        stage: s.name().to_string(),
        port,
      }));
    }
  }

  copy_default_downstream(s);

  let request = Request::information();
  if let Err(e) = s.algorithm.process_request(&request, &mut s.inputs, &mut s.outputs) {
    return Err(pass.fail(PipelineError::algorithm(s.name(), "information", e)));
  }

  apply_information_defaults(s, pass.context.default_translator());
  tracing::trace!(stage = s.name(), "information updated");
  Ok(())
}

/// Make sure every output has a data object of the right kind and seed its
/// producer facts from the first input connection.
fn copy_default_downstream(stage: &mut Stage) {
  let Stage {
    algorithm,
    inputs,
    outputs,
    ..
  } = stage;
  let first = inputs.first().and_then(|i| i.first()).map(|c| &c.info);

  for (port, output) in outputs.iter_mut().enumerate() {
    let kind = algorithm.output_type(port);
    if output.data.as_ref().map(DataObject::extent_type) != Some(kind) {
      output.data = Some(DataObject::new(kind));
    }
    for key in DOWNSTREAM_KEYS {
      output.info.remove_value(key);
    }
    if let Some(info) = first {
      output.info.copy_entries(info, &DOWNSTREAM_KEYS);
    }
  }
}

fn apply_information_defaults(stage: &mut Stage, translator: &ObjectRef) {
  let has_inputs = stage.inputs.iter().any(|i| i.is_connected());
  let Stage { algorithm, outputs, .. } = stage;

  for (port, output) in outputs.iter_mut().enumerate() {
    let info = &mut output.info;
    let kind = algorithm.output_type(port);

    if kind == ExtentType::Structured {
      if !info.has(&WHOLE_EXTENT) {
        info.set(&WHOLE_EXTENT, Extent::EMPTY);
      }
      if info.extent_translator(&EXTENT_TRANSLATOR).is_none() {
        info.set(&EXTENT_TRANSLATOR, translator.clone());
      }
      if !info.get(&UPDATE_EXTENT_INITIALIZED).unwrap_or(false) {
        let whole = info.get(&WHOLE_EXTENT).unwrap_or(Extent::EMPTY);
        info.set(&UPDATE_EXTENT, whole);
      }
    }

    if !info.has(&MAXIMUM_NUMBER_OF_PIECES) {
      let max = if has_inputs || kind == ExtentType::Structured {
        UNBOUNDED_PIECES
      } else {
        1
      };
      info.set(&MAXIMUM_NUMBER_OF_PIECES, max);
    }

    let current = requested_piece(info);
    set_requested_piece(info, current);
  }
}

// =============================================================================
// Update extent
// =============================================================================

#[cfg_attr(feature = "profiling", tracing::instrument(skip_all, name = "pipeline::propagate_update_extent"))]
pub(crate) fn propagate_update_extent(
  table: &mut dyn StageTable,
  pass: &Pass,
  id: StageId,
  port: usize,
) -> Result<(), PipelineError> {
  let forwards: Vec<(PortRef, Metadata)> = {
    let s = stage::stage_mut(table, id)?;
    verify_output_information(s, port).map_err(|e| pass.fail(e))?;

    copy_default_upstream(s, port, pass.context.default_translator());

    let request = Request::update_extent(port);
    if let Err(e) = s.algorithm.process_request(&request, &mut s.inputs, &mut s.outputs) {
      return Err(pass.fail(PipelineError::algorithm(s.name(), "update-extent", e)));
    }

    s.inputs
      .iter()
      .flat_map(|i| i.connections.iter())
      .map(|conn| {
        let mut forwarded = Metadata::new();
        forwarded.copy_entries(&conn.info, &REQUEST_KEYS);
        (conn.producer, forwarded)
      })
      .collect()
  };

  for (producer, forwarded) in forwards {
    let p = stage::stage_mut(table, producer.stage)?;
    p.output_mut(producer.port)?.info.copy_entries(&forwarded, &REQUEST_KEYS);
    propagate_update_extent(table, pass, producer.stage, producer.port)?;
  }
  Ok(())
}

/// Seed every input connection's request from output `port`'s request,
/// translating pieces into extents where the producer is structured.
fn copy_default_upstream(stage: &mut Stage, port: usize, fallback: &ObjectRef) {
  let Stage {
    algorithm,
    inputs,
    outputs,
    ..
  } = stage;
  let Some(output) = outputs.get(port) else {
    return;
  };
  let request = &output.info;
  let consumer_kind = algorithm.output_type(port);
  let piece = requested_piece(request);

  for conn in inputs.iter_mut().flat_map(|i| i.connections.iter_mut()) {
    conn.info.copy_entries(request, &PIECE_AND_TIME_KEYS);
    set_requested_piece(&mut conn.info, piece);
    if conn.producer_type != ExtentType::Structured {
      continue;
    }
    let extent = match consumer_kind {
      ExtentType::Structured => request.get(&UPDATE_EXTENT).unwrap_or(Extent::EMPTY),
      ExtentType::Pieces => translate_piece(&conn.info, &piece, fallback),
    };
    conn.info.set(&UPDATE_EXTENT, extent);
    conn.info.set(&UPDATE_EXTENT_INITIALIZED, true);
  }
}

// =============================================================================
// Data
// =============================================================================

#[cfg_attr(feature = "profiling", tracing::instrument(skip_all, name = "pipeline::update_data"))]
pub(crate) fn update_data(table: &mut dyn StageTable, pass: &Pass, id: StageId, port: usize) -> Result<(), PipelineError> {
  {
    let s = stage::stage_mut(table, id)?;
    if s.data_epoch == pass.epoch {
      return Ok(());
    }
    s.data_epoch = pass.epoch;
  }

  forward_data(table, pass, id)?;

  let views = producer_views(table, id, |out| out.data.clone())?;
  let stale = is_stale(table, id)?;
  let s = stage::stage_mut(table, id)?;
  for (input, data) in s.inputs.iter_mut().zip(views) {
    for (conn, data) in input.connections.iter_mut().zip(data) {
      conn.data = data;
    }
  }

  execute_data(s, pass, port, stale)
}

/// Bring every producer up to date, in parallel when the strategy asks for
/// it and the upstream subgraphs share no stage.
fn forward_data(table: &mut dyn StageTable, pass: &Pass, id: StageId) -> Result<(), PipelineError> {
  let producers = producer_ports(stage::stage(table, id)?);

  if producers.len() > 1 && pass.context.strategy().forward_mode(producers.len()) == ForwardMode::ForkJoin {
    let closures: Vec<HashSet<StageId>> = producers
      .iter()
      .map(|p| stage::upstream_closure(table, p.stage))
      .collect();
    if pairwise_disjoint(&closures) {
      let branches = table.split(&closures);
      tracing::debug!(
        branch_sizes = ?branches.iter().map(BranchTable::len).collect::<Vec<_>>(),
        "forwarding data phase fork-join"
      );
      let tasks: Vec<_> = branches
        .into_iter()
        .zip(producers.iter().copied())
        .map(|(mut branch, producer)| move || update_data(&mut branch, pass, producer.stage, producer.port))
        .collect();
      return pass
        .context
        .pool()
        .fork_join(tasks)
        .into_iter()
        .collect::<Result<Vec<()>, _>>()
        .map(|_| ());
    }
    tracing::debug!("upstream branches share stages; forwarding serially");
  }

  for producer in producers {
    update_data(table, pass, producer.stage, producer.port)?;
  }
  Ok(())
}

fn pairwise_disjoint(sets: &[HashSet<StageId>]) -> bool {
  let mut seen = HashSet::new();
  sets.iter().flatten().all(|id| seen.insert(*id))
}

fn execute_data(s: &mut Stage, pass: &Pass, port: usize, stale: bool) -> Result<(), PipelineError> {
  let needed = stale || (0..s.outputs.len()).any(|p| need_to_execute_data(s, p));
  if !needed {
    s.metrics.record_skip();
    tracing::trace!(stage = s.name(), "output up to date");
    return Ok(());
  }

  for p in 0..s.outputs.len() {
    if let Err(e) = verify_output_information(s, p) {
      s.metrics.record_failure();
      return Err(pass.fail(e));
    }
  }

  let saved: Vec<Option<DataObject>> = s.outputs.iter().map(|o| o.data.clone()).collect();
  // What the last run covered no longer applies; the payload stays until
  // the algorithm replaces it.
  for data in s.outputs.iter_mut().filter_map(|o| o.data.as_mut()) {
    data.produced = None;
    data.time_index = None;
    data.time_steps = None;
  }
  let mut request = Request::data(port);
  if s.continuing {
    request.entries.set(&CONTINUE_EXECUTING, true);
  }

  let _span = tracing::info_span!("execute_data", stage = s.name()).entered();
  let start = Instant::now();
  let result = s
    .algorithm
    .process_request(&request, &mut s.inputs, &mut s.outputs)
    .map_err(|e| PipelineError::algorithm(s.name(), "data", e))
    .and_then(|production| finish_outputs(s).map(|_| production));

  let production = match result {
    Ok(production) => production,
    Err(error) => {
      for (output, data) in s.outputs.iter_mut().zip(saved) {
        output.data = data;
      }
      s.continuing = false;
      s.metrics.record_failure();
      return Err(pass.fail(error));
    }
  };

  s.continuing = production == Production::MoreRemaining;
  let tick = pass.tick();
  for output in &mut s.outputs {
    output.generated_at = tick;
  }
  s.executed_at = tick;
  s.metrics.record_execution(start.elapsed().as_micros() as u64, s.continuing);

  tracing::debug!(
    stage = s.name(),
    tick,
    more_remaining = s.continuing,
    "data phase executed"
  );
  Ok(())
}

/// Check what the algorithm left behind and fill in what it did not record.
fn finish_outputs(stage: &mut Stage) -> Result<(), PipelineError> {
  let Stage { algorithm, outputs, .. } = stage;

  for (port, output) in outputs.iter_mut().enumerate() {
    let expected = algorithm.output_type(port);
    let info = &output.info;
    let Some(data) = output.data.as_mut() else {
      return Err(PipelineError::MissingDataObject {
        stage: algorithm.name().to_string(),
        port,
      });
    };
    if data.extent_type() != expected {
      return Err(PipelineError::WrongDataKind {
        stage: algorithm.name().to_string(),
        port,
        expected,
        found: data.extent_type(),
      });
    }

    if data.produced.is_none() {
      match expected {
        ExtentType::Structured => {
          data.set_produced_extent(info.get(&UPDATE_EXTENT).unwrap_or(Extent::EMPTY));
        }
        ExtentType::Pieces => data.set_produced_piece(requested_piece(info)),
      }
    }
    if data.time_index.is_none() {
      data.time_index = info.get(&UPDATE_TIME_INDEX);
    }
    if data.time_steps.is_none() {
      data.time_steps = info.get(&UPDATE_TIME_STEPS);
    }

    if expected == ExtentType::Structured && info.get(&EXACT_EXTENT).unwrap_or(false) {
      crop_to_update(data, info.get(&UPDATE_EXTENT).unwrap_or(Extent::EMPTY));
    }
  }
  Ok(())
}

fn crop_to_update(data: &mut DataObject, update: Extent) {
  let Some(produced) = data.produced_extent() else {
    return;
  };
  if produced == update || !produced.contains(&update) {
    return;
  }
  match data.payload_arc().and_then(|p| p.crop(&produced, &update)) {
    Some(cropped) => {
      data.set_payload_arc(cropped);
      data.set_produced_extent(update);
    }
    None => tracing::debug!(%produced, %update, "payload cannot be cropped to the exact extent"),
  }
}

// =============================================================================
// Custom phases
// =============================================================================

/// Drive an algorithm-defined request through the graph in its direction.
pub(crate) fn process_custom(
  table: &mut dyn StageTable,
  pass: &Pass,
  id: StageId,
  request: &Request,
) -> Result<(), PipelineError> {
  {
    let s = stage::stage_mut(table, id)?;
    if s.custom_epoch == pass.epoch {
      return Ok(());
    }
    s.custom_epoch = pass.epoch;
  }

  if request.algorithm_before_forward {
    run_custom(table, pass, id, request)?;
    forward_custom(table, pass, id, request)
  } else {
    forward_custom(table, pass, id, request)?;
    run_custom(table, pass, id, request)
  }
}

fn run_custom(table: &mut dyn StageTable, pass: &Pass, id: StageId, request: &Request) -> Result<(), PipelineError> {
  let s = stage::stage_mut(table, id)?;
  match s.algorithm.process_request(request, &mut s.inputs, &mut s.outputs) {
    Ok(_) => Ok(()),
    Err(e) => Err(pass.fail(PipelineError::algorithm(s.name(), request.phase.name(), e))),
  }
}

fn forward_custom(table: &mut dyn StageTable, pass: &Pass, id: StageId, request: &Request) -> Result<(), PipelineError> {
  match request.direction {
    Direction::Upstream => {
      for producer in producer_ports(stage::stage(table, id)?) {
        process_custom(table, pass, producer.stage, &request.with_port(producer.port))?;
      }
    }
    Direction::Downstream => {
      for consumer in consumers(table, id) {
        process_custom(table, pass, consumer, request)?;
      }
    }
  }
  Ok(())
}

/// Stages reading from `id`, in arena order.
pub(crate) fn consumers(table: &dyn StageTable, id: StageId) -> Vec<StageId> {
  let mut ids: Vec<StageId> = table
    .ids()
    .into_iter()
    .filter(|c| table.get(*c).is_some_and(|s| s.producers().contains(&id)))
    .collect();
  ids.sort_by_key(|c| c.index());
  ids
}
