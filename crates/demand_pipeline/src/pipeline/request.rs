//! Request envelope passed from stage to stage during one phase.

use crate::metadata::keys::CONTINUE_EXECUTING;
use crate::metadata::{KeyId, Metadata};

/// Which pass of the protocol a request drives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
  /// Discover whole extent, bounds, available time samples.
  Information,
  /// Negotiate the sub-region each stage needs, propagated upstream.
  UpdateExtent,
  /// Produce the requested sub-region.
  Data,
  /// Algorithm-defined pass, identified by a key.
  Custom(KeyId),
}

impl Phase {
  pub fn name(&self) -> &'static str {
    match self {
      Phase::Information => "information",
      Phase::UpdateExtent => "update-extent",
      Phase::Data => "data",
      Phase::Custom(key) => key.name(),
    }
  }
}

/// Which way a request travels after the stage has seen it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
  /// Toward producers.
  Upstream,
  /// Toward consumers.
  Downstream,
}

#[derive(Clone, Debug)]
pub struct Request {
  pub phase: Phase,
  pub direction: Direction,
  /// Run the algorithm before forwarding rather than after.
  pub algorithm_before_forward: bool,
  /// Output port the request arrived on.
  pub from_port: Option<usize>,
  /// Phase-specific entries (continuation flag, custom payload).
  pub entries: Metadata,
}

impl Request {
  fn new(phase: Phase, direction: Direction, algorithm_before_forward: bool) -> Self {
    Self {
      phase,
      direction,
      algorithm_before_forward,
      from_port: None,
      entries: Metadata::new(),
    }
  }

  /// Producers answer first, then the stage.
  pub fn information() -> Self {
    Self::new(Phase::Information, Direction::Upstream, false)
  }

  /// The stage adjusts its input requests first, then forwards them.
  pub fn update_extent(from_port: usize) -> Self {
    Self {
      from_port: Some(from_port),
      ..Self::new(Phase::UpdateExtent, Direction::Upstream, true)
    }
  }

  /// Producers produce first, then the stage.
  pub fn data(from_port: usize) -> Self {
    Self {
      from_port: Some(from_port),
      ..Self::new(Phase::Data, Direction::Upstream, false)
    }
  }

  pub fn custom(key: KeyId, direction: Direction, algorithm_before_forward: bool) -> Self {
    Self::new(Phase::Custom(key), direction, algorithm_before_forward)
  }

  /// True when the stage is re-run after reporting more remaining.
  pub fn is_continuation(&self) -> bool {
    self.entries.get(&CONTINUE_EXECUTING).unwrap_or(false)
  }

  pub(crate) fn with_port(&self, port: usize) -> Self {
    let mut request = self.clone();
    request.from_port = Some(port);
    request
  }
}
