//! The algorithm contract and the ports it reads and writes.

use super::data::DataObject;
use super::request::Request;
use super::stage::PortRef;
use crate::error::BoxError;
use crate::extent::ExtentType;
use crate::metadata::Metadata;

/// Result of one data-phase call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Production {
  /// The requested region is fully produced.
  Complete,
  /// One chunk was produced and more remain; call again.
  MoreRemaining,
}

/// Output connection point: metadata plus the produced data object.
#[derive(Debug, Default)]
pub struct OutputPort {
  pub info: Metadata,
  pub data: Option<DataObject>,
  pub(crate) generated_at: u64,
}

impl OutputPort {
  /// Clock tick of the last successful data phase.
  #[inline]
  pub fn generated_at(&self) -> u64 {
    self.generated_at
  }

  pub fn data_mut(&mut self) -> Option<&mut DataObject> {
    self.data.as_mut()
  }
}

/// One upstream connection feeding an input port.
///
/// `info` is this consumer's view of the producer's output metadata: filled
/// from the producer during the information phase, edited by the consumer's
/// update-extent handler, then handed back upstream.
#[derive(Debug)]
pub struct InputConnection {
  pub producer: PortRef,
  /// Representation of the producer's output.
  pub producer_type: ExtentType,
  pub info: Metadata,
  pub data: Option<DataObject>,
}

#[derive(Debug, Default)]
pub struct InputPort {
  pub connections: Vec<InputConnection>,
}

impl InputPort {
  pub fn first(&self) -> Option<&InputConnection> {
    self.connections.first()
  }

  pub fn first_mut(&mut self) -> Option<&mut InputConnection> {
    self.connections.first_mut()
  }

  /// Data from the first connection.
  pub fn data(&self) -> Option<&DataObject> {
    self.first()?.data.as_ref()
  }

  pub fn is_connected(&self) -> bool {
    !self.connections.is_empty()
  }
}

/// A processing stage plugged into the executive.
///
/// Every phase arrives through [`Algorithm::process_request`]. During the
/// data phase the algorithm reads the validated request from its output
/// metadata and records what it actually produced on the output data
/// object; the executive defaults it to the request when left unset.
pub trait Algorithm: Send {
  fn name(&self) -> &str;

  fn input_ports(&self) -> usize {
    0
  }

  fn output_ports(&self) -> usize {
    1
  }

  /// Representation of the data on output `port`.
  fn output_type(&self, port: usize) -> ExtentType;

  /// Whether input `port` must be connected before the stage can run.
  fn input_required(&self, _port: usize) -> bool {
    true
  }

  /// Handle one phase. Phases the algorithm does not care about complete
  /// with no effect.
  fn process_request(
    &mut self,
    _request: &Request,
    _inputs: &mut [InputPort],
    _outputs: &mut [OutputPort],
  ) -> Result<Production, BoxError> {
    Ok(Production::Complete)
  }
}
