//! Demand-driven pipeline executive.
//!
//! ```text
//!   source ──► filter ──► sink          update(sink, 0)
//!     ▲          ▲          │
//!     │          │          ├─ information     upstream first
//!     │          └──────────┤  update-extent   sink first, requests flow up
//!     └─────────────────────┘  data            upstream first, skip if fresh
//! ```
//!
//! Stages hold an [`Algorithm`]; the executive owns every port, decides when
//! an algorithm must run, validates what it is asked for, and reports every
//! failure on the [`PipelineContext`] error channel.

mod algorithm;
mod context;
mod data;
mod executive;
mod graph;
mod request;
mod stage;

#[cfg(test)]
pub(crate) mod test_utils;

pub use algorithm::{Algorithm, InputConnection, InputPort, OutputPort, Production};
pub use context::{ExecutionStrategy, ForwardMode, ParallelUpstreamStrategy, PipelineContext, SerialStrategy};
pub use data::{DataObject, Payload, ScalarGrid};
pub use graph::{Chunk, ChunkStream, Pipeline};
pub use request::{Direction, Phase, Request};
pub use stage::{PipelineId, PortRef, Stage, StageId};
