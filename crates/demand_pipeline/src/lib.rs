//! demand_pipeline - Demand-driven streaming pipeline with a fork-join substrate
//!
//! A pipeline is a DAG of stages wrapping [`Algorithm`]s. Updating an output
//! runs three passes: information (what can be produced), update-extent
//! (what each stage needs, negotiated upstream), and data (produce it, only
//! where the request or an input changed). Sources can stream large
//! requests chunk by chunk.
//!
//! # Features
//!
//! - **Executive**: request validation, piece-to-extent translation, exact
//!   extent cropping, modification-time re-execution, error channel
//! - **SMP substrate**: worker pool with parallel-for, fork-join and
//!   per-worker storage
//! - **Parallel merge**: per-worker point/cell fragments merged with atomic
//!   bucket claims into one deduplicated dataset, and the reverse split of
//!   one dataset into per-worker pieces
//! - **Spatial indices**: point octree with nearest/radius/region queries,
//!   min/max scalar tree for iso-value candidate cells, Z-curve reordering
//!
//! # Example
//!
//! ```ignore
//! use demand_pipeline::{Pipeline, PipelineContext, Extent};
//!
//! let mut pipeline = Pipeline::new(PipelineContext::with_default_pool()?);
//! let source = pipeline.add_stage(MySource::default());
//! let filter = pipeline.add_stage(MyFilter::default());
//! pipeline.connect(source.port(0), filter, 0)?;
//!
//! pipeline.set_update_extent(filter.port(0), Extent::new(0, 31, 0, 31, 0, 0))?;
//! pipeline.update(filter, 0)?;
//! ```

pub mod error;
pub mod extent;
pub mod merge;
pub mod metadata;
pub mod metrics;
pub mod pipeline;
pub mod smp;
pub mod spatial;

// Re-export commonly used items
pub use error::{BoxError, MergeError, PipelineError, PoolError, TreeError};
pub use extent::{BlockTranslator, DataExtent, Extent, ExtentTranslator, ExtentType, PieceRequest};
pub use metadata::{Key, KeyId, Metadata, MetadataObject, ObjectRef, Value};
pub use pipeline::{
  Algorithm, Chunk, DataObject, Payload, Pipeline, PipelineContext, PortRef, Production, Request, ScalarGrid,
  StageId,
};
pub use smp::{PoolConfig, ThreadLocal, WorkerPool};
