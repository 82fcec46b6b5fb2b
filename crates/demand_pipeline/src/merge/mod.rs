//! Lock-minimal merge of per-worker point sets and cell topologies.
//!
//! Workers build [`PolyFragment`]s with local point ids on a shared
//! [`BucketGrid`]; [`merge_fragments`] claims buckets atomically, assigns
//! global ids, then rewrites connectivity into ranges fixed by
//! [`OffsetManager`]. [`distribute_poly_data`] goes the other way and splits
//! one dataset into per-worker pieces.

mod cells;
mod distribute;
mod engine;
mod grid;
mod locator;
mod offsets;

pub use cells::{AttributeTable, CellArray, Topologies, Topology};
pub use distribute::distribute_poly_data;
pub use engine::{merge_fragments, BucketClaims, MergeOptions, MergeResult, PolyData, PolyFragment};
pub use grid::{BucketGrid, DEFAULT_POINTS_PER_BUCKET};
pub use locator::{same_point, LocalPointSet, SharedPointLocator};
pub use offsets::{FragmentRange, OffsetManager};
