//! Spatial indices: a point octree and a min/max scalar tree over cells,
//! plus Z-curve reordering built on the octree.

mod bounds;
mod config;
mod octree;
mod scalar_tree;
mod zcurve;

pub use bounds::Aabb;
pub use config::{OctreeConfig, ScalarTreeConfig};
pub use octree::PointOctree;
pub use scalar_tree::{
  CandidateCells, CellArrayScalars, CellScalarSource, GridCellScalars, MinMaxTree, ScalarRange,
};
pub use zcurve::{z_curve_reorder, ZCurveOrder};
