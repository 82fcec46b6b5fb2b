//! Configuration parsing for a pipeline run.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Root configuration for one run.
#[derive(Debug, Deserialize)]
pub struct Config {
	#[serde(default)]
	pub pool: PoolSection,
	pub source: SourceSection,
	#[serde(default)]
	pub streaming: StreamingSection,
	pub extract: ExtractSection,
	#[serde(default)]
	pub octree: OctreeSection,
	#[serde(default)]
	pub merge: MergeSection,
	/// Point probes run against the extracted point cloud.
	#[serde(default)]
	pub queries: Vec<QuerySection>,
}

/// Worker pool and data-phase scheduling.
#[derive(Debug, Deserialize)]
pub struct PoolSection {
	/// Worker threads, 0 for hardware concurrency.
	#[serde(default)]
	pub threads: usize,
	#[serde(default = "default_grain")]
	pub grain: usize,
	/// Fork independent upstream branches across the pool.
	#[serde(default)]
	pub parallel_upstream: bool,
}

impl Default for PoolSection {
	fn default() -> Self {
		Self {
			threads: 0,
			grain: default_grain(),
			parallel_upstream: false,
		}
	}
}

/// Scalar field sampled on a point lattice.
#[derive(Debug, Deserialize)]
pub struct SourceSection {
	pub field: FieldKind,
	/// Points per axis.
	pub dimensions: [i32; 3],
	#[serde(default = "default_spacing")]
	pub spacing: f64,
	/// Sphere centre in world units; the lattice centre when absent.
	pub center: Option<[f64; 3]>,
	/// Time values the source advertises.
	#[serde(default)]
	pub time_steps: Vec<f64>,
	/// Index into `time_steps` to request.
	pub time_index: Option<i32>,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
	/// Distance from the lattice center.
	Sphere,
	/// `sin x cos y + sin y cos z + sin z cos x` over lattice coordinates.
	Gyroid,
}

/// How the source splits a request into chunks.
#[derive(Debug, Deserialize)]
pub struct StreamingSection {
	/// Cell layers per streamed slab along z.
	#[serde(default = "default_slab_cells")]
	pub slab_cells: i32,
	/// Independent pieces requested one after another.
	#[serde(default = "default_pieces")]
	pub pieces: i32,
	/// Halo layers added around each piece.
	#[serde(default)]
	pub ghost: i32,
}

impl Default for StreamingSection {
	fn default() -> Self {
		Self {
			slab_cells: default_slab_cells(),
			pieces: default_pieces(),
			ghost: 0,
		}
	}
}

/// Iso-point extraction parameters.
#[derive(Debug, Deserialize)]
pub struct ExtractSection {
	pub iso_value: f64,
	/// Min/max tree fan-out used to find candidate cells.
	#[serde(default = "default_branching")]
	pub branching_factor: usize,
}

#[derive(Debug, Deserialize)]
pub struct OctreeSection {
	#[serde(default = "default_points_per_region")]
	pub max_points_per_region: usize,
	#[serde(default = "default_true")]
	pub cubic_octants: bool,
}

impl Default for OctreeSection {
	fn default() -> Self {
		Self {
			max_points_per_region: default_points_per_region(),
			cubic_octants: true,
		}
	}
}

/// Point deduplication across workers and chunks.
#[derive(Debug, Deserialize)]
pub struct MergeSection {
	/// Target occupancy of one locator bucket.
	#[serde(default = "default_points_per_bucket")]
	pub points_per_bucket: usize,
}

impl Default for MergeSection {
	fn default() -> Self {
		Self {
			points_per_bucket: default_points_per_bucket(),
		}
	}
}

/// One probe point and the queries to run around it.
#[derive(Debug, Deserialize)]
pub struct QuerySection {
	pub point: [f64; 3],
	#[serde(default)]
	pub radius: Option<f64>,
	#[serde(default)]
	pub closest: Option<usize>,
}

fn default_grain() -> usize {
	64
}

fn default_spacing() -> f64 {
	1.0
}

fn default_slab_cells() -> i32 {
	8
}

fn default_pieces() -> i32 {
	1
}

fn default_branching() -> usize {
	3
}

fn default_points_per_region() -> usize {
	100
}

fn default_points_per_bucket() -> usize {
	demand_pipeline::merge::DEFAULT_POINTS_PER_BUCKET
}

fn default_true() -> bool {
	true
}

impl Config {
	/// Load configuration from a TOML file.
	pub fn load(path: &Path) -> Result<Self> {
		let content = std::fs::read_to_string(path)
			.with_context(|| format!("Failed to read config file: {}", path.display()))?;
		let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config TOML")?;
		config.validate()?;
		Ok(config)
	}

	fn validate(&self) -> Result<()> {
		if self.source.dimensions.iter().any(|&d| d < 1) {
			anyhow::bail!("source.dimensions must be positive, got {:?}", self.source.dimensions);
		}
		if self.source.spacing <= 0.0 {
			anyhow::bail!("source.spacing must be positive, got {}", self.source.spacing);
		}
		if let Some(index) = self.source.time_index {
			if index < 0 || index as usize >= self.source.time_steps.len() {
				anyhow::bail!(
					"source.time_index {} is outside the {} advertised time steps",
					index,
					self.source.time_steps.len()
				);
			}
		}
		if self.streaming.slab_cells < 1 {
			anyhow::bail!("streaming.slab_cells must be at least 1, got {}", self.streaming.slab_cells);
		}
		if self.streaming.pieces < 1 {
			anyhow::bail!("streaming.pieces must be at least 1, got {}", self.streaming.pieces);
		}
		if self.streaming.ghost < 0 {
			anyhow::bail!("streaming.ghost must not be negative, got {}", self.streaming.ghost);
		}
		if self.merge.points_per_bucket == 0 {
			anyhow::bail!("merge.points_per_bucket must be at least 1");
		}
		if self.extract.branching_factor < 2 {
			anyhow::bail!(
				"extract.branching_factor must be at least 2, got {}",
				self.extract.branching_factor
			);
		}
		Ok(())
	}
}
