//! Algorithms wired into the runner's pipeline.
//!
//! ```text
//!   ScalarFieldSource ──(structured, one z-slab per pass)──▶ IsoPoints ──(pieces)──▶ runner
//! ```
//!
//! The source streams its update extent slab by slab. Each slab is searched
//! with a min/max tree, crossing points are emitted per worker and merged
//! into one point set. Adjacent slabs share a point plane, so the runner
//! folds chunks into a [`PointCloud`] that deduplicates across them.

use std::sync::Arc;

use demand_pipeline::merge::{
	merge_fragments, BucketGrid, MergeOptions, PolyData, PolyFragment, Topology, DEFAULT_POINTS_PER_BUCKET,
};
use demand_pipeline::metadata::keys::{
	TIME_STEPS, UPDATE_EXTENT, UPDATE_TIME_INDEX, WHOLE_BOUNDING_BOX, WHOLE_EXTENT,
};
use demand_pipeline::pipeline::{InputPort, OutputPort, Phase};
use demand_pipeline::spatial::{Aabb, GridCellScalars, MinMaxTree, ScalarTreeConfig};
use demand_pipeline::{
	Algorithm, BoxError, Extent, ExtentType, Production, Request, ScalarGrid, ThreadLocal, WorkerPool,
};
use glam::DVec3;

use crate::config::FieldKind;

fn output_data(outputs: &mut [OutputPort]) -> Result<&mut demand_pipeline::DataObject, BoxError> {
	outputs
		.first_mut()
		.and_then(OutputPort::data_mut)
		.ok_or_else(|| "missing output data object".into())
}

/// World-space box of the lattice points in `extent`.
pub fn lattice_bounds(extent: Extent, spacing: f64) -> Aabb {
	let [x0, x1, y0, y1, z0, z1] = extent.0;
	Aabb::new(
		DVec3::new(x0 as f64, y0 as f64, z0 as f64) * spacing,
		DVec3::new(x1 as f64, y1 as f64, z1 as f64) * spacing,
	)
}

// =============================================================================
// Source
// =============================================================================

/// Samples an analytic field on a lattice, one z-slab per data pass.
pub struct ScalarFieldSource {
	field: FieldKind,
	whole: Extent,
	spacing: f64,
	slab_cells: i32,
	time_steps: Vec<f64>,
	center: DVec3,
	/// First z layer of the next slab.
	next_k: i32,
}

impl ScalarFieldSource {
	pub fn new(field: FieldKind, dimensions: [i32; 3], spacing: f64, slab_cells: i32) -> Self {
		let [nx, ny, nz] = dimensions;
		let whole = Extent::new(0, nx - 1, 0, ny - 1, 0, nz - 1);
		Self {
			field,
			whole,
			spacing,
			slab_cells: slab_cells.max(1),
			time_steps: Vec::new(),
			center: lattice_bounds(whole, spacing).center(),
			next_k: 0,
		}
	}

	pub fn with_center(mut self, center: DVec3) -> Self {
		self.center = center;
		self
	}

	pub fn with_time_steps(mut self, steps: Vec<f64>) -> Self {
		self.time_steps = steps;
		self
	}

	pub fn whole_extent(&self) -> Extent {
		self.whole
	}

	/// Field value at lattice point `(i, j, k)` and time `t`.
	pub fn sample(&self, i: i32, j: i32, k: i32, t: f64) -> f64 {
		let p = DVec3::new(i as f64, j as f64, k as f64) * self.spacing;
		match self.field {
			FieldKind::Sphere => p.distance(self.center) + t,
			FieldKind::Gyroid => {
				let q = p * 0.5 + DVec3::splat(t);
				q.x.sin() * q.y.cos() + q.y.sin() * q.z.cos() + q.z.sin() * q.x.cos()
			}
		}
	}

	fn time_value(&self, index: Option<i32>) -> f64 {
		index
			.and_then(|i| usize::try_from(i).ok())
			.and_then(|i| self.time_steps.get(i).copied())
			.unwrap_or(0.0)
	}
}

impl Algorithm for ScalarFieldSource {
	fn name(&self) -> &str {
		"scalar_field"
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
			Phase::Information => {
				let info = &mut outputs[0].info;
				info.set(&WHOLE_EXTENT, self.whole);
				info.set(&WHOLE_BOUNDING_BOX, lattice_bounds(self.whole, self.spacing).to_interleaved().to_vec());
				if !self.time_steps.is_empty() {
					info.set(&TIME_STEPS, self.time_steps.clone());
				}
			}
			Phase::Data => {
				let info = &outputs[0].info;
				let update = info.get(&UPDATE_EXTENT).unwrap_or(Extent::EMPTY);
				let t = self.time_value(info.get(&UPDATE_TIME_INDEX));
				if update.is_empty() {
					let data = output_data(outputs)?;
					data.set_payload(ScalarGrid::from_fn(update, |_, _, _| 0.0));
					data.set_produced_extent(update);
					return Ok(Production::Complete);
				}

				let (k0, k1) = update.axis(2);
				if !request.is_continuation() {
					self.next_k = k0;
				}
				let mut slab = update;
				slab.0[4] = self.next_k;
				slab.0[5] = (self.next_k + self.slab_cells).min(k1);
				self.next_k = slab.0[5];

				let grid = ScalarGrid::from_fn(slab, |i, j, k| self.sample(i, j, k, t));
				tracing::debug!(?slab, "sampled slab");
				let data = output_data(outputs)?;
				data.set_payload(grid);
				// Only the slab is held, so a finished stream still needs a
				// fresh pass when the whole request is asked for again.
				data.set_produced_extent(slab);
				if slab.0[5] < k1 {
					return Ok(Production::MoreRemaining);
				}
			}
			_ => {}
		}
		Ok(Production::Complete)
	}
}

// =============================================================================
// Iso-point extraction
// =============================================================================

/// Emits the points where the scalar field crosses `iso_value` along lattice
/// edges, one vertex cell per crossed lattice cell.
pub struct IsoPoints {
	pool: Arc<WorkerPool>,
	iso_value: f64,
	spacing: f64,
	points_per_bucket: usize,
	tree: ScalarTreeConfig,
}

impl IsoPoints {
	pub fn new(pool: Arc<WorkerPool>, iso_value: f64, spacing: f64, branching_factor: usize) -> Self {
		Self {
			pool,
			iso_value,
			spacing,
			points_per_bucket: DEFAULT_POINTS_PER_BUCKET,
			tree: ScalarTreeConfig {
				branching_factor,
				..Default::default()
			},
		}
	}

	pub fn with_points_per_bucket(mut self, points_per_bucket: usize) -> Self {
		self.points_per_bucket = points_per_bucket.max(1);
		self
	}
}

impl Algorithm for IsoPoints {
	fn name(&self) -> &str {
		"iso_points"
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
			let grid = inputs[0]
				.data()
				.and_then(|d| d.payload::<ScalarGrid>())
				.ok_or("iso_points input has no scalar grid")?;
			let poly = extract_iso_points(
				&self.pool,
				grid,
				self.iso_value,
				self.spacing,
				self.points_per_bucket,
				&self.tree,
			)?;
			tracing::debug!(extent = ?grid.extent, points = poly.point_count(), "extracted slab");
			output_data(outputs)?.set_payload(poly);
		}
		Ok(Production::Complete)
	}
}

/// Crossing points of every cell in `grid` whose range brackets `iso`.
pub fn extract_iso_points(
	pool: &WorkerPool,
	grid: &ScalarGrid,
	iso: f64,
	spacing: f64,
	points_per_bucket: usize,
	tree: &ScalarTreeConfig,
) -> Result<PolyData, BoxError> {
	if grid.extent.is_empty() {
		return Ok(PolyData::default());
	}
	let source = GridCellScalars {
		extent: grid.extent,
		values: &grid.values,
	};
	let tree = MinMaxTree::build(pool, &source, tree)?;
	let cells = tree.cells_containing(&source, iso);
	tracing::trace!(candidates = cells.len(), total = source.extent.cell_count(), "cells bracketing iso value");
	if cells.is_empty() {
		return Ok(PolyData::default());
	}

	let buckets = BucketGrid::for_points(
		lattice_bounds(grid.extent, spacing),
		cells.len() * 3,
		points_per_bucket,
	);
	let fragments = ThreadLocal::for_pool(pool);
	pool.for_each_fn(0, cells.len(), |worker, n| {
		let mut fragment = fragments.get_or_init(worker, || PolyFragment::new(buckets, 0, 0));
		emit_cell(&mut fragment, grid, cells[n], iso, spacing);
	});

	let fragments = fragments.into_values();
	Ok(merge_fragments(pool, &fragments, &MergeOptions::default())?.output)
}

fn emit_cell(fragment: &mut PolyFragment, grid: &ScalarGrid, cell: usize, iso: f64, spacing: f64) {
	let dims = grid.extent.dimensions();
	let cells = dims.map(|d| d.saturating_sub(1).max(1));
	let base = [cell % cells[0], (cell / cells[0]) % cells[1], cell / (cells[0] * cells[1])];
	// Flat axes have no edges and a single corner layer.
	let span = dims.map(|d| usize::from(d > 1));

	let mut ids: Vec<u32> = Vec::with_capacity(12);
	for axis in 0..3 {
		if span[axis] == 0 {
			continue;
		}
		let (u, v) = ((axis + 1) % 3, (axis + 2) % 3);
		for a in 0..=span[u] {
			for b in 0..=span[v] {
				let mut lo = base;
				lo[u] += a;
				lo[v] += b;
				let mut hi = lo;
				hi[axis] += 1;
				if let Some(point) = crossing(grid, lo, hi, iso, spacing) {
					let id = fragment.add_point(point, &[]);
					if !ids.contains(&id) {
						ids.push(id);
					}
				}
			}
		}
	}
	if !ids.is_empty() {
		fragment.add_cell(Topology::Verts, &ids, &[]);
	}
}

/// Interpolated crossing on the edge `lo -> hi` (local point coordinates).
///
/// Always interpolates from the lower corner so neighboring slabs produce
/// bit-identical points on a shared edge.
fn crossing(grid: &ScalarGrid, lo: [usize; 3], hi: [usize; 3], iso: f64, spacing: f64) -> Option<DVec3> {
	let [nx, ny, _] = grid.extent.dimensions();
	let value = |p: [usize; 3]| grid.values[p[0] + nx * (p[1] + ny * p[2])];
	let (va, vb) = (value(lo), value(hi));
	if (va < iso) == (vb < iso) {
		return None;
	}
	let [x0, _, y0, _, z0, _] = grid.extent.0;
	let world = |p: [usize; 3]| {
		DVec3::new((x0 + p[0] as i32) as f64, (y0 + p[1] as i32) as f64, (z0 + p[2] as i32) as f64) * spacing
	};
	let t = (iso - va) / (vb - va);
	let (pa, pb) = (world(lo), world(hi));
	Some(pa + (pb - pa) * t)
}

// =============================================================================
// Accumulation
// =============================================================================

/// Points folded in from every chunk, deduplicated on exact coordinates.
pub struct PointCloud {
	fragment: PolyFragment,
	chunks: usize,
}

impl PointCloud {
	pub fn new(bounds: Aabb, estimate: usize, points_per_bucket: usize) -> Self {
		let grid = BucketGrid::for_points(bounds, estimate.max(1), points_per_bucket);
		Self {
			fragment: PolyFragment::new(grid, 0, 0),
			chunks: 0,
		}
	}

	pub fn absorb(&mut self, poly: &PolyData) {
		let ids: Vec<u32> = poly.points.iter().map(|&p| self.fragment.add_point(p, &[])).collect();
		for cell in poly.cells.get(Topology::Verts).cells() {
			let mapped: Vec<u32> = cell.iter().map(|&local| ids[local as usize]).collect();
			self.fragment.add_cell(Topology::Verts, &mapped, &[]);
		}
		self.chunks += 1;
	}

	pub fn points(&self) -> &[DVec3] {
		self.fragment.points.points()
	}

	/// Vertex cells absorbed, duplicates across chunks included.
	pub fn cell_count(&self) -> usize {
		self.fragment.cells.get(Topology::Verts).len()
	}

	pub fn chunk_count(&self) -> usize {
		self.chunks
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use demand_pipeline::{PieceRequest, Pipeline, PipelineContext, PoolConfig, StageId};

	fn pool() -> Arc<WorkerPool> {
		Arc::new(
			WorkerPool::new(&PoolConfig {
				threads: 3,
				grain: 4,
				..Default::default()
			})
			.unwrap(),
		)
	}

	/// `(pipeline, source, iso)` over a 12^3 sphere field.
	fn sphere_pipeline(pool: &Arc<WorkerPool>, slab_cells: i32) -> (Pipeline, StageId, StageId) {
		let source = ScalarFieldSource::new(FieldKind::Sphere, [12, 12, 12], 1.0, slab_cells);
		let mut pipeline = Pipeline::new(PipelineContext::new(Arc::clone(pool)));
		let src = pipeline.add_stage(source);
		let iso = pipeline.add_stage(IsoPoints::new(Arc::clone(pool), 4.0, 1.0, 3));
		pipeline.connect(src.port(0), iso, 0).unwrap();
		(pipeline, src, iso)
	}

	fn drain(pipeline: &mut Pipeline, iso: StageId) -> PointCloud {
		let bounds = lattice_bounds(Extent::new(0, 11, 0, 11, 0, 11), 1.0);
		let mut cloud = PointCloud::new(bounds, 1024, DEFAULT_POINTS_PER_BUCKET);
		for chunk in pipeline.stream(iso, 0) {
			let chunk = chunk.unwrap();
			if let Some(poly) = chunk.data.as_ref().and_then(|d| d.payload::<PolyData>()) {
				cloud.absorb(poly);
			}
		}
		cloud
	}

	fn run(pool: &Arc<WorkerPool>, slab_cells: i32, piece: PieceRequest) -> PointCloud {
		let (mut pipeline, _src, iso) = sphere_pipeline(pool, slab_cells);
		pipeline.set_update_piece(iso.port(0), piece).unwrap();
		drain(&mut pipeline, iso)
	}

	#[test]
	fn test_sphere_points_lie_on_the_iso_surface() {
		let pool = pool();
		let source = ScalarFieldSource::new(FieldKind::Sphere, [12, 12, 12], 1.0, 16);
		let grid = ScalarGrid::from_fn(source.whole_extent(), |i, j, k| source.sample(i, j, k, 0.0));
		let poly = extract_iso_points(&pool, &grid, 4.0, 1.0, 3, &ScalarTreeConfig::default()).unwrap();

		assert!(poly.point_count() > 0);
		let center = DVec3::splat(5.5);
		for p in &poly.points {
			// Linear interpolation along an edge stays within one edge length.
			assert!((p.distance(center) - 4.0).abs() < 1.0, "{p}");
		}
		let unique: std::collections::HashSet<[u64; 3]> =
			poly.points.iter().map(|p| p.to_array().map(f64::to_bits)).collect();
		assert_eq!(unique.len(), poly.point_count());
	}

	#[test]
	fn test_streamed_slabs_match_a_single_pass() {
		let pool = pool();
		let single = run(&pool, 64, PieceRequest::WHOLE);
		let streamed = run(&pool, 3, PieceRequest::WHOLE);

		assert_eq!(single.chunk_count(), 1);
		assert_eq!(streamed.chunk_count(), 4);
		assert_eq!(streamed.points().len(), single.points().len());
	}

	/// A finished stream only holds its last slab, so re-running a modified
	/// consumer streams the source again from the first slab.
	#[test]
	fn test_rerun_after_stream_restarts_the_source() {
		let pool = pool();
		let single = run(&pool, 64, PieceRequest::WHOLE);
		let (mut pipeline, src, iso) = sphere_pipeline(&pool, 3);

		let first = drain(&mut pipeline, iso);
		let produced = pipeline.output_data(src.port(0)).unwrap().unwrap().produced_extent();
		assert_eq!(produced, Some(Extent::new(0, 11, 0, 11, 9, 11)));
		assert!(pipeline.need_to_execute_data(src.port(0)).unwrap());

		pipeline.modified(iso).unwrap();
		let second = drain(&mut pipeline, iso);
		assert_eq!(second.chunk_count(), 4);
		assert_eq!(first.points().len(), single.points().len());
		assert_eq!(second.points().len(), single.points().len());
	}

	#[test]
	fn test_pieces_cover_the_same_points() {
		let pool = pool();
		let single = run(&pool, 64, PieceRequest::WHOLE);

		let mut pieces = PointCloud::new(lattice_bounds(Extent::new(0, 11, 0, 11, 0, 11), 1.0), 1024, 3);
		for piece in 0..3 {
			let part = run(&pool, 64, PieceRequest::new(piece, 3, 0));
			pieces.absorb(&PolyData {
				points: part.points().to_vec(),
				..Default::default()
			});
		}
		assert_eq!(pieces.points().len(), single.points().len());
	}

	#[test]
	fn test_ghost_layers_only_add_duplicates() {
		let pool = pool();
		let single = run(&pool, 64, PieceRequest::WHOLE);

		let mut pieces = PointCloud::new(lattice_bounds(Extent::new(0, 11, 0, 11, 0, 11), 1.0), 1024, 3);
		let mut emitted = 0;
		for piece in 0..2 {
			let part = run(&pool, 4, PieceRequest::new(piece, 2, 1));
			emitted += part.points().len();
			pieces.absorb(&PolyData {
				points: part.points().to_vec(),
				..Default::default()
			});
		}
		assert!(emitted > single.points().len());
		assert_eq!(pieces.points().len(), single.points().len());
	}

	#[test]
	fn test_flat_lattice_has_no_z_edges() {
		let pool = pool();
		let grid = ScalarGrid::from_fn(Extent::new(0, 3, 0, 3, 0, 0), |i, _, _| i as f64);
		let poly = extract_iso_points(&pool, &grid, 1.5, 1.0, 3, &ScalarTreeConfig::default()).unwrap();
		// One crossing per row between i = 1 and i = 2.
		assert_eq!(poly.point_count(), 4);
		assert!(poly.points.iter().all(|p| p.x == 1.5 && p.z == 0.0));
	}
}
