//! Streaming pipeline runner.
//!
//! Builds `scalar field -> iso points` from a TOML file, streams the request
//! through the executive one slab at a time (optionally split into pieces),
//! folds the chunks into one deduplicated point cloud, then indexes it with
//! an octree and runs the configured probes.

mod config;
mod stages;

use anyhow::{Context, Result};
use clap::Parser;
use demand_pipeline::merge::PolyData;
use demand_pipeline::pipeline::ParallelUpstreamStrategy;
use demand_pipeline::spatial::{OctreeConfig, PointOctree};
use demand_pipeline::{PieceRequest, Pipeline, PipelineContext, PoolConfig, StageId, WorkerPool};
use glam::DVec3;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use web_time::Instant;

use config::Config;
use stages::{lattice_bounds, IsoPoints, PointCloud, ScalarFieldSource};

/// Demand-driven streaming pipeline runner.
#[derive(Parser, Debug)]
#[command(name = "run_pipeline")]
#[command(about = "Streams a scalar field through iso-point extraction and indexes the result")]
struct Args {
	/// Path to configuration TOML file.
	#[arg(short, long)]
	config: PathBuf,

	/// Worker threads (overrides `pool.threads`).
	#[arg(short, long)]
	threads: Option<usize>,

	/// Pieces to request one after another (overrides `streaming.pieces`).
	#[arg(short, long)]
	pieces: Option<i32>,
}

fn main() -> Result<()> {
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
		.init();

	let args = Args::parse();
	info!(config = %args.config.display(), "loading config");
	let mut config = Config::load(&args.config)?;
	if let Some(threads) = args.threads {
		config.pool.threads = threads;
	}
	if let Some(pieces) = args.pieces {
		anyhow::ensure!(pieces >= 1, "--pieces must be at least 1, got {pieces}");
		config.streaming.pieces = pieces;
	}

	let pool = Arc::new(
		WorkerPool::new(&PoolConfig {
			threads: config.pool.threads,
			grain: config.pool.grain,
			thread_name_prefix: "pipeline".to_string(),
		})
		.context("Failed to start worker pool")?,
	);
	info!(threads = pool.threads(), grain = pool.grain(), "worker pool ready");

	let mut context = PipelineContext::new(Arc::clone(&pool));
	if config.pool.parallel_upstream {
		context = context.with_strategy(ParallelUpstreamStrategy::default());
	}
	let mut pipeline = Pipeline::new(context);

	let source = ScalarFieldSource::new(
		config.source.field,
		config.source.dimensions,
		config.source.spacing,
		config.streaming.slab_cells,
	)
	.with_time_steps(config.source.time_steps.clone());
	let source = match config.source.center {
		Some(center) => source.with_center(DVec3::from_array(center)),
		None => source,
	};
	let bounds = lattice_bounds(source.whole_extent(), config.source.spacing);
	let estimate = source.whole_extent().point_count() / 8;

	let src = pipeline.add_stage(source);
	let iso = pipeline.add_stage(IsoPoints::new(
		Arc::clone(&pool),
		config.extract.iso_value,
		config.source.spacing,
		config.extract.branching_factor,
	)
	.with_points_per_bucket(config.merge.points_per_bucket));
	pipeline.connect(src.port(0), iso, 0)?;
	if let Some(index) = config.source.time_index {
		pipeline.set_update_time_index(iso.port(0), index)?;
	}

	// =========================================================================
	// Stream
	// =========================================================================

	let started = Instant::now();
	let mut cloud = PointCloud::new(bounds, estimate, config.merge.points_per_bucket);
	let pieces = config.streaming.pieces;
	for piece in 0..pieces {
		pipeline.set_update_piece(iso.port(0), PieceRequest::new(piece, pieces, config.streaming.ghost))?;
		for chunk in pipeline.stream(iso, 0) {
			let chunk = chunk.with_context(|| format!("Streaming piece {piece} failed"))?;
			let Some(poly) = chunk.data.as_ref().and_then(|d| d.payload::<PolyData>()) else {
				warn!(piece, chunk = chunk.index, "chunk carried no points");
				continue;
			};
			info!(
				piece,
				chunk = chunk.index,
				points = poly.point_count(),
				more = chunk.more_remaining,
				"chunk"
			);
			cloud.absorb(poly);
		}
	}
	for error in pipeline.context().take_errors() {
		warn!(%error, "reported during run");
	}
	info!(
		chunks = cloud.chunk_count(),
		points = cloud.points().len(),
		cells = cloud.cell_count(),
		elapsed_ms = started.elapsed().as_millis() as u64,
		"extraction finished"
	);
	log_metrics(&pipeline, &[src, iso])?;

	// =========================================================================
	// Index and probe
	// =========================================================================

	let started = Instant::now();
	let octree = PointOctree::build_in(
		&pool,
		cloud.points().to_vec(),
		&OctreeConfig {
			max_points_per_region: config.octree.max_points_per_region,
			create_cubic_octants: config.octree.cubic_octants,
			..Default::default()
		},
	);
	info!(
		regions = octree.region_count(),
		elapsed_ms = started.elapsed().as_millis() as u64,
		"octree built"
	);

	for query in &config.queries {
		let probe = DVec3::from_array(query.point);
		match octree.closest_point(probe) {
			Some((id, dist2)) => info!(?probe, id, distance = dist2.sqrt(), "closest point"),
			None => info!(?probe, "no points to query"),
		}
		if let Some(n) = query.closest {
			let ids = octree.closest_n_points(probe, n);
			info!(?probe, n, found = ids.len(), "closest n");
		}
		if let Some(radius) = query.radius {
			let ids = octree.points_within_radius(probe, radius);
			info!(?probe, radius, found = ids.len(), "within radius");
		}
	}

	Ok(())
}

fn log_metrics(pipeline: &Pipeline, stages: &[StageId]) -> Result<()> {
	if !demand_pipeline::metrics::is_enabled() {
		return Ok(());
	}
	for &id in stages {
		let stage = pipeline.stage(id)?;
		let m = stage.metrics();
		info!(
			stage = stage.name(),
			executions = m.executions,
			continuations = m.continuations,
			skipped = m.skipped,
			failures = m.failures,
			avg_us = m.avg_data_timing_us(),
			"stage metrics"
		);
	}
	Ok(())
}
