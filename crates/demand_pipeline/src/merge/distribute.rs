//! Parallel split of poly data into per-worker pieces.
//!
//! ```text
//!   cells, topology order:  [ verts | lines | polys | strips ]
//!   pieces:                 [ piece 0  |  piece 1  |  piece 2 ]
//! ```
//!
//! Each piece owns a contiguous run of cells and copies only the points
//! those cells use, renumbered in first-use order. Points no cell uses go
//! to the piece whose share of the point range holds them. Every piece is
//! built by the worker that will own it.

use std::collections::HashMap;

use smallvec::SmallVec;

use super::cells::{AttributeTable, Topology};
use super::engine::PolyData;
use crate::error::MergeError;
use crate::smp::WorkerPool;

/// Split `input` into `pieces` pieces (at least one), built in parallel.
///
/// Appending the pieces in order restores every cell and its data in the
/// input order; points shared between pieces are duplicated.
#[cfg_attr(feature = "profiling", tracing::instrument(skip_all, name = "merge::distribute"))]
pub fn distribute_poly_data(pool: &WorkerPool, input: &PolyData, pieces: usize) -> Result<Vec<PolyData>, MergeError> {
  input.check_tuple_counts()?;
  let pieces = pieces.max(1);

  let mut used = vec![false; input.points.len()];
  for t in Topology::ALL {
    for &id in &input.cells.get(t).connectivity {
      used[id as usize] = true;
    }
  }

  let mut out: Vec<PolyData> = (0..pieces).map(|_| PolyData::default()).collect();
  pool.parallel_each_mut(&mut out, 0, |_, piece, data| {
    *data = build_piece(input, &used, piece, pieces);
  });

  tracing::debug!(
    pieces,
    cells = input.cells.total_cells(),
    points = ?out.iter().map(PolyData::point_count).collect::<Vec<_>>(),
    "poly data distributed"
  );
  Ok(out)
}

/// `[first, last)` of `len` items belonging to `piece` of `pieces`.
#[inline]
fn share(len: usize, piece: usize, pieces: usize) -> (usize, usize) {
  (len * piece / pieces, len * (piece + 1) / pieces)
}

struct PieceBuilder<'a> {
  input: &'a PolyData,
  local: HashMap<u32, u32>,
  data: PolyData,
}

impl<'a> PieceBuilder<'a> {
  fn new(input: &'a PolyData) -> Self {
    Self {
      input,
      local: HashMap::new(),
      data: PolyData {
        point_data: AttributeTable::new(input.point_data.components),
        cell_data: AttributeTable::new(input.cell_data.components),
        ..PolyData::default()
      },
    }
  }

  /// Local id of input point `id`, copying it on first use.
  fn point(&mut self, id: u32) -> u32 {
    let data = &mut self.data;
    let input = self.input;
    *self.local.entry(id).or_insert_with(|| {
      let local = data.points.len() as u32;
      data.points.push(input.points[id as usize]);
      if input.point_data.components > 0 {
        data.point_data.push_tuple(input.point_data.tuple(id as usize));
      }
      local
    })
  }
}

fn build_piece(input: &PolyData, used: &[bool], piece: usize, pieces: usize) -> PolyData {
  let mut builder = PieceBuilder::new(input);
  let (first, last) = share(input.cells.total_cells(), piece, pieces);

  let mut base = 0;
  for t in Topology::ALL {
    let array = input.cells.get(t);
    let lo = first.clamp(base, base + array.len()) - base;
    let hi = last.clamp(base, base + array.len()) - base;
    for cell in lo..hi {
      let ids: SmallVec<[u32; 8]> = array.cell(cell).iter().map(|&id| builder.point(id)).collect();
      builder.data.cells.get_mut(t).push_cell(&ids);
      if input.cell_data.components > 0 {
        builder.data.cell_data.push_tuple(input.cell_data.tuple(base + cell));
      }
    }
    base += array.len();
  }

  let (first, last) = share(input.points.len(), piece, pieces);
  for id in first..last {
    if !used[id] {
      builder.point(id as u32);
    }
  }
  builder.data
}

#[cfg(test)]
#[path = "distribute_test.rs"]
mod distribute_test;
