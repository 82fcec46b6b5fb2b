//! Data objects flowing along connections.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::extent::{DataExtent, Extent, ExtentType, PieceRequest};

/// Concrete dataset carried by a [`DataObject`].
///
/// Payloads are immutable once published; producers build a new one per
/// execution and consumers share it through `Arc`.
pub trait Payload: Any + Send + Sync + fmt::Debug {
  fn as_any(&self) -> &dyn Any;

  /// Copy restricted to `target`, for structured payloads covering
  /// `produced`. `None` means the payload cannot be cropped.
  fn crop(&self, _produced: &Extent, _target: &Extent) -> Option<Arc<dyn Payload>> {
    None
  }
}

/// Output slot contents: a payload plus what it covers.
///
/// `produced` and the time fields are written by the algorithm after a data
/// phase and are what the next re-execution decision compares against.
#[derive(Clone, Debug)]
pub struct DataObject {
  extent_type: ExtentType,
  pub produced: Option<DataExtent>,
  pub time_index: Option<i32>,
  pub time_steps: Option<Vec<f64>>,
  payload: Option<Arc<dyn Payload>>,
}

impl DataObject {
  pub fn new(extent_type: ExtentType) -> Self {
    Self {
      extent_type,
      produced: None,
      time_index: None,
      time_steps: None,
      payload: None,
    }
  }

  #[inline]
  pub fn extent_type(&self) -> ExtentType {
    self.extent_type
  }

  /// Typed view of the payload.
  pub fn payload<T: Payload>(&self) -> Option<&T> {
    self.payload.as_deref()?.as_any().downcast_ref::<T>()
  }

  pub fn payload_arc(&self) -> Option<&Arc<dyn Payload>> {
    self.payload.as_ref()
  }

  pub fn set_payload(&mut self, payload: impl Payload) {
    self.payload = Some(Arc::new(payload));
  }

  pub fn set_payload_arc(&mut self, payload: Arc<dyn Payload>) {
    self.payload = Some(payload);
  }

  pub fn produced_extent(&self) -> Option<Extent> {
    match self.produced {
      Some(DataExtent::Structured(e)) => Some(e),
      _ => None,
    }
  }

  pub fn produced_piece(&self) -> Option<PieceRequest> {
    match self.produced {
      Some(DataExtent::Pieces(p)) => Some(p),
      _ => None,
    }
  }

  pub fn set_produced_extent(&mut self, extent: Extent) {
    self.produced = Some(DataExtent::Structured(extent));
  }

  pub fn set_produced_piece(&mut self, piece: PieceRequest) {
    self.produced = Some(DataExtent::Pieces(piece));
  }

  /// Forget the payload and what it covered.
  pub fn clear(&mut self) {
    self.payload = None;
    self.produced = None;
    self.time_index = None;
    self.time_steps = None;
  }
}

// =============================================================================
// ScalarGrid
// =============================================================================

/// Point scalars on a structured grid, x fastest.
#[derive(Clone, Debug, PartialEq)]
pub struct ScalarGrid {
  pub extent: Extent,
  pub values: Vec<f64>,
}

impl ScalarGrid {
  /// Sample `f(i, j, k)` at every point of `extent`.
  pub fn from_fn(extent: Extent, f: impl Fn(i32, i32, i32) -> f64) -> Self {
    let mut values = Vec::with_capacity(extent.point_count());
    if !extent.is_empty() {
      let [x0, x1, y0, y1, z0, z1] = extent.0;
      for k in z0..=z1 {
        for j in y0..=y1 {
          for i in x0..=x1 {
            values.push(f(i, j, k));
          }
        }
      }
    }
    Self { extent, values }
  }

  /// Linear index of structured point `(i, j, k)`.
  pub fn index_of(&self, i: i32, j: i32, k: i32) -> Option<usize> {
    let e = self.extent.0;
    if i < e[0] || i > e[1] || j < e[2] || j > e[3] || k < e[4] || k > e[5] {
      return None;
    }
    let [nx, ny, _] = self.extent.dimensions();
    let (di, dj, dk) = ((i - e[0]) as usize, (j - e[2]) as usize, (k - e[4]) as usize);
    Some(di + nx * (dj + ny * dk))
  }

  pub fn value_at(&self, i: i32, j: i32, k: i32) -> Option<f64> {
    self.index_of(i, j, k).map(|idx| self.values[idx])
  }
}

impl Payload for ScalarGrid {
  fn as_any(&self) -> &dyn Any {
    self
  }

  fn crop(&self, produced: &Extent, target: &Extent) -> Option<Arc<dyn Payload>> {
    if *produced != self.extent {
      return None;
    }
    let target = produced.intersect(target);
    let grid = ScalarGrid::from_fn(target, |i, j, k| self.value_at(i, j, k).unwrap_or(f64::NAN));
    Some(Arc::new(grid))
  }
}
