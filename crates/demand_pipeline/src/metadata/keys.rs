//! Keys exchanged between the executive and algorithms.
//!
//! Persistent entries describe what a producer can deliver; `UPDATE_*`
//! entries describe what a consumer is asking for right now.

use super::{Key, KeyId, ObjectRef};
use crate::extent::Extent;

const LOCATION: &str = "streaming";

/// Full domain a structured producer can deliver.
pub const WHOLE_EXTENT: Key<Extent> = Key::new("WHOLE_EXTENT", LOCATION);

/// Sub-region currently requested from a structured output.
pub const UPDATE_EXTENT: Key<Extent> = Key::new("UPDATE_EXTENT", LOCATION);

/// Set when the update request was chosen explicitly rather than defaulted.
pub const UPDATE_EXTENT_INITIALIZED: Key<bool> = Key::new("UPDATE_EXTENT_INITIALIZED", LOCATION);

/// Crop produced structured data down to exactly the update extent.
pub const EXACT_EXTENT: Key<bool> = Key::new("EXACT_EXTENT", LOCATION);

/// Largest number of pieces a producer can split into; `-1` means unbounded.
pub const MAXIMUM_NUMBER_OF_PIECES: Key<i32> = Key::new("MAXIMUM_NUMBER_OF_PIECES", LOCATION);

/// Sentinel for [`MAXIMUM_NUMBER_OF_PIECES`].
pub const UNBOUNDED_PIECES: i32 = -1;

pub const UPDATE_PIECE_NUMBER: Key<i32> = Key::new("UPDATE_PIECE_NUMBER", LOCATION);
pub const UPDATE_NUMBER_OF_PIECES: Key<i32> = Key::new("UPDATE_NUMBER_OF_PIECES", LOCATION);
pub const UPDATE_NUMBER_OF_GHOST_LEVELS: Key<i32> = Key::new("UPDATE_NUMBER_OF_GHOST_LEVELS", LOCATION);

/// Present on a request when the stage is being re-run after asking for more.
pub const CONTINUE_EXECUTING: Key<bool> = Key::new("CONTINUE_EXECUTING", LOCATION);

/// Owned object exposing the extent-translator capability.
pub const EXTENT_TRANSLATOR: Key<ObjectRef> = Key::new("EXTENT_TRANSLATOR", LOCATION);

/// Spatial bounds of the whole dataset, `[x0, x1, y0, y1, z0, z1]`.
pub const WHOLE_BOUNDING_BOX: Key<Vec<f64>> = Key::new("WHOLE_BOUNDING_BOX", LOCATION);

/// Time samples a producer can deliver.
pub const TIME_STEPS: Key<Vec<f64>> = Key::new("TIME_STEPS", LOCATION);

/// Time samples a consumer is asking for.
pub const UPDATE_TIME_STEPS: Key<Vec<f64>> = Key::new("UPDATE_TIME_STEPS", LOCATION);

/// Index into [`TIME_STEPS`] a consumer is asking for.
pub const UPDATE_TIME_INDEX: Key<i32> = Key::new("UPDATE_TIME_INDEX", LOCATION);

/// Entries removed when a connection is reset.
pub const PIPELINE_RESET_KEYS: [KeyId; 11] = [
  WHOLE_EXTENT.id(),
  MAXIMUM_NUMBER_OF_PIECES.id(),
  EXTENT_TRANSLATOR.id(),
  UPDATE_EXTENT_INITIALIZED.id(),
  UPDATE_EXTENT.id(),
  UPDATE_PIECE_NUMBER.id(),
  UPDATE_NUMBER_OF_PIECES.id(),
  UPDATE_NUMBER_OF_GHOST_LEVELS.id(),
  UPDATE_TIME_INDEX.id(),
  UPDATE_TIME_STEPS.id(),
  EXACT_EXTENT.id(),
];

/// Request entries a consumer hands to its producer during update-extent
/// propagation. [`EXACT_EXTENT`] stays with the output it was set on.
pub const REQUEST_KEYS: [KeyId; 7] = [
  UPDATE_EXTENT.id(),
  UPDATE_EXTENT_INITIALIZED.id(),
  UPDATE_PIECE_NUMBER.id(),
  UPDATE_NUMBER_OF_PIECES.id(),
  UPDATE_NUMBER_OF_GHOST_LEVELS.id(),
  UPDATE_TIME_INDEX.id(),
  UPDATE_TIME_STEPS.id(),
];

/// Producer facts copied from the first input onto every output by default.
pub const DOWNSTREAM_KEYS: [KeyId; 5] = [
  WHOLE_BOUNDING_BOX.id(),
  WHOLE_EXTENT.id(),
  MAXIMUM_NUMBER_OF_PIECES.id(),
  EXTENT_TRANSLATOR.id(),
  TIME_STEPS.id(),
];
