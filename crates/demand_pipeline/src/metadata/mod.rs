//! Typed key/value store attached to every pipeline connection point.
//!
//! ```text
//!   Metadata
//!   ├── WHOLE_EXTENT        -> IntegerVector[6]     (persistent)
//!   ├── TIME_STEPS          -> DoubleVector         (persistent)
//!   ├── EXTENT_TRANSLATOR   -> Object(Arc<..>)      (owned helper)
//!   ├── UPDATE_EXTENT       -> IntegerVector[6]     (per request)
//!   └── FIELDS              -> Metadata { .. }      (nested store)
//! ```
//!
//! Ownership is plain `Arc`: shallow copies share sub-objects and nested
//! stores, deep copies clone every level. Back references from a helper to
//! the data it indexes are stored as [`Value::WeakObject`] and are never
//! treated as owning, so no collector is needed to break cycles.
//! [`Metadata::report_references`] walks the owning edges for callers that
//! want to audit the graph.

mod key;
pub mod keys;
mod value;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub use key::{Key, KeyId};
pub use value::{MetadataObject, MetadataValue, ObjectRef, Value, WeakObjectRef};

use crate::extent::ExtentTranslator;

/// How [`Metadata::copy_from`] treats referenced sub-objects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CopyMode {
  /// Share vectors, nested stores, and owned objects.
  Shallow,
  /// Clone every nested store, vector, and owned object.
  Deep,
}

/// Mapping from key identity to value.
#[derive(Clone, Default)]
pub struct Metadata {
  entries: HashMap<KeyId, Value>,
}

impl Metadata {
  pub fn new() -> Self {
    Self::default()
  }

  #[inline]
  pub fn len(&self) -> usize {
    self.entries.len()
  }

  #[inline]
  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  // ===========================================================================
  // Typed access
  // ===========================================================================

  pub fn set<T: MetadataValue>(&mut self, key: &Key<T>, value: T) {
    self.entries.insert(key.id(), value.into_value());
  }

  /// Typed read. `None` if absent or stored with a different kind.
  pub fn get<T: MetadataValue>(&self, key: &Key<T>) -> Option<T> {
    self.entries.get(&key.id()).and_then(T::from_value)
  }

  pub fn has<T>(&self, key: &Key<T>) -> bool {
    self.entries.contains_key(&key.id())
  }

  /// Removes the entry, returning whether it was present.
  pub fn remove<T>(&mut self, key: &Key<T>) -> bool {
    self.entries.remove(&key.id()).is_some()
  }

  /// Borrow a nested store without cloning it.
  pub fn nested(&self, key: &Key<Metadata>) -> Option<&Metadata> {
    match self.entries.get(&key.id()) {
      Some(Value::Metadata(m)) => Some(m),
      _ => None,
    }
  }

  /// Mutable nested store, created empty if absent.
  ///
  /// A nested store shared with a shallow copy is cloned first, so the other
  /// copy keeps seeing the old entries.
  pub fn nested_mut(&mut self, key: &Key<Metadata>) -> &mut Metadata {
    let slot = self
      .entries
      .entry(key.id())
      .or_insert_with(|| Value::Metadata(Arc::new(Metadata::new())));
    if !matches!(slot, Value::Metadata(_)) {
      *slot = Value::Metadata(Arc::new(Metadata::new()));
    }
    match slot {
      Value::Metadata(m) => Arc::make_mut(m),
      _ => unreachable!("slot was just replaced with a nested store"),
    }
  }

  /// Resolve the translator capability of an owned object entry.
  pub fn extent_translator(&self, key: &Key<ObjectRef>) -> Option<&dyn ExtentTranslator> {
    match self.entries.get(&key.id()) {
      Some(Value::Object(o)) => o.as_extent_translator(),
      _ => None,
    }
  }

  // ===========================================================================
  // Untyped access
  // ===========================================================================

  pub fn value(&self, id: KeyId) -> Option<&Value> {
    self.entries.get(&id)
  }

  pub fn set_value(&mut self, id: KeyId, value: Value) {
    self.entries.insert(id, value);
  }

  pub fn remove_value(&mut self, id: KeyId) -> Option<Value> {
    self.entries.remove(&id)
  }

  pub fn keys(&self) -> impl Iterator<Item = KeyId> + '_ {
    self.entries.keys().copied()
  }

  pub fn iter(&self) -> impl Iterator<Item = (KeyId, &Value)> + '_ {
    self.entries.iter().map(|(k, v)| (*k, v))
  }

  // ===========================================================================
  // Copying
  // ===========================================================================

  /// Replace every entry with those of `other`.
  pub fn copy_from(&mut self, other: &Metadata, mode: CopyMode) {
    self.entries = match mode {
      CopyMode::Shallow => other.entries.clone(),
      CopyMode::Deep => other
        .entries
        .iter()
        .map(|(k, v)| (*k, v.deep_clone()))
        .collect(),
    };
  }

  /// Copy one entry from `other`, or remove it here if `other` lacks it.
  pub fn copy_entry(&mut self, other: &Metadata, id: KeyId) {
    match other.entries.get(&id) {
      Some(v) => {
        self.entries.insert(id, v.clone());
      }
      None => {
        self.entries.remove(&id);
      }
    }
  }

  /// Copy each listed entry from `other` (see [`Metadata::copy_entry`]).
  pub fn copy_entries(&mut self, other: &Metadata, ids: &[KeyId]) {
    for &id in ids {
      self.copy_entry(other, id);
    }
  }

  pub fn shallow_copy(&self) -> Metadata {
    self.clone()
  }

  pub fn deep_copy(&self) -> Metadata {
    let mut out = Metadata::new();
    out.copy_from(self, CopyMode::Deep);
    out
  }

  // ===========================================================================
  // Ownership
  // ===========================================================================

  /// Visit every owned object reachable from this store, including objects
  /// held by nested stores and objects reported by other objects.
  ///
  /// Weak references are skipped. An object reachable along several paths
  /// is visited once per path.
  pub fn report_references(&self, visitor: &mut dyn FnMut(&ObjectRef)) {
    for value in self.entries.values() {
      match value {
        Value::Object(o) => {
          visitor(o);
          o.report_references(visitor);
        }
        Value::Metadata(m) => m.report_references(visitor),
        Value::MetadataVector(v) => {
          for m in v.iter() {
            m.report_references(visitor);
          }
        }
        _ => {}
      }
    }
  }

  /// Drop phase-specific entries when the owning connection is reset.
  pub fn reset_pipeline_entries(&mut self) {
    for id in keys::PIPELINE_RESET_KEYS {
      self.entries.remove(&id);
    }
  }
}

impl fmt::Debug for Metadata {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut entries: Vec<_> = self.entries.iter().collect();
    entries.sort_by_key(|(k, _)| **k);
    f.debug_map().entries(entries).finish()
  }
}
