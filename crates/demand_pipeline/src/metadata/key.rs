//! Identity-typed metadata keys.

use std::fmt;
use std::marker::PhantomData;

/// Untyped key identity: unique by `(name, location)`.
///
/// Two keys with the same name declared in different modules are distinct.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyId {
  name: &'static str,
  location: &'static str,
}

impl KeyId {
  pub const fn new(name: &'static str, location: &'static str) -> Self {
    Self { name, location }
  }

  #[inline]
  pub fn name(&self) -> &'static str {
    self.name
  }

  #[inline]
  pub fn location(&self) -> &'static str {
    self.location
  }
}

impl fmt::Debug for KeyId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}::{}", self.location, self.name)
  }
}

impl fmt::Display for KeyId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    fmt::Debug::fmt(self, f)
  }
}

/// A typed key. Carries no value; `T` fixes what can be stored under it.
///
/// ```ignore
/// pub const STENCIL_RADIUS: Key<i32> = Key::new("STENCIL_RADIUS", "my_filter");
/// info.set(&STENCIL_RADIUS, 2);
/// ```
pub struct Key<T> {
  id: KeyId,
  _value: PhantomData<fn() -> T>,
}

impl<T> Key<T> {
  pub const fn new(name: &'static str, location: &'static str) -> Self {
    Self {
      id: KeyId::new(name, location),
      _value: PhantomData,
    }
  }

  #[inline]
  pub const fn id(&self) -> KeyId {
    self.id
  }

  #[inline]
  pub fn name(&self) -> &'static str {
    self.id.name
  }
}

impl<T> Clone for Key<T> {
  fn clone(&self) -> Self {
    *self
  }
}

impl<T> Copy for Key<T> {}

impl<T> PartialEq for Key<T> {
  fn eq(&self, other: &Self) -> bool {
    self.id == other.id
  }
}

impl<T> Eq for Key<T> {}

impl<T> fmt::Debug for Key<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Key({:?})", self.id)
  }
}
