//! Values stored in a [`Metadata`](super::Metadata) object.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};

use super::Metadata;
use crate::extent::{Extent, ExtentTranslator};

/// Owned helper object stored in metadata (translators, spatial indexes, ...).
///
/// Capabilities the executive needs are exposed through the optional
/// accessor methods instead of downcasting.
pub trait MetadataObject: Any + Send + Sync + fmt::Debug {
  fn type_name(&self) -> &'static str;

  fn as_any(&self) -> &dyn Any;

  /// Independent copy used by deep metadata copies.
  fn deep_clone(&self) -> ObjectRef;

  /// Owned objects this object keeps alive, for cycle reporting.
  fn report_references(&self, _visitor: &mut dyn FnMut(&ObjectRef)) {}

  fn as_extent_translator(&self) -> Option<&dyn ExtentTranslator> {
    None
  }
}

/// Owning handle to a metadata object.
pub type ObjectRef = Arc<dyn MetadataObject>;

/// Non-owning back reference. Never reported, never keeps its target alive.
pub type WeakObjectRef = Weak<dyn MetadataObject>;

/// A single stored value.
///
/// Vectors and nested stores sit behind `Arc` so a shallow copy shares them;
/// a deep copy re-allocates every level.
#[derive(Clone)]
pub enum Value {
  Integer(i64),
  Double(f64),
  Flag(bool),
  String(Arc<str>),
  IntegerVector(Arc<[i64]>),
  DoubleVector(Arc<[f64]>),
  Metadata(Arc<Metadata>),
  MetadataVector(Arc<[Metadata]>),
  Object(ObjectRef),
  WeakObject(WeakObjectRef),
}

impl Value {
  /// Short name of the variant, for diagnostics.
  pub fn kind(&self) -> &'static str {
    match self {
      Value::Integer(_) => "integer",
      Value::Double(_) => "double",
      Value::Flag(_) => "flag",
      Value::String(_) => "string",
      Value::IntegerVector(_) => "integer vector",
      Value::DoubleVector(_) => "double vector",
      Value::Metadata(_) => "metadata",
      Value::MetadataVector(_) => "metadata vector",
      Value::Object(_) => "object",
      Value::WeakObject(_) => "weak object",
    }
  }

  /// Recursively independent copy. Weak references stay weak.
  pub fn deep_clone(&self) -> Value {
    match self {
      Value::IntegerVector(v) => Value::IntegerVector(Arc::from(&v[..])),
      Value::DoubleVector(v) => Value::DoubleVector(Arc::from(&v[..])),
      Value::String(s) => Value::String(Arc::from(&s[..])),
      Value::Metadata(m) => Value::Metadata(Arc::new(m.deep_copy())),
      Value::MetadataVector(v) => {
        let copies: Vec<Metadata> = v.iter().map(Metadata::deep_copy).collect();
        Value::MetadataVector(Arc::from(copies))
      }
      Value::Object(o) => Value::Object(o.deep_clone()),
      other => other.clone(),
    }
  }
}

impl fmt::Debug for Value {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Value::Integer(v) => write!(f, "{v}"),
      Value::Double(v) => write!(f, "{v}"),
      Value::Flag(v) => write!(f, "{v}"),
      Value::String(v) => write!(f, "{v:?}"),
      Value::IntegerVector(v) => write!(f, "{:?}", &v[..]),
      Value::DoubleVector(v) => write!(f, "{:?}", &v[..]),
      Value::Metadata(m) => write!(f, "{m:?}"),
      Value::MetadataVector(v) => write!(f, "{:?}", &v[..]),
      Value::Object(o) => write!(f, "<{}>", o.type_name()),
      Value::WeakObject(w) => match w.upgrade() {
        Some(o) => write!(f, "<weak {}>", o.type_name()),
        None => write!(f, "<weak dangling>"),
      },
    }
  }
}

// =============================================================================
// Typed conversion
// =============================================================================

/// Rust types that can be stored under a [`Key`](super::Key).
pub trait MetadataValue: Sized {
  fn into_value(self) -> Value;
  fn from_value(value: &Value) -> Option<Self>;
}

impl MetadataValue for i64 {
  fn into_value(self) -> Value {
    Value::Integer(self)
  }

  fn from_value(value: &Value) -> Option<Self> {
    match value {
      Value::Integer(v) => Some(*v),
      _ => None,
    }
  }
}

impl MetadataValue for i32 {
  fn into_value(self) -> Value {
    Value::Integer(self as i64)
  }

  fn from_value(value: &Value) -> Option<Self> {
    match value {
      Value::Integer(v) => i32::try_from(*v).ok(),
      _ => None,
    }
  }
}

impl MetadataValue for f64 {
  fn into_value(self) -> Value {
    Value::Double(self)
  }

  fn from_value(value: &Value) -> Option<Self> {
    match value {
      Value::Double(v) => Some(*v),
      _ => None,
    }
  }
}

impl MetadataValue for bool {
  fn into_value(self) -> Value {
    Value::Flag(self)
  }

  fn from_value(value: &Value) -> Option<Self> {
    match value {
      Value::Flag(v) => Some(*v),
      _ => None,
    }
  }
}

impl MetadataValue for String {
  fn into_value(self) -> Value {
    Value::String(Arc::from(self))
  }

  fn from_value(value: &Value) -> Option<Self> {
    match value {
      Value::String(v) => Some(v.to_string()),
      _ => None,
    }
  }
}

impl MetadataValue for Vec<i64> {
  fn into_value(self) -> Value {
    Value::IntegerVector(Arc::from(self))
  }

  fn from_value(value: &Value) -> Option<Self> {
    match value {
      Value::IntegerVector(v) => Some(v.to_vec()),
      _ => None,
    }
  }
}

impl MetadataValue for Vec<f64> {
  fn into_value(self) -> Value {
    Value::DoubleVector(Arc::from(self))
  }

  fn from_value(value: &Value) -> Option<Self> {
    match value {
      Value::DoubleVector(v) => Some(v.to_vec()),
      _ => None,
    }
  }
}

/// Stored as a six-element integer vector; other lengths do not decode.
impl MetadataValue for Extent {
  fn into_value(self) -> Value {
    let v: Vec<i64> = self.0.iter().map(|&c| c as i64).collect();
    Value::IntegerVector(Arc::from(v))
  }

  fn from_value(value: &Value) -> Option<Self> {
    match value {
      Value::IntegerVector(v) if v.len() == 6 => {
        let mut out = [0i32; 6];
        for (dst, &src) in out.iter_mut().zip(v.iter()) {
          *dst = i32::try_from(src).ok()?;
        }
        Some(Extent(out))
      }
      _ => None,
    }
  }
}

impl MetadataValue for Metadata {
  fn into_value(self) -> Value {
    Value::Metadata(Arc::new(self))
  }

  fn from_value(value: &Value) -> Option<Self> {
    match value {
      Value::Metadata(m) => Some(Metadata::clone(m)),
      _ => None,
    }
  }
}

impl MetadataValue for Vec<Metadata> {
  fn into_value(self) -> Value {
    Value::MetadataVector(Arc::from(self))
  }

  fn from_value(value: &Value) -> Option<Self> {
    match value {
      Value::MetadataVector(v) => Some(v.to_vec()),
      _ => None,
    }
  }
}

impl MetadataValue for ObjectRef {
  fn into_value(self) -> Value {
    Value::Object(self)
  }

  fn from_value(value: &Value) -> Option<Self> {
    match value {
      Value::Object(o) => Some(Arc::clone(o)),
      _ => None,
    }
  }
}

impl MetadataValue for WeakObjectRef {
  fn into_value(self) -> Value {
    Value::WeakObject(self)
  }

  fn from_value(value: &Value) -> Option<Self> {
    match value {
      Value::WeakObject(w) => Some(Weak::clone(w)),
      _ => None,
    }
  }
}
