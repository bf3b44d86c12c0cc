//! The value model: a tagged variant over every kind the engine can hash,
//! encode, and pass between tasks.
//!
//! Keeping values as one closed enum (instead of ad-hoc type probing)
//! gives each kind exactly three behaviors: a hash contribution
//! ([`crate::hash`]), an encoder (the storage codec), and structural
//! equality. Sets carry their members in canonical order (sorted by member
//! digest) so equality and hashing agree regardless of insertion order.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::GraphError;

/// Element type of an [`NdArray`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Dtype {
    U8,
    I32,
    I64,
    F32,
    F64,
}

impl Dtype {
    /// Size of one element in bytes.
    pub fn size(&self) -> usize {
        match self {
            Dtype::U8 => 1,
            Dtype::I32 | Dtype::F32 => 4,
            Dtype::I64 | Dtype::F64 => 8,
        }
    }

    /// Stable name used in hashing and the codec.
    pub fn name(&self) -> &'static str {
        match self {
            Dtype::U8 => "u8",
            Dtype::I32 => "i32",
            Dtype::I64 => "i64",
            Dtype::F32 => "f32",
            Dtype::F64 => "f64",
        }
    }

    /// Single-byte tag used by the array encoder.
    pub fn tag(&self) -> u8 {
        match self {
            Dtype::U8 => b'u',
            Dtype::I32 => b'i',
            Dtype::I64 => b'l',
            Dtype::F32 => b'f',
            Dtype::F64 => b'd',
        }
    }

    /// Inverse of [`Dtype::tag`].
    pub fn from_tag(tag: u8) -> Option<Dtype> {
        match tag {
            b'u' => Some(Dtype::U8),
            b'i' => Some(Dtype::I32),
            b'l' => Some(Dtype::I64),
            b'f' => Some(Dtype::F32),
            b'd' => Some(Dtype::F64),
            _ => None,
        }
    }
}

/// A multi-dimensional numeric array: shape, element type, and the raw
/// little-endian element buffer. The buffer length must equal the element
/// count times the element size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NdArray {
    shape: Vec<u64>,
    dtype: Dtype,
    data: Vec<u8>,
}

impl NdArray {
    /// Builds an array, validating that `data` matches `shape` and `dtype`.
    pub fn new(shape: Vec<u64>, dtype: Dtype, data: Vec<u8>) -> Result<Self, GraphError> {
        let count: u64 = shape.iter().product();
        let expected = count as usize * dtype.size();
        if data.len() != expected {
            return Err(GraphError::ArrayShape {
                shape,
                dtype: dtype.name(),
                len: data.len(),
            });
        }
        Ok(NdArray { shape, dtype, data })
    }

    pub fn shape(&self) -> &[u64] {
        &self.shape
    }

    pub fn dtype(&self) -> Dtype {
        self.dtype
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Total number of elements.
    pub fn element_count(&self) -> u64 {
        self.shape.iter().product()
    }
}

/// Any value the engine can hash, store, and hand to a task function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// The unit/none value.
    Unit,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    /// An ordered sequence.
    List(Vec<Value>),
    /// A string-keyed mapping preserving insertion order.
    Map(IndexMap<String, Value>),
    /// A set in canonical (sorted-digest) member order. Construct through
    /// [`Value::set`] to maintain the canonical order invariant.
    Set(Vec<Value>),
    /// A multi-dimensional numeric array.
    Array(NdArray),
    /// An opaque binary payload (e.g. the bytes of an image file), stored
    /// verbatim by the codec.
    Blob(Vec<u8>),
}

impl Value {
    /// Builds a set value with members in canonical order: sorted by
    /// member digest, duplicates removed.
    pub fn set(members: Vec<Value>) -> Value {
        let mut keyed: Vec<(crate::digest::Digest, Value)> = members
            .into_iter()
            .map(|m| (crate::hash::value_digest(&m), m))
            .collect();
        keyed.sort_by(|a, b| a.0.cmp(&b.0));
        keyed.dedup_by(|a, b| a.0 == b.0);
        Value::Set(keyed.into_iter().map(|(_, m)| m).collect())
    }

    /// Stable name of this value's kind, used in errors and hashing.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Unit => "unit",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Set(_) => "set",
            Value::Array(_) => "array",
            Value::Blob(_) => "blob",
        }
    }

    /// Returns the integer payload, if this is an `Int`.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the string payload, if this is a `Str`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the bool payload, if this is a `Bool`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the list payload, if this is a `List`.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(v) => Some(v),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_array_shape_validation() {
        let ok = NdArray::new(vec![2, 3], Dtype::I32, vec![0u8; 24]);
        assert!(ok.is_ok());

        let bad = NdArray::new(vec![2, 3], Dtype::I32, vec![0u8; 23]);
        assert!(bad.is_err(), "mismatched buffer must be rejected");
    }

    #[test]
    fn test_set_is_canonical() {
        let a = Value::set(vec![Value::Int(3), Value::Int(1), Value::Int(2)]);
        let b = Value::set(vec![Value::Int(2), Value::Int(3), Value::Int(1)]);
        assert_eq!(a, b, "sets built in different orders must compare equal");
    }

    #[test]
    fn test_set_dedups() {
        let s = Value::set(vec![Value::Int(1), Value::Int(1), Value::Int(2)]);
        match s {
            Value::Set(members) => assert_eq!(members.len(), 2),
            other => panic!("expected Set, got {:?}", other),
        }
    }

    #[test]
    fn test_serde_roundtrip() {
        let v = Value::Map(
            [
                ("a".to_string(), Value::Int(1)),
                ("b".to_string(), Value::List(vec![Value::Bool(true), Value::Unit])),
            ]
            .into_iter()
            .collect(),
        );
        let json = serde_json::to_string(&v).unwrap();
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v);
    }
}
