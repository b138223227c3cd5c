use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A single scalar/structured value carried by a [`crate::Payload`].
///
/// This mirrors the handful of JSON-representable shapes the original
/// Python implementation ever puts in a payload's `data` field: it never
/// invents its own wire type, it just hands back whatever `json.loads`
/// produced. `Bulk` is the one addition -- large N-D numeric arrays never
/// travel inline, they ride in the companion binary frame and only a
/// description of their shape/dtype lives here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

/// Description of a bulk binary companion frame: an N-D numpy-style array
/// that was serialized by shape and dtype rather than inlined as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkDescriptor {
    pub shape: Vec<usize>,
    pub dtype: String,
}

impl BulkDescriptor {
    pub fn new(shape: Vec<usize>, dtype: impl Into<String>) -> Self {
        Self {
            shape,
            dtype: dtype.into(),
        }
    }

    /// Number of bytes a companion frame matching this descriptor must hold.
    pub fn expected_len(&self) -> usize {
        let elems: usize = self.shape.iter().product::<usize>().max(if self.shape.is_empty() { 1 } else { 0 });
        elems * dtype_size(&self.dtype)
    }
}

fn dtype_size(dtype: &str) -> usize {
    match dtype {
        "int8" | "uint8" | "bool" => 1,
        "int16" | "uint16" | "float16" => 2,
        "int32" | "uint32" | "float32" => 4,
        "int64" | "uint64" | "float64" => 8,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_roundtrips_through_json() {
        let v = Value::Map(BTreeMap::from([
            ("a".to_string(), Value::Int(1)),
            ("b".to_string(), Value::Array(vec![Value::Bool(true), Value::Null])),
        ]));
        let raw = serde_json::to_string(&v).unwrap();
        let back: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(v, back);
    }

    #[test]
    fn bulk_descriptor_expected_len() {
        let d = BulkDescriptor::new(vec![2, 3], "float64");
        assert_eq!(d.expected_len(), 2 * 3 * 8);
    }
}
