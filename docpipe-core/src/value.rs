// src/value.rs
//! Tagged value type flowing through the pipeline
//!
//! Documents are schema-less, so every field value is one of these
//! variants. There is deliberately no `Null`: a field is either present
//! with a value or absent, and absence travels as `Option::None` through
//! the evaluator rather than as an in-band sentinel.

use crate::document::Document;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;

/// A single field value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Timestamp(DateTime<Utc>),
    Document(Document),
    Array(Vec<Value>),
}

impl Value {
    /// Variant name used in type-mismatch diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::Timestamp(_) => "timestamp",
            Value::Document(_) => "document",
            Value::Array(_) => "array",
        }
    }

    /// Numeric view, promoting ints to f64. `None` for non-numeric values.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Loose equality: `Int` and `Float` holding the same quantity are
    /// equal (join keys and `$in` sets must not care how a number was
    /// written).
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
                self.as_f64() == other.as_f64()
            }
            _ => self == other,
        }
    }

    /// Canonical string rendering used as a hash key for grouping and
    /// join-index buckets. Document keys are rendered in sorted order so
    /// logically equal composite keys collide regardless of field order;
    /// `Int(5)` and `Float(5.0)` render identically.
    pub fn canonical_string(&self) -> String {
        match self {
            Value::String(s) => format!("s:{}", s),
            Value::Int(n) => format!("n:{}", n),
            Value::Float(f) => {
                if f.fract() == 0.0 && f.is_finite() && f.abs() < i64::MAX as f64 {
                    format!("n:{}", *f as i64)
                } else {
                    format!("n:{}", f)
                }
            }
            Value::Bool(b) => format!("b:{}", b),
            Value::Timestamp(ts) => format!("t:{}", ts.to_rfc3339()),
            Value::Document(doc) => {
                let mut pairs: Vec<_> = doc.iter().collect();
                pairs.sort_by(|a, b| a.0.cmp(b.0));
                let inner: Vec<String> = pairs
                    .iter()
                    .map(|(k, v)| format!("\"{}\":{}", k, v.canonical_string()))
                    .collect();
                format!("{{{}}}", inner.join(","))
            }
            Value::Array(arr) => {
                let inner: Vec<String> = arr.iter().map(|v| v.canonical_string()).collect();
                format!("[{}]", inner.join(","))
            }
        }
    }

    /// Convert into a `serde_json::Value` (timestamps become RFC 3339
    /// strings). Used by the CLI to print results.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Int(n) => serde_json::Value::from(*n),
            Value::Float(f) => serde_json::Value::from(*f),
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Timestamp(ts) => serde_json::Value::String(ts.to_rfc3339()),
            Value::Document(doc) => doc.to_json(),
            Value::Array(arr) => {
                serde_json::Value::Array(arr.iter().map(|v| v.to_json()).collect())
            }
        }
    }
}

/// Compare two values
///
/// Returns `Some(Ordering)` for comparable pairs (numbers with numbers,
/// timestamps with timestamps, strings with strings, bools with bools),
/// `None` for incompatible pairs. Callers that require an ordering turn
/// `None` into a `TypeMismatch` error.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Some(x.cmp(y)),
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            a.as_f64()?.partial_cmp(&b.as_f64()?)
        }
        (Value::Timestamp(x), Value::Timestamp(y)) => Some(x.cmp(y)),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(ts: DateTime<Utc>) -> Self {
        Value::Timestamp(ts)
    }
}

impl From<Document> for Value {
    fn from(doc: Document) -> Self {
        Value::Document(doc)
    }
}

impl From<Vec<Value>> for Value {
    fn from(arr: Vec<Value>) -> Self {
        Value::Array(arr)
    }
}
