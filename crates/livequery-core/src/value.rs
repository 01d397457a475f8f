//! The tagged value sum used at the data boundary.
//!
//! Map entries are untyped records: a mapping from attribute name to
//! [`Value`]. Comparison rules are strict: equality is defined per tag,
//! ordering refuses to compare across tags, and an absent attribute reads
//! as [`Value::Null`].

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

/// A dynamically typed value stored in a map entry attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Absent or explicitly null.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating point number.
    Float(f64),
    /// UTF-8 string.
    String(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// Ordered list of values.
    List(Vec<Value>),
    /// Nested record.
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Name of the tag, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    /// True for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Borrow the string content, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Compare two values of the same tag.
    ///
    /// Returns `None` for cross-tag comparisons, for NaN floats, and for
    /// maps (which have no defined ordering). Lists compare element-wise
    /// under the same rules.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Bytes(a), Value::Bytes(b)) => Some(a.cmp(b)),
            (Value::List(a), Value::List(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    match x.compare(y)? {
                        Ordering::Equal => continue,
                        other => return Some(other),
                    }
                }
                Some(a.len().cmp(&b.len()))
            }
            (Value::Map(_), Value::Map(_)) => None,
            _ => None,
        }
    }

    /// Canonical bucket key for reverse-index equality lookups.
    ///
    /// The key carries the tag so that `Int(1)` and `String("1")` land in
    /// different buckets.
    pub fn bucket_key(&self) -> String {
        match self {
            Value::Null => "n:".to_string(),
            Value::Bool(b) => format!("b:{}", b),
            Value::Int(i) => format!("i:{}", i),
            Value::Float(f) => format!("f:{}", f),
            Value::String(s) => format!("s:{}", s),
            Value::Bytes(b) => {
                let mut out = String::with_capacity(2 + b.len() * 2);
                out.push_str("x:");
                for byte in b {
                    out.push_str(&format!("{:02x}", byte));
                }
                out
            }
            other => format!(
                "j:{}",
                serde_json::to_string(other).unwrap_or_else(|_| String::new())
            ),
        }
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
    fn from(i: i64) -> Self {
        Value::Int(i)
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

/// A map entry: attribute name to value, in deterministic order.
pub type Record = BTreeMap<String, Value>;

/// Wrap a record into a [`Value::Map`] for transport in frames.
pub fn record_to_value(record: &Record) -> Value {
    Value::Map(record.clone())
}

/// The set of attributes that differ between two versions of a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldChanges {
    /// The containers differ in structure (add, remove, or shape change);
    /// every field must be treated as changed.
    All,
    /// Exactly these attributes changed value.
    Fields(BTreeSet<String>),
}

impl FieldChanges {
    /// True when no attribute changed.
    pub fn is_empty(&self) -> bool {
        matches!(self, FieldChanges::Fields(f) if f.is_empty())
    }
}

/// Compute which attributes changed between `old` and `new`.
///
/// A missing side (entry added or removed) reports [`FieldChanges::All`].
pub fn changed_fields(old: Option<&Record>, new: Option<&Record>) -> FieldChanges {
    let (old, new) = match (old, new) {
        (Some(o), Some(n)) => (o, n),
        _ => return FieldChanges::All,
    };

    let mut changed = BTreeSet::new();
    for (field, value) in old {
        if new.get(field) != Some(value) {
            changed.insert(field.clone());
        }
    }
    for field in new.keys() {
        if !old.contains_key(field) {
            changed.insert(field.clone());
        }
    }
    FieldChanges::Fields(changed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pairs: &[(&str, Value)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_equality_is_per_tag() {
        assert_ne!(Value::Int(1), Value::Float(1.0));
        assert_ne!(Value::String("1".into()), Value::Int(1));
        assert_eq!(Value::Int(1), Value::Int(1));
    }

    #[test]
    fn test_cross_tag_ordering_refused() {
        assert_eq!(Value::Int(1).compare(&Value::Float(2.0)), None);
        assert_eq!(Value::String("a".into()).compare(&Value::Null), None);
    }

    #[test]
    fn test_same_tag_ordering() {
        assert_eq!(
            Value::Int(1).compare(&Value::Int(2)),
            Some(Ordering::Less)
        );
        assert_eq!(
            Value::String("b".into()).compare(&Value::String("a".into())),
            Some(Ordering::Greater)
        );
        assert_eq!(
            Value::Float(1.5).compare(&Value::Float(1.5)),
            Some(Ordering::Equal)
        );
    }

    #[test]
    fn test_nan_refused() {
        assert_eq!(Value::Float(f64::NAN).compare(&Value::Float(1.0)), None);
    }

    #[test]
    fn test_list_ordering_elementwise() {
        let a = Value::List(vec![Value::Int(1), Value::Int(2)]);
        let b = Value::List(vec![Value::Int(1), Value::Int(3)]);
        assert_eq!(a.compare(&b), Some(Ordering::Less));

        let mixed = Value::List(vec![Value::String("1".into())]);
        assert_eq!(a.compare(&mixed), None);
    }

    #[test]
    fn test_bucket_keys_distinguish_tags() {
        assert_ne!(Value::Int(1).bucket_key(), Value::String("1".into()).bucket_key());
        assert_ne!(Value::Bool(true).bucket_key(), Value::String("true".into()).bucket_key());
        assert_eq!(Value::Int(7).bucket_key(), Value::Int(7).bucket_key());
    }

    #[test]
    fn test_changed_fields_diff() {
        let old = record(&[("a", Value::Int(1)), ("b", Value::Int(2))]);
        let new = record(&[("a", Value::Int(1)), ("b", Value::Int(3)), ("c", Value::Int(4))]);

        match changed_fields(Some(&old), Some(&new)) {
            FieldChanges::Fields(f) => {
                assert!(f.contains("b"));
                assert!(f.contains("c"));
                assert!(!f.contains("a"));
            }
            FieldChanges::All => panic!("expected field-level diff"),
        }
    }

    #[test]
    fn test_changed_fields_structural() {
        let new = record(&[("a", Value::Int(1))]);
        assert_eq!(changed_fields(None, Some(&new)), FieldChanges::All);
        assert_eq!(changed_fields(Some(&new), None), FieldChanges::All);
    }

    #[test]
    fn test_changed_fields_identical() {
        let r = record(&[("a", Value::Int(1))]);
        assert!(changed_fields(Some(&r), Some(&r)).is_empty());
    }
}
