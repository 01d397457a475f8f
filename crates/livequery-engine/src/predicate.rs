//! Structured predicates over records.
//!
//! Evaluation follows the strict value semantics of the data boundary:
//! equality is per tag, ordering comparisons between different tags are
//! refused (the predicate is simply false), and an absent attribute reads
//! as null.

use livequery_core::{Record, Value};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A predicate tree evaluated against one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Predicate {
    /// All children match.
    And(Vec<Predicate>),
    /// Any child matches.
    Or(Vec<Predicate>),
    /// The child does not match.
    Not(Box<Predicate>),
    /// Attribute equals a constant.
    Eq { field: String, value: Value },
    /// Attribute differs from a constant.
    Ne { field: String, value: Value },
    /// Attribute is strictly greater.
    Gt { field: String, value: Value },
    /// Attribute is greater or equal.
    Gte { field: String, value: Value },
    /// Attribute is strictly less.
    Lt { field: String, value: Value },
    /// Attribute is less or equal.
    Lte { field: String, value: Value },
    /// Attribute equals one of the constants.
    In { field: String, values: Vec<Value> },
    /// String attribute contains a substring, or list attribute contains
    /// an element.
    Contains { field: String, value: Value },
    /// String attribute starts with a prefix.
    StartsWith { field: String, prefix: String },
}

impl Predicate {
    /// Evaluate against a record.
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Predicate::And(children) => children.iter().all(|p| p.matches(record)),
            Predicate::Or(children) => children.iter().any(|p| p.matches(record)),
            Predicate::Not(child) => !child.matches(record),
            Predicate::Eq { field, value } => attr(record, field) == *value,
            Predicate::Ne { field, value } => attr(record, field) != *value,
            Predicate::Gt { field, value } => ordered(record, field, value, Ordering::is_gt),
            Predicate::Gte { field, value } => ordered(record, field, value, Ordering::is_ge),
            Predicate::Lt { field, value } => ordered(record, field, value, Ordering::is_lt),
            Predicate::Lte { field, value } => ordered(record, field, value, Ordering::is_le),
            Predicate::In { field, values } => {
                let v = attr(record, field);
                values.iter().any(|candidate| v == *candidate)
            }
            Predicate::Contains { field, value } => match (attr(record, field), value) {
                (Value::String(haystack), Value::String(needle)) => haystack.contains(needle),
                (Value::List(items), needle) => items.iter().any(|item| item == needle),
                _ => false,
            },
            Predicate::StartsWith { field, prefix } => match attr(record, field) {
                Value::String(s) => s.starts_with(prefix),
                _ => false,
            },
        }
    }

    /// Collect the attributes this predicate constrains.
    ///
    /// Equality constraints are reported as `(field, value)` pairs so the
    /// registry can bucket them by value; every other operator reports
    /// plain field interest. A tree with no field references at all is a
    /// wildcard subscription.
    pub fn collect_fields(&self, equalities: &mut Vec<(String, Value)>, interests: &mut Vec<String>) {
        match self {
            Predicate::And(children) | Predicate::Or(children) => {
                for child in children {
                    child.collect_fields(equalities, interests);
                }
            }
            Predicate::Not(child) => child.collect_fields(equalities, interests),
            Predicate::Eq { field, value } => equalities.push((field.clone(), value.clone())),
            Predicate::Ne { field, .. }
            | Predicate::Gt { field, .. }
            | Predicate::Gte { field, .. }
            | Predicate::Lt { field, .. }
            | Predicate::Lte { field, .. }
            | Predicate::In { field, .. }
            | Predicate::Contains { field, .. }
            | Predicate::StartsWith { field, .. } => interests.push(field.clone()),
        }
    }
}

fn attr(record: &Record, field: &str) -> Value {
    record.get(field).cloned().unwrap_or(Value::Null)
}

fn ordered(record: &Record, field: &str, value: &Value, test: fn(Ordering) -> bool) -> bool {
    attr(record, field)
        .compare(value)
        .map(test)
        .unwrap_or(false)
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
    fn test_eq_and_ne() {
        let r = record(&[("status", Value::from("active"))]);
        assert!(Predicate::Eq {
            field: "status".into(),
            value: Value::from("active")
        }
        .matches(&r));
        assert!(Predicate::Ne {
            field: "status".into(),
            value: Value::from("closed")
        }
        .matches(&r));
    }

    #[test]
    fn test_absent_attribute_is_null() {
        let r = record(&[]);
        assert!(Predicate::Eq {
            field: "missing".into(),
            value: Value::Null
        }
        .matches(&r));
        // ordering against null is refused
        assert!(!Predicate::Gt {
            field: "missing".into(),
            value: Value::Int(0)
        }
        .matches(&r));
    }

    #[test]
    fn test_cross_tag_comparison_is_false() {
        let r = record(&[("n", Value::Int(5))]);
        assert!(!Predicate::Gt {
            field: "n".into(),
            value: Value::Float(1.0)
        }
        .matches(&r));
        assert!(!Predicate::Eq {
            field: "n".into(),
            value: Value::Float(5.0)
        }
        .matches(&r));
    }

    #[test]
    fn test_range_operators() {
        let r = record(&[("score", Value::Int(80))]);
        let gt = |v| Predicate::Gt {
            field: "score".into(),
            value: Value::Int(v),
        };
        assert!(gt(79).matches(&r));
        assert!(!gt(80).matches(&r));
        assert!(Predicate::Gte {
            field: "score".into(),
            value: Value::Int(80)
        }
        .matches(&r));
        assert!(Predicate::Lt {
            field: "score".into(),
            value: Value::Int(81)
        }
        .matches(&r));
        assert!(Predicate::Lte {
            field: "score".into(),
            value: Value::Int(80)
        }
        .matches(&r));
    }

    #[test]
    fn test_boolean_combinators() {
        let r = record(&[("a", Value::Int(1)), ("b", Value::Int(2))]);
        let eq = |f: &str, v| Predicate::Eq {
            field: f.into(),
            value: Value::Int(v),
        };
        assert!(Predicate::And(vec![eq("a", 1), eq("b", 2)]).matches(&r));
        assert!(!Predicate::And(vec![eq("a", 1), eq("b", 3)]).matches(&r));
        assert!(Predicate::Or(vec![eq("a", 9), eq("b", 2)]).matches(&r));
        assert!(Predicate::Not(Box::new(eq("a", 9))).matches(&r));
    }

    #[test]
    fn test_in_contains_starts_with() {
        let r = record(&[
            ("tag", Value::from("release")),
            ("labels", Value::List(vec![Value::from("a"), Value::from("b")])),
        ]);
        assert!(Predicate::In {
            field: "tag".into(),
            values: vec![Value::from("beta"), Value::from("release")]
        }
        .matches(&r));
        assert!(Predicate::Contains {
            field: "tag".into(),
            value: Value::from("lease")
        }
        .matches(&r));
        assert!(Predicate::Contains {
            field: "labels".into(),
            value: Value::from("b")
        }
        .matches(&r));
        assert!(Predicate::StartsWith {
            field: "tag".into(),
            prefix: "rel".into()
        }
        .matches(&r));
        assert!(!Predicate::StartsWith {
            field: "labels".into(),
            prefix: "a".into()
        }
        .matches(&r));
    }

    #[test]
    fn test_collect_fields() {
        let p = Predicate::And(vec![
            Predicate::Eq {
                field: "status".into(),
                value: Value::from("open"),
            },
            Predicate::Or(vec![
                Predicate::Gt {
                    field: "score".into(),
                    value: Value::Int(10),
                },
                Predicate::StartsWith {
                    field: "name".into(),
                    prefix: "a".into(),
                },
            ]),
        ]);

        let mut eqs = Vec::new();
        let mut interests = Vec::new();
        p.collect_fields(&mut eqs, &mut interests);

        assert_eq!(eqs, vec![("status".to_string(), Value::from("open"))]);
        assert_eq!(interests, vec!["score".to_string(), "name".to_string()]);
    }
}
