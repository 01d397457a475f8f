//! Standing query shape and snapshot execution.

use crate::predicate::Predicate;
use livequery_core::{Record, RecordSource, Value};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// One sort criterion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortKey {
    pub field: String,
    #[serde(default)]
    pub descending: bool,
}

impl SortKey {
    /// Ascending sort on `field`.
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: false,
        }
    }

    /// Descending sort on `field`.
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: true,
        }
    }
}

/// A standing predicate query: filter, order, window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    /// Filter; `None` selects every record.
    #[serde(default)]
    pub predicate: Option<Predicate>,
    /// Sort criteria, applied in order.
    #[serde(default)]
    pub sort: Vec<SortKey>,
    /// Sliding-window size; `None` or zero keeps all matches.
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Execute a query against a map snapshot.
///
/// The result is deterministic: after the sort criteria, ties fall back
/// to ascending key order. Values that refuse comparison (cross-tag or
/// null) rank as equal at that criterion.
pub fn execute_query(query: &Query, source: &dyn RecordSource) -> Vec<(String, Record)> {
    let mut rows: Vec<(String, Record)> = source
        .keys()
        .into_iter()
        .filter_map(|key| source.get_record(&key).map(|record| (key, record)))
        .filter(|(_, record)| {
            query
                .predicate
                .as_ref()
                .map_or(true, |p| p.matches(record))
        })
        .collect();

    rows.sort_by(|a, b| compare_rows(a, b, &query.sort));

    if let Some(limit) = query.limit {
        if limit > 0 {
            rows.truncate(limit);
        }
    }
    rows
}

fn compare_rows(a: &(String, Record), b: &(String, Record), sort: &[SortKey]) -> Ordering {
    for key in sort {
        let va = a.1.get(&key.field).cloned().unwrap_or(Value::Null);
        let vb = b.1.get(&key.field).cloned().unwrap_or(Value::Null);
        let ord = va.compare(&vb).unwrap_or(Ordering::Equal);
        let ord = if key.descending { ord.reverse() } else { ord };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.0.cmp(&b.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryMap;

    fn scores_map() -> MemoryMap {
        let map = MemoryMap::new();
        for (key, score) in [("A", 100), ("B", 90), ("C", 80), ("D", 70)] {
            let mut record = Record::new();
            record.insert("score".to_string(), Value::Int(score));
            map.set(key, record);
        }
        map
    }

    #[test]
    fn test_unfiltered_query_returns_all() {
        let map = scores_map();
        let rows = execute_query(&Query::default(), &map);
        assert_eq!(rows.len(), 4);
        // tie-break on key gives a stable order
        let keys: Vec<&str> = rows.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["A", "B", "C", "D"]);
    }

    #[test]
    fn test_predicate_filter() {
        let map = scores_map();
        let query = Query {
            predicate: Some(Predicate::Gte {
                field: "score".into(),
                value: Value::Int(90),
            }),
            ..Query::default()
        };
        let rows = execute_query(&query, &map);
        let keys: Vec<&str> = rows.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["A", "B"]);
    }

    #[test]
    fn test_sort_and_limit_window() {
        let map = scores_map();
        let query = Query {
            predicate: None,
            sort: vec![SortKey::desc("score")],
            limit: Some(2),
        };
        let rows = execute_query(&query, &map);
        let keys: Vec<&str> = rows.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["A", "B"]);
    }

    #[test]
    fn test_zero_limit_keeps_all() {
        let map = scores_map();
        let query = Query {
            limit: Some(0),
            ..Query::default()
        };
        assert_eq!(execute_query(&query, &map).len(), 4);
    }

    #[test]
    fn test_missing_sort_field_ranks_as_equal() {
        let map = MemoryMap::new();
        let mut a = Record::new();
        a.insert("x".to_string(), Value::Int(1));
        map.set("with", a);
        map.set("without", Record::new());

        let query = Query {
            sort: vec![SortKey::asc("x")],
            ..Query::default()
        };
        // no panic; key order decides the tie
        let rows = execute_query(&query, &map);
        assert_eq!(rows.len(), 2);
    }
}
