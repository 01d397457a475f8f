//! Opaque pagination cursors for one-shot distributed search.
//!
//! A cursor records, per responding node, the last consumed `(score,
//! key)` position, plus a fingerprint of the query that produced it.
//! Reuse across a different query fails validation.

use crate::error::{ClusterError, Result};
use livequery_text::SearchOptions;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Decoded cursor contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cursor {
    /// node id -> last consumed score on that node
    pub node_scores: HashMap<String, f64>,
    /// node id -> last consumed key on that node
    pub node_keys: HashMap<String, String>,
    /// fingerprint of the query this cursor belongs to
    pub query_hash: String,
    /// Unix millis at issue time
    pub issued_at: u64,
}

/// Encode a cursor into its opaque base64 form.
pub fn encode_cursor(cursor: &Cursor) -> Result<String> {
    let bytes =
        serde_json::to_vec(cursor).map_err(|e| ClusterError::InvalidCursor(e.to_string()))?;
    Ok(base64::encode(bytes))
}

/// Decode an opaque cursor and check it against the current query hash.
pub fn decode_cursor(token: &str, expected_hash: &str) -> Result<Cursor> {
    let bytes = base64::decode(token)
        .map_err(|e| ClusterError::InvalidCursor(format!("not base64: {}", e)))?;
    let cursor: Cursor = serde_json::from_slice(&bytes)
        .map_err(|e| ClusterError::InvalidCursor(format!("malformed: {}", e)))?;
    if cursor.query_hash != expected_hash {
        return Err(ClusterError::InvalidCursor(
            "cursor belongs to a different query".to_string(),
        ));
    }
    Ok(cursor)
}

/// Stable fingerprint of a search request.
///
/// Pagination position fields are excluded: every page of the same query
/// shares one fingerprint.
pub fn query_fingerprint(map_name: &str, query: &str, options: &SearchOptions) -> String {
    let mut boost: Vec<(&str, f64)> = options
        .boost
        .as_ref()
        .map(|b| b.iter().map(|(k, v)| (k.as_str(), *v)).collect())
        .unwrap_or_default();
    boost.sort_by(|a, b| a.0.cmp(b.0));

    let canonical = format!(
        "{}|{}|{:?}|{:?}|{:?}",
        map_name, query, options.limit, options.min_score, boost
    );
    format!("{:x}", md5::compute(canonical))
}
