//! Cluster configuration.

use serde::{Deserialize, Serialize};

/// Tunables of the distributed coordination layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// How long a coordinator waits for registration ACKs before
    /// resolving with partial results.
    pub ack_timeout_ms: u64,
    /// Reciprocal Rank Fusion constant.
    pub rrf_k: f64,
    /// Per-node deadline of a one-shot distributed search.
    pub search_timeout_ms: u64,
    /// Stop gathering one-shot search responses once this many nodes
    /// answered successfully; `None` waits for every member (still
    /// bounded by the deadline).
    pub search_min_responses: Option<usize>,
    /// Result count when a search specifies no limit.
    pub default_search_limit: usize,
    /// Upper bound on the per-node over-fetch of an uncursored search.
    pub max_per_node_limit: usize,
    /// A member missing heartbeats for this long is considered dead.
    pub heartbeat_timeout_ms: u64,
    /// Notification flush interval; `None` delivers immediately.
    pub batch_flush_ms: Option<u64>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            ack_timeout_ms: 5_000,
            rrf_k: 60.0,
            search_timeout_ms: 5_000,
            search_min_responses: None,
            default_search_limit: 10,
            max_per_node_limit: 1_000,
            heartbeat_timeout_ms: 30_000,
            batch_flush_ms: Some(16),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClusterConfig::default();
        assert_eq!(config.ack_timeout_ms, 5_000);
        assert_eq!(config.rrf_k, 60.0);
        assert_eq!(config.max_per_node_limit, 1_000);
        assert_eq!(config.batch_flush_ms, Some(16));
    }
}
