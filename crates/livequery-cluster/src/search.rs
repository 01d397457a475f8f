//! One-shot distributed search.
//!
//! Same scatter-gather skeleton as subscription registration, without the
//! standing state: broadcast a `CLUSTER_SEARCH_REQ` to every member,
//! gather responses under a deadline, RRF-merge, and hand back a cursor
//! when more results remain. A single-member cluster never touches the
//! network.

use crate::config::ClusterConfig;
use crate::cursor::{decode_cursor, encode_cursor, query_fingerprint, Cursor};
use crate::engine::LocalEngine;
use crate::error::Result;
use crate::membership::MemberRegistry;
use crate::messages::{InitialResult, SearchRequest, SearchResponse};
use crate::rrf::rrf_merge;
use crate::transport::ClusterTransport;
use livequery_core::{unix_millis, MetricsSink, NodeId, RequestId};
use livequery_text::SearchOptions;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Merged outcome of a distributed search.
#[derive(Debug, Clone)]
pub struct ClusterSearchResult {
    pub results: Vec<InitialResult>,
    pub total_hits: usize,
    /// Opaque token for the next page, when one exists.
    pub cursor: Option<String>,
    pub responded_nodes: Vec<NodeId>,
    pub failed_nodes: Vec<NodeId>,
}

/// Scatter-gather executor for one-shot searches.
pub struct ClusterSearch {
    node_id: NodeId,
    config: ClusterConfig,
    members: Arc<RwLock<MemberRegistry>>,
    transport: Arc<dyn ClusterTransport>,
    local: Arc<LocalEngine>,
    metrics: Arc<dyn MetricsSink>,
}

impl ClusterSearch {
    /// Wire up the executor for one node.
    pub fn new(
        node_id: NodeId,
        config: ClusterConfig,
        members: Arc<RwLock<MemberRegistry>>,
        transport: Arc<dyn ClusterTransport>,
        local: Arc<LocalEngine>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            node_id,
            config,
            members,
            transport,
            local,
            metrics,
        }
    }

    /// Execute a distributed search.
    pub async fn search(
        &self,
        map_name: &str,
        query: &str,
        options: SearchOptions,
        cursor: Option<&str>,
        include_matched_terms: bool,
    ) -> Result<ClusterSearchResult> {
        let started = unix_millis();
        let limit = options
            .limit
            .filter(|l| *l > 0)
            .unwrap_or(self.config.default_search_limit);

        let fingerprint = query_fingerprint(map_name, query, &options);
        let decoded = match cursor {
            Some(token) => Some(decode_cursor(token, &fingerprint)?),
            None => None,
        };

        // over-fetch on the first page so the merge has material to fuse
        let per_node_limit = if decoded.is_some() {
            limit
        } else {
            (2 * limit).min(self.config.max_per_node_limit)
        };

        let members = self.members.read().await.member_ids();
        let request_id = RequestId::new();
        let (responses, failed_nodes) = if members.len() <= 1 {
            // single-member cluster: skip the network entirely
            let request = self.node_request(request_id, map_name, query, &options, per_node_limit, decoded.as_ref(), &self.node_id, include_matched_terms);
            (vec![self.local.execute_search(&request).await], Vec::new())
        } else {
            self.scatter(
                request_id,
                map_name,
                query,
                &options,
                per_node_limit,
                decoded.as_ref(),
                include_matched_terms,
                &members,
            )
            .await
        };

        let mut responded_nodes = Vec::new();
        let mut failed_nodes = failed_nodes;
        let mut successful: Vec<&SearchResponse> = Vec::new();
        for response in &responses {
            match &response.error {
                None => {
                    responded_nodes.push(response.node_id.clone());
                    successful.push(response);
                }
                Some(error) => {
                    warn!(node = %response.node_id, %error, "search failed on node");
                    failed_nodes.push(response.node_id.clone());
                }
            }
        }

        let lists: Vec<Vec<(String, f64)>> = successful
            .iter()
            .map(|r| {
                r.results
                    .iter()
                    .map(|hit| (hit.key.clone(), hit.score.unwrap_or(0.0)))
                    .collect()
            })
            .collect();
        let fused = rrf_merge(&lists, self.config.rrf_k);
        let total_hits: usize = successful.iter().map(|r| r.total_hits).sum();

        let mut originals: HashMap<&str, &InitialResult> = HashMap::new();
        for response in &successful {
            for hit in &response.results {
                originals.entry(hit.key.as_str()).or_insert(hit);
            }
        }

        let mut merged: Vec<InitialResult> = fused
            .iter()
            .filter_map(|(key, rrf_score)| {
                originals.get(key.as_str()).map(|original| InitialResult {
                    key: key.clone(),
                    value: original.value.clone(),
                    score: Some(*rrf_score),
                    matched_terms: original.matched_terms.clone(),
                })
            })
            .collect();

        let next_cursor = if merged.len() > limit {
            merged.truncate(limit);
            Some(self.build_cursor(
                &merged,
                &successful,
                decoded.as_ref(),
                fingerprint.clone(),
            )?)
        } else {
            None
        };

        self.metrics.observe(
            "cluster_search_ms",
            unix_millis().saturating_sub(started) as f64,
            &[("map", map_name)],
        );
        debug!(
            map = map_name,
            results = merged.len(),
            total_hits,
            responded = responded_nodes.len(),
            failed = failed_nodes.len(),
            "distributed search merged"
        );

        Ok(ClusterSearchResult {
            results: merged,
            total_hits,
            cursor: next_cursor,
            responded_nodes,
            failed_nodes,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn scatter(
        &self,
        request_id: RequestId,
        map_name: &str,
        query: &str,
        options: &SearchOptions,
        per_node_limit: usize,
        cursor: Option<&Cursor>,
        include_matched_terms: bool,
        members: &[NodeId],
    ) -> (Vec<SearchResponse>, Vec<NodeId>) {
        let deadline = Duration::from_millis(self.config.search_timeout_ms);

        let calls = members.iter().map(|member| {
            let request = self.node_request(
                request_id,
                map_name,
                query,
                options,
                per_node_limit,
                cursor,
                member,
                include_matched_terms,
            );
            async move {
                if *member == self.node_id {
                    return (member.clone(), Ok(self.local.execute_search(&request).await));
                }
                match tokio::time::timeout(deadline, self.transport.search(member, request)).await {
                    Ok(result) => (member.clone(), result),
                    Err(_elapsed) => (
                        member.clone(),
                        Err(crate::error::ClusterError::NodeUnavailable(member.clone())),
                    ),
                }
            }
        });

        let mut pending: futures::stream::FuturesUnordered<_> = calls.collect();
        let mut responses = Vec::new();
        let mut failed = Vec::new();
        let mut answered: std::collections::HashSet<NodeId> = std::collections::HashSet::new();

        use futures::StreamExt;
        while let Some((member, outcome)) = pending.next().await {
            answered.insert(member.clone());
            match outcome {
                Ok(response) => responses.push(response),
                Err(error) => {
                    warn!(node = %member, %error, "search scatter failed");
                    failed.push(member);
                }
            }
            if let Some(min) = self.config.search_min_responses {
                let successes = responses.iter().filter(|r| r.error.is_none()).count();
                if successes >= min {
                    break;
                }
            }
        }
        drop(pending);
        // members whose answer was not awaited count as failed
        for member in members {
            if !answered.contains(member) {
                failed.push(member.clone());
            }
        }
        (responses, failed)
    }

    #[allow(clippy::too_many_arguments)]
    fn node_request(
        &self,
        request_id: RequestId,
        map_name: &str,
        query: &str,
        options: &SearchOptions,
        per_node_limit: usize,
        cursor: Option<&Cursor>,
        member: &NodeId,
        include_matched_terms: bool,
    ) -> SearchRequest {
        let (after_score, after_key) = match cursor {
            Some(c) => (
                c.node_scores.get(member.as_str()).copied(),
                c.node_keys.get(member.as_str()).cloned(),
            ),
            None => (None, None),
        };
        SearchRequest {
            request_id,
            map_name: map_name.to_string(),
            query: query.to_string(),
            options: SearchOptions {
                limit: Some(per_node_limit),
                min_score: options.min_score,
                boost: options.boost.clone(),
                after_score,
                after_key,
            },
            include_matched_terms,
            timeout_ms: self.config.search_timeout_ms,
        }
    }

    /// Record, per responding node, the deepest consumed position.
    fn build_cursor(
        &self,
        page: &[InitialResult],
        responses: &[&SearchResponse],
        previous: Option<&Cursor>,
        query_hash: String,
    ) -> Result<String> {
        let page_keys: std::collections::HashSet<&str> =
            page.iter().map(|r| r.key.as_str()).collect();

        let mut node_scores = HashMap::new();
        let mut node_keys = HashMap::new();
        for response in responses {
            let consumed = response
                .results
                .iter()
                .filter(|hit| page_keys.contains(hit.key.as_str()))
                .last();
            match consumed {
                Some(hit) => {
                    node_scores.insert(response.node_id.0.clone(), hit.score.unwrap_or(0.0));
                    node_keys.insert(response.node_id.0.clone(), hit.key.clone());
                }
                None => {
                    // nothing consumed this page: carry the node's old
                    // position forward so the next page resumes there
                    if let Some(previous) = previous {
                        if let Some(score) = previous.node_scores.get(response.node_id.as_str()) {
                            node_scores.insert(response.node_id.0.clone(), *score);
                        }
                        if let Some(key) = previous.node_keys.get(response.node_id.as_str()) {
                            node_keys.insert(response.node_id.0.clone(), key.clone());
                        }
                    }
                }
            }
        }

        encode_cursor(&Cursor {
            node_scores,
            node_keys,
            query_hash,
            issued_at: unix_millis(),
        })
    }
}
