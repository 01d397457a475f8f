//! Bridge from cluster machinery to this node's local engine.
//!
//! Both the subscription coordinator (data-node role) and the one-shot
//! search executor go through this seam instead of calling each other, so
//! neither side ever calls back into its caller.

use crate::error::Result;
use crate::messages::{InitialResult, SearchRequest, SearchResponse};
use livequery_core::{record_to_value, NodeId, Record, RecordCatalog, RecordSource, SubscriptionId};
use livequery_engine::{Query, SearchCoordinator, StandingQueryRegistry};
use livequery_text::SearchOptions;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::debug;

/// Handles to this node's local registries and data.
pub struct LocalEngine {
    node_id: NodeId,
    search: Arc<RwLock<SearchCoordinator>>,
    queries: Arc<RwLock<StandingQueryRegistry>>,
    catalog: Arc<dyn RecordCatalog>,
}

impl LocalEngine {
    /// Bundle the node's registries behind one seam.
    pub fn new(
        node_id: NodeId,
        search: Arc<RwLock<SearchCoordinator>>,
        queries: Arc<RwLock<StandingQueryRegistry>>,
        catalog: Arc<dyn RecordCatalog>,
    ) -> Self {
        Self {
            node_id,
            search,
            queries,
            catalog,
        }
    }

    /// The live search coordinator.
    pub fn search(&self) -> &Arc<RwLock<SearchCoordinator>> {
        &self.search
    }

    /// The standing query registry.
    pub fn queries(&self) -> &Arc<RwLock<StandingQueryRegistry>> {
        &self.queries
    }

    /// The record catalog.
    pub fn catalog(&self) -> &Arc<dyn RecordCatalog> {
        &self.catalog
    }

    /// Register a search subscription for a coordinator node and return
    /// its initial results.
    pub async fn register_search(
        &self,
        subscription_id: SubscriptionId,
        map_name: &str,
        query: &str,
        options: SearchOptions,
        coordinator: NodeId,
    ) -> Result<(Vec<InitialResult>, usize)> {
        let source = self.source_or_empty(map_name);

        let hits = self.search.write().await.register_distributed(
            subscription_id,
            map_name,
            query,
            options,
            coordinator,
            source.as_ref(),
        )?;

        let total = hits.len();
        let results = hits
            .into_iter()
            .map(|hit| InitialResult {
                key: hit.key,
                value: hit.value,
                score: Some(hit.score),
                matched_terms: Some(hit.matched_terms),
            })
            .collect();
        Ok((results, total))
    }

    /// Register a predicate subscription for a coordinator node and
    /// return its initial result rows.
    pub async fn register_query(
        &self,
        subscription_id: SubscriptionId,
        map_name: &str,
        query: Query,
        coordinator: NodeId,
    ) -> Result<Vec<InitialResult>> {
        let source = self.source_or_empty(map_name);

        let rows = self.queries.write().await.register_distributed(
            subscription_id,
            map_name,
            query,
            coordinator,
            source.as_ref(),
        );
        Ok(rows
            .into_iter()
            .map(|(key, record)| InitialResult {
                key,
                value: Some(record_to_value(&record)),
                score: None,
                matched_terms: None,
            })
            .collect())
    }

    /// A node may be asked about a map it holds no data for yet; that is
    /// an empty source, not an error.
    fn source_or_empty(&self, map_name: &str) -> Arc<dyn RecordSource> {
        self.catalog
            .open(map_name)
            .unwrap_or_else(|| Arc::new(EmptySource))
    }

    /// Drop a subscription from both registries. Idempotent.
    pub async fn unregister(&self, subscription_id: SubscriptionId) {
        self.search.write().await.unsubscribe(subscription_id);
        self.queries.write().await.remove(subscription_id);
    }

    /// Drop every subscription owned by a departed coordinator.
    pub async fn unregister_by_coordinator(&self, node: &NodeId) -> usize {
        let from_search = self
            .search
            .write()
            .await
            .unsubscribe_by_coordinator(node)
            .len();
        let from_queries = self
            .queries
            .write()
            .await
            .unregister_by_coordinator(node)
            .len();
        if from_search + from_queries > 0 {
            debug!(node = %node, from_search, from_queries, "swept subscriptions of departed coordinator");
        }
        from_search + from_queries
    }

    /// Execute a one-shot search locally, shaped as a wire response.
    pub async fn execute_search(&self, request: &SearchRequest) -> SearchResponse {
        let started = Instant::now();
        let respond = |results, total_hits, error| SearchResponse {
            request_id: request.request_id,
            node_id: self.node_id.clone(),
            results,
            total_hits,
            execution_time_ms: started.elapsed().as_millis() as u64,
            error,
        };

        let source = self.source_or_empty(&request.map_name);
        let search = self.search.read().await;
        match search.search(&request.map_name, &request.query, &request.options, source.as_ref()) {
            Ok(page) => {
                let results = page
                    .hits
                    .into_iter()
                    .map(|hit| InitialResult {
                        key: hit.key,
                        value: hit.value,
                        score: Some(hit.score),
                        matched_terms: request
                            .include_matched_terms
                            .then_some(hit.matched_terms),
                    })
                    .collect();
                respond(results, page.total_hits, None)
            }
            Err(error) => respond(Vec::new(), 0, Some(error.to_string())),
        }
    }
}

struct EmptySource;

impl RecordSource for EmptySource {
    fn keys(&self) -> Vec<String> {
        Vec::new()
    }

    fn get_record(&self, _key: &str) -> Option<Record> {
        None
    }
}
