//! Live full-text search coordination for one node.
//!
//! The coordinator owns one [`FullTextIndex`] per enabled map plus the
//! live subscription registries. Data changes are applied synchronously:
//! the index is updated and every affected subscription's delta is
//! computed against that single change with the single-document scoring
//! path, so the cost of a write does not grow with corpus size.

use crate::error::{EngineError, Result};
use livequery_core::{
    record_to_value, ChangeType, ClientId, DeltaKind, NodeId, Record, RecordSource, SubscriptionId,
    Value,
};
use livequery_text::{FullTextConfig, FullTextIndex, ScoredDoc, SearchOptions};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// Score movement below this is not worth an UPDATE frame.
const SCORE_EPSILON: f64 = 1e-4;

/// Configuration for enabling search on one map.
pub type SearchConfig = FullTextConfig;

/// Where a subscription's deltas are routed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaRoute {
    /// Straight to the owning client's socket on this node.
    Local(ClientId),
    /// As a cluster message to the coordinator node that owns the
    /// distributed subscription.
    Coordinator(NodeId),
}

/// One hit of an initial result set.
#[derive(Debug, Clone, PartialEq)]
pub struct InitialHit {
    pub key: String,
    pub value: Option<Value>,
    pub score: f64,
    pub matched_terms: Vec<String>,
}

/// A ranked page plus the pre-slice hit count.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchPage {
    pub hits: Vec<InitialHit>,
    pub total_hits: usize,
}

/// A computed subscription delta, ready for delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchDelta {
    pub subscription_id: SubscriptionId,
    pub map_name: String,
    pub route: DeltaRoute,
    pub key: String,
    pub value: Option<Value>,
    pub score: f64,
    pub matched_terms: Vec<String>,
    pub change: DeltaKind,
}

/// Non-suspending delta consumer.
///
/// The coordinator never talks to sockets or the cluster itself; it emits
/// into this seam and the embedder decides how deltas travel.
pub trait SearchDeltaSink: Send + Sync {
    fn deliver(&self, delta: SearchDelta);
}

#[derive(Debug)]
struct TrackedResult {
    score: f64,
}

#[derive(Debug)]
struct LiveSubscription {
    id: SubscriptionId,
    map_name: String,
    route: DeltaRoute,
    query_terms: Vec<String>,
    options: SearchOptions,
    current_results: HashMap<String, TrackedResult>,
}

/// Per-node live search state.
///
/// Not internally synchronized; the embedder serializes access (map
/// mutations for a given map must be serial, per the engine's
/// concurrency contract).
pub struct SearchCoordinator {
    maps: HashMap<String, FullTextIndex>,
    subs: HashMap<SubscriptionId, LiveSubscription>,
    by_map: HashMap<String, HashSet<SubscriptionId>>,
    by_client: HashMap<ClientId, HashSet<SubscriptionId>>,
    sink: Arc<dyn SearchDeltaSink>,
}

impl SearchCoordinator {
    /// Create a coordinator emitting deltas into `sink`.
    pub fn new(sink: Arc<dyn SearchDeltaSink>) -> Self {
        Self {
            maps: HashMap::new(),
            subs: HashMap::new(),
            by_map: HashMap::new(),
            by_client: HashMap::new(),
            sink,
        }
    }

    /// Enable full-text search on a map with an empty index.
    ///
    /// Enabling twice replaces the previous index.
    pub fn enable_search(&mut self, map_name: &str, config: SearchConfig) {
        if self.maps.contains_key(map_name) {
            warn!(map = map_name, "replacing existing full-text index");
        }
        self.maps
            .insert(map_name.to_string(), FullTextIndex::new(config));
    }

    /// Whether search is enabled on a map.
    pub fn is_enabled(&self, map_name: &str) -> bool {
        self.maps.contains_key(map_name)
    }

    /// The index of a map, for persistence and diagnostics.
    pub fn index(&self, map_name: &str) -> Option<&FullTextIndex> {
        self.maps.get(map_name)
    }

    /// Mutable index access, for [`FullTextIndex::load`].
    pub fn index_mut(&mut self, map_name: &str) -> Option<&mut FullTextIndex> {
        self.maps.get_mut(map_name)
    }

    /// Seed a map's index from existing entries.
    pub fn build_index_from_entries(
        &mut self,
        map_name: &str,
        entries: impl IntoIterator<Item = (String, Record)>,
    ) -> Result<usize> {
        let index = self
            .maps
            .get_mut(map_name)
            .ok_or_else(|| EngineError::NotEnabled(map_name.to_string()))?;
        let mut indexed = 0;
        for (key, record) in entries {
            index.on_set(&key, &record)?;
            indexed += 1;
        }
        debug!(map = map_name, indexed, "seeded full-text index");
        Ok(indexed)
    }

    /// One-shot search with hydrated values.
    pub fn search(
        &self,
        map_name: &str,
        query: &str,
        options: &SearchOptions,
        source: &dyn RecordSource,
    ) -> Result<SearchPage> {
        let index = self
            .maps
            .get(map_name)
            .ok_or_else(|| EngineError::NotEnabled(map_name.to_string()))?;

        let unsliced = SearchOptions {
            limit: None,
            ..options.clone()
        };
        let mut ranked = index.search(query, &unsliced);
        let total_hits = ranked.len();
        if let Some(limit) = options.limit {
            if limit > 0 {
                ranked.truncate(limit);
            }
        }

        Ok(SearchPage {
            hits: hydrate(ranked, source),
            total_hits,
        })
    }

    /// Register a live subscription owned by a local client.
    ///
    /// The query is tokenized through the map's own index so every node
    /// derives identical terms; the initial ranked hits seed the
    /// subscription's tracked result set.
    pub fn subscribe(
        &mut self,
        client_id: ClientId,
        subscription_id: SubscriptionId,
        map_name: &str,
        query: &str,
        options: SearchOptions,
        source: &dyn RecordSource,
    ) -> Result<Vec<InitialHit>> {
        self.register(
            DeltaRoute::Local(client_id),
            subscription_id,
            map_name,
            query,
            options,
            source,
        )
    }

    /// Register a live subscription on behalf of a remote coordinator.
    pub fn register_distributed(
        &mut self,
        subscription_id: SubscriptionId,
        map_name: &str,
        query: &str,
        options: SearchOptions,
        coordinator: NodeId,
        source: &dyn RecordSource,
    ) -> Result<Vec<InitialHit>> {
        self.register(
            DeltaRoute::Coordinator(coordinator),
            subscription_id,
            map_name,
            query,
            options,
            source,
        )
    }

    fn register(
        &mut self,
        route: DeltaRoute,
        subscription_id: SubscriptionId,
        map_name: &str,
        query: &str,
        options: SearchOptions,
        source: &dyn RecordSource,
    ) -> Result<Vec<InitialHit>> {
        let index = self
            .maps
            .get(map_name)
            .ok_or_else(|| EngineError::NotEnabled(map_name.to_string()))?;

        let query_terms = index.tokenize_query(query);
        let ranked = index.search_terms(&query_terms, &options);

        let current_results = ranked
            .iter()
            .map(|hit| (hit.doc_id.clone(), TrackedResult { score: hit.score }))
            .collect();

        let sub = LiveSubscription {
            id: subscription_id,
            map_name: map_name.to_string(),
            route: route.clone(),
            query_terms,
            options,
            current_results,
        };

        self.by_map
            .entry(map_name.to_string())
            .or_default()
            .insert(subscription_id);
        if let DeltaRoute::Local(client) = &route {
            self.by_client
                .entry(client.clone())
                .or_default()
                .insert(subscription_id);
        }
        self.subs.insert(subscription_id, sub);
        debug!(%subscription_id, map = map_name, "registered live search subscription");

        Ok(hydrate(ranked, source))
    }

    /// Remove a subscription. Idempotent.
    pub fn unsubscribe(&mut self, subscription_id: SubscriptionId) -> bool {
        let Some(sub) = self.subs.remove(&subscription_id) else {
            return false;
        };
        if let Some(set) = self.by_map.get_mut(&sub.map_name) {
            set.remove(&subscription_id);
            if set.is_empty() {
                self.by_map.remove(&sub.map_name);
            }
        }
        if let DeltaRoute::Local(client) = &sub.route {
            if let Some(set) = self.by_client.get_mut(client) {
                set.remove(&subscription_id);
                if set.is_empty() {
                    self.by_client.remove(client);
                }
            }
        }
        true
    }

    /// Remove every subscription owned by a client.
    pub fn unsubscribe_client(&mut self, client_id: &ClientId) -> usize {
        let ids: Vec<SubscriptionId> = self
            .by_client
            .get(client_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        for id in &ids {
            self.unsubscribe(*id);
        }
        ids.len()
    }

    /// Remove every distributed subscription owned by a departed
    /// coordinator node.
    pub fn unsubscribe_by_coordinator(&mut self, node: &NodeId) -> Vec<SubscriptionId> {
        let ids: Vec<SubscriptionId> = self
            .subs
            .values()
            .filter(|s| matches!(&s.route, DeltaRoute::Coordinator(n) if n == node))
            .map(|s| s.id)
            .collect();
        for id in &ids {
            self.unsubscribe(*id);
        }
        ids
    }

    /// Number of registered subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.subs.len()
    }

    /// Apply one data change: update the index, then emit exactly one
    /// delta (or none) per subscription on the map.
    ///
    /// A change on a map without full-text search is a no-op.
    pub fn on_data_change(
        &mut self,
        map_name: &str,
        key: &str,
        record: Option<&Record>,
        change_type: ChangeType,
    ) -> Result<()> {
        let Some(index) = self.maps.get_mut(map_name) else {
            return Ok(());
        };

        match (change_type, record) {
            (ChangeType::Remove, _) => index.on_remove(key),
            (_, Some(record)) => index.on_set(key, record)?,
            (_, None) => {
                warn!(map = map_name, key, "change without a record value; ignoring");
                return Ok(());
            }
        }

        let Some(sub_ids) = self.by_map.get(map_name) else {
            return Ok(());
        };
        let mut sub_ids: Vec<SubscriptionId> = sub_ids.iter().copied().collect();
        sub_ids.sort();

        let index = &self.maps[map_name];
        for sub_id in sub_ids {
            let Some(sub) = self.subs.get_mut(&sub_id) else {
                continue;
            };

            let scored = if change_type == ChangeType::Remove {
                None
            } else {
                index.score_single_document(key, &sub.query_terms, record)
            };
            let scored = scored.filter(|s| s.score >= sub.options.min_score.unwrap_or(0.0));

            let was = sub.current_results.get(key).map(|r| r.score);
            match (was, scored) {
                (None, Some(hit)) => {
                    sub.current_results
                        .insert(key.to_string(), TrackedResult { score: hit.score });
                    emit(&*self.sink, sub, key, record, hit.score, hit.matched_terms, DeltaKind::Enter);
                }
                (Some(_), None) => {
                    sub.current_results.remove(key);
                    emit(&*self.sink, sub, key, None, 0.0, Vec::new(), DeltaKind::Leave);
                }
                (Some(old_score), Some(hit)) => {
                    sub.current_results
                        .insert(key.to_string(), TrackedResult { score: hit.score });
                    if change_type == ChangeType::Update
                        || (old_score - hit.score).abs() > SCORE_EPSILON
                    {
                        emit(&*self.sink, sub, key, record, hit.score, hit.matched_terms, DeltaKind::Update);
                    }
                }
                (None, None) => {}
            }
        }
        Ok(())
    }
}

fn emit(
    sink: &dyn SearchDeltaSink,
    sub: &LiveSubscription,
    key: &str,
    record: Option<&Record>,
    score: f64,
    matched_terms: Vec<String>,
    change: DeltaKind,
) {
    sink.deliver(SearchDelta {
        subscription_id: sub.id,
        map_name: sub.map_name.clone(),
        route: sub.route.clone(),
        key: key.to_string(),
        value: record.map(record_to_value),
        score,
        matched_terms,
        change,
    });
}

fn hydrate(ranked: Vec<ScoredDoc>, source: &dyn RecordSource) -> Vec<InitialHit> {
    ranked
        .into_iter()
        .map(|hit| InitialHit {
            value: source.get_record(&hit.doc_id).map(|r| record_to_value(&r)),
            key: hit.doc_id,
            score: hit.score,
            matched_terms: hit.matched_terms,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        deltas: Mutex<Vec<SearchDelta>>,
    }

    impl SearchDeltaSink for RecordingSink {
        fn deliver(&self, delta: SearchDelta) {
            self.deltas.lock().unwrap().push(delta);
        }
    }

    impl RecordingSink {
        fn take(&self) -> Vec<SearchDelta> {
            std::mem::take(&mut self.deltas.lock().unwrap())
        }
    }

    fn article(title: &str, body: &str) -> Record {
        let mut record = Record::new();
        record.insert("title".to_string(), Value::from(title));
        record.insert("body".to_string(), Value::from(body));
        record
    }

    fn setup() -> (SearchCoordinator, Arc<RecordingSink>, Arc<MemoryMap>) {
        let sink = Arc::new(RecordingSink::default());
        let mut coordinator = SearchCoordinator::new(sink.clone());
        coordinator.enable_search("articles", SearchConfig::new(["title", "body"]));
        let map = Arc::new(MemoryMap::new());
        (coordinator, sink, map)
    }

    fn apply(
        coordinator: &mut SearchCoordinator,
        map: &MemoryMap,
        key: &str,
        record: Record,
    ) {
        let change = if map.set(key, record.clone()).is_some() {
            ChangeType::Update
        } else {
            ChangeType::Add
        };
        coordinator
            .on_data_change("articles", key, Some(&record), change)
            .unwrap();
    }

    #[test]
    fn test_search_not_enabled() {
        let (coordinator, _, map) = setup();
        let err = coordinator
            .search("missing", "q", &SearchOptions::default(), map.as_ref())
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Full-text search not enabled for map: missing"
        );
    }

    #[test]
    fn test_basic_ranking_scenario() {
        let (mut coordinator, _, map) = setup();
        apply(&mut coordinator, &map, "a", article("Hello World", "Test"));
        apply(&mut coordinator, &map, "b", article("Goodbye", "Another document"));

        let page = coordinator
            .search("articles", "hello", &SearchOptions::default(), map.as_ref())
            .unwrap();
        assert_eq!(page.total_hits, 1);
        assert_eq!(page.hits.len(), 1);
        assert_eq!(page.hits[0].key, "a");
        assert!(page.hits[0].score > 0.0);
        assert!(page.hits[0].value.is_some());
    }

    #[test]
    fn test_subscription_enter_update_leave() {
        let (mut coordinator, sink, map) = setup();
        apply(&mut coordinator, &map, "a", article("rust search", "x"));

        let sub_id = SubscriptionId::new();
        let initial = coordinator
            .subscribe(
                ClientId::new("c1"),
                sub_id,
                "articles",
                "rust",
                SearchOptions::default(),
                map.as_ref(),
            )
            .unwrap();
        assert_eq!(initial.len(), 1);
        sink.take();

        // new matching doc enters
        apply(&mut coordinator, &map, "b", article("rust engine", "y"));
        let deltas = sink.take();
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].change, DeltaKind::Enter);
        assert_eq!(deltas[0].key, "b");
        assert!(deltas[0].value.is_some());

        // content change on a tracked doc updates
        apply(&mut coordinator, &map, "b", article("rust rust engine", "y"));
        let deltas = sink.take();
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].change, DeltaKind::Update);

        // doc stops matching: leave
        apply(&mut coordinator, &map, "b", article("nothing here", "y"));
        let deltas = sink.take();
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].change, DeltaKind::Leave);
        assert!(deltas[0].value.is_none());

        // removal of the remaining match: leave
        map.remove("a");
        coordinator
            .on_data_change("articles", "a", None, ChangeType::Remove)
            .unwrap();
        let deltas = sink.take();
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].change, DeltaKind::Leave);
        assert_eq!(deltas[0].key, "a");
    }

    #[test]
    fn test_enter_precedes_update_for_same_key() {
        let (mut coordinator, sink, map) = setup();
        let sub_id = SubscriptionId::new();
        coordinator
            .subscribe(
                ClientId::new("c1"),
                sub_id,
                "articles",
                "topic",
                SearchOptions::default(),
                map.as_ref(),
            )
            .unwrap();

        apply(&mut coordinator, &map, "k", article("topic", "v1"));
        apply(&mut coordinator, &map, "k", article("topic", "v2"));
        let kinds: Vec<DeltaKind> = sink.take().into_iter().map(|d| d.change).collect();
        assert_eq!(kinds, vec![DeltaKind::Enter, DeltaKind::Update]);
    }

    #[test]
    fn test_update_emitted_on_unchanged_score() {
        let (mut coordinator, sink, map) = setup();
        coordinator
            .subscribe(
                ClientId::new("c1"),
                SubscriptionId::new(),
                "articles",
                "topic",
                SearchOptions::default(),
                map.as_ref(),
            )
            .unwrap();

        apply(&mut coordinator, &map, "k", article("topic", "body revision one"));
        sink.take();
        // the BM25 score does not move, but the document changed
        apply(&mut coordinator, &map, "k", article("topic", "body revision two"));
        let deltas = sink.take();
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].change, DeltaKind::Update);
    }

    #[test]
    fn test_min_score_threshold() {
        let (mut coordinator, sink, map) = setup();
        coordinator
            .subscribe(
                ClientId::new("c1"),
                SubscriptionId::new(),
                "articles",
                "rare",
                SearchOptions {
                    min_score: Some(f64::MAX),
                    ..SearchOptions::default()
                },
                map.as_ref(),
            )
            .unwrap();

        apply(&mut coordinator, &map, "a", article("rare term", "x"));
        assert!(sink.take().is_empty());
    }

    #[test]
    fn test_unsubscribe_idempotent() {
        let (mut coordinator, sink, map) = setup();
        let sub_id = SubscriptionId::new();
        coordinator
            .subscribe(
                ClientId::new("c1"),
                sub_id,
                "articles",
                "x",
                SearchOptions::default(),
                map.as_ref(),
            )
            .unwrap();

        assert!(coordinator.unsubscribe(sub_id));
        assert!(!coordinator.unsubscribe(sub_id));
        assert_eq!(coordinator.subscription_count(), 0);

        apply(&mut coordinator, &map, "a", article("x marks", "y"));
        assert!(sink.take().is_empty());
    }

    #[test]
    fn test_unsubscribe_client_sweeps() {
        let (mut coordinator, _, map) = setup();
        for _ in 0..3 {
            coordinator
                .subscribe(
                    ClientId::new("c1"),
                    SubscriptionId::new(),
                    "articles",
                    "q",
                    SearchOptions::default(),
                    map.as_ref(),
                )
                .unwrap();
        }
        coordinator
            .subscribe(
                ClientId::new("c2"),
                SubscriptionId::new(),
                "articles",
                "q",
                SearchOptions::default(),
                map.as_ref(),
            )
            .unwrap();

        assert_eq!(coordinator.unsubscribe_client(&ClientId::new("c1")), 3);
        assert_eq!(coordinator.subscription_count(), 1);
    }

    #[test]
    fn test_unsubscribe_by_coordinator() {
        let (mut coordinator, sink, map) = setup();
        let sub_id = SubscriptionId::new();
        coordinator
            .register_distributed(
                sub_id,
                "articles",
                "topic",
                SearchOptions::default(),
                NodeId::new("n3"),
                map.as_ref(),
            )
            .unwrap();

        let removed = coordinator.unsubscribe_by_coordinator(&NodeId::new("n3"));
        assert_eq!(removed, vec![sub_id]);

        apply(&mut coordinator, &map, "a", article("topic", "x"));
        assert!(sink.take().is_empty());
    }

    #[test]
    fn test_distributed_route_on_deltas() {
        let (mut coordinator, sink, map) = setup();
        coordinator
            .register_distributed(
                SubscriptionId::new(),
                "articles",
                "topic",
                SearchOptions::default(),
                NodeId::new("coord"),
                map.as_ref(),
            )
            .unwrap();

        apply(&mut coordinator, &map, "a", article("topic", "x"));
        let deltas = sink.take();
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].route, DeltaRoute::Coordinator(NodeId::new("coord")));
    }

    #[test]
    fn test_change_on_unindexed_map_is_noop() {
        let (mut coordinator, sink, _) = setup();
        coordinator
            .on_data_change("other", "k", None, ChangeType::Remove)
            .unwrap();
        assert!(sink.take().is_empty());
    }

    #[test]
    fn test_build_index_from_entries() {
        let (mut coordinator, _, map) = setup();
        map.set("a", article("seeded doc", "x"));
        map.set("b", article("other", "y"));
        let count = coordinator
            .build_index_from_entries("articles", map.entries())
            .unwrap();
        assert_eq!(count, 2);

        let page = coordinator
            .search("articles", "seeded", &SearchOptions::default(), map.as_ref())
            .unwrap();
        assert_eq!(page.hits.len(), 1);
    }
}
