//! Standing predicate-query registry.
//!
//! Subscriptions register their field constraints into a reverse index so
//! a data change only touches the subscriptions it can possibly affect:
//!
//! - `equality`: field -> value bucket -> subscriptions, for
//!   `attribute == constant` constraints;
//! - `interest`: field -> subscriptions, for every other operator and for
//!   sort-key fields;
//! - `wildcard`: subscriptions with no field constraints at all.
//!
//! Each subscription keeps an explicit registration slip recording the
//! buckets it was added to, so removal undoes exactly those additions
//! without consulting the query again.

use crate::query::{execute_query, Query};
use crate::search::DeltaRoute;
use livequery_core::{
    changed_fields, record_to_value, ClientId, FieldChanges, NodeId, Record, RecordSource,
    SubscriptionId, Value,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Delta kinds of the predicate path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryDeltaKind {
    /// The key is in the result set with this value (new or changed).
    Update,
    /// The key dropped out of the result set.
    Remove,
}

/// One result-set delta.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryDelta {
    pub kind: QueryDeltaKind,
    pub key: String,
    pub value: Option<Value>,
}

/// Deltas of one subscription for one processed change.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryNotification {
    pub subscription_id: SubscriptionId,
    pub map_name: String,
    pub route: DeltaRoute,
    pub deltas: Vec<QueryDelta>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SlipEntry {
    Equality { field: String, bucket: String },
    Interest { field: String },
    Wildcard,
}

#[derive(Debug)]
struct StandingQuery {
    id: SubscriptionId,
    map_name: String,
    route: DeltaRoute,
    query: Query,
    previous_result_keys: HashSet<String>,
    slip: Vec<SlipEntry>,
}

type FieldKey = (String, String);

/// Per-node registry of standing predicate queries.
///
/// Like the search coordinator, the registry is not internally
/// synchronized; the embedder serializes per-map mutation.
#[derive(Default)]
pub struct StandingQueryRegistry {
    subs: HashMap<SubscriptionId, StandingQuery>,
    by_map: HashMap<String, HashSet<SubscriptionId>>,
    by_client: HashMap<ClientId, HashSet<SubscriptionId>>,
    /// (map, field) -> value bucket -> subscriptions
    equality: HashMap<FieldKey, HashMap<String, HashSet<SubscriptionId>>>,
    /// (map, field) -> subscriptions
    interest: HashMap<FieldKey, HashSet<SubscriptionId>>,
    /// map -> subscriptions without any field constraint
    wildcard: HashMap<String, HashSet<SubscriptionId>>,
}

impl StandingQueryRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a query owned by a local client and return its initial
    /// result rows.
    pub fn register(
        &mut self,
        subscription_id: SubscriptionId,
        client_id: ClientId,
        map_name: &str,
        query: Query,
        source: &dyn RecordSource,
    ) -> Vec<(String, Record)> {
        self.register_routed(
            subscription_id,
            DeltaRoute::Local(client_id),
            map_name,
            query,
            source,
        )
    }

    /// Register a query on behalf of a remote coordinator node.
    pub fn register_distributed(
        &mut self,
        subscription_id: SubscriptionId,
        map_name: &str,
        query: Query,
        coordinator: NodeId,
        source: &dyn RecordSource,
    ) -> Vec<(String, Record)> {
        self.register_routed(
            subscription_id,
            DeltaRoute::Coordinator(coordinator),
            map_name,
            query,
            source,
        )
    }

    fn register_routed(
        &mut self,
        subscription_id: SubscriptionId,
        route: DeltaRoute,
        map_name: &str,
        query: Query,
        source: &dyn RecordSource,
    ) -> Vec<(String, Record)> {
        let initial = execute_query(&query, source);
        let previous_result_keys = initial.iter().map(|(k, _)| k.clone()).collect();

        let slip = self.index_fields(subscription_id, map_name, &query);
        if let DeltaRoute::Local(client) = &route {
            self.by_client
                .entry(client.clone())
                .or_default()
                .insert(subscription_id);
        }
        self.by_map
            .entry(map_name.to_string())
            .or_default()
            .insert(subscription_id);
        self.subs.insert(
            subscription_id,
            StandingQuery {
                id: subscription_id,
                map_name: map_name.to_string(),
                route,
                query,
                previous_result_keys,
                slip,
            },
        );
        debug!(%subscription_id, map = map_name, "registered standing query");
        initial
    }

    /// Analyze the query's field constraints and fill the reverse index,
    /// returning the registration slip.
    fn index_fields(
        &mut self,
        subscription_id: SubscriptionId,
        map_name: &str,
        query: &Query,
    ) -> Vec<SlipEntry> {
        let mut equalities = Vec::new();
        let mut interests: Vec<String> = Vec::new();
        if let Some(predicate) = &query.predicate {
            predicate.collect_fields(&mut equalities, &mut interests);
        }
        for key in &query.sort {
            interests.push(key.field.clone());
        }

        let mut slip = Vec::new();
        if equalities.is_empty() && interests.is_empty() {
            self.wildcard
                .entry(map_name.to_string())
                .or_default()
                .insert(subscription_id);
            slip.push(SlipEntry::Wildcard);
            return slip;
        }

        for (field, value) in equalities {
            let bucket = value.bucket_key();
            self.equality
                .entry((map_name.to_string(), field.clone()))
                .or_default()
                .entry(bucket.clone())
                .or_default()
                .insert(subscription_id);
            slip.push(SlipEntry::Equality { field, bucket });
        }
        for field in interests {
            self.interest
                .entry((map_name.to_string(), field.clone()))
                .or_default()
                .insert(subscription_id);
            slip.push(SlipEntry::Interest { field });
        }
        slip
    }

    /// Remove a subscription by walking its registration slip. Idempotent.
    pub fn remove(&mut self, subscription_id: SubscriptionId) -> bool {
        let Some(sub) = self.subs.remove(&subscription_id) else {
            return false;
        };

        for entry in &sub.slip {
            match entry {
                SlipEntry::Equality { field, bucket } => {
                    let key = (sub.map_name.clone(), field.clone());
                    if let Some(buckets) = self.equality.get_mut(&key) {
                        if let Some(set) = buckets.get_mut(bucket) {
                            set.remove(&subscription_id);
                            if set.is_empty() {
                                buckets.remove(bucket);
                            }
                        }
                        if buckets.is_empty() {
                            self.equality.remove(&key);
                        }
                    }
                }
                SlipEntry::Interest { field } => {
                    let key = (sub.map_name.clone(), field.clone());
                    if let Some(set) = self.interest.get_mut(&key) {
                        set.remove(&subscription_id);
                        if set.is_empty() {
                            self.interest.remove(&key);
                        }
                    }
                }
                SlipEntry::Wildcard => {
                    if let Some(set) = self.wildcard.get_mut(&sub.map_name) {
                        set.remove(&subscription_id);
                        if set.is_empty() {
                            self.wildcard.remove(&sub.map_name);
                        }
                    }
                }
            }
        }

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
    pub fn remove_client(&mut self, client_id: &ClientId) -> usize {
        let ids: Vec<SubscriptionId> = self
            .by_client
            .get(client_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        for id in &ids {
            self.remove(*id);
        }
        ids.len()
    }

    /// Remove every distributed subscription owned by a departed
    /// coordinator node.
    pub fn unregister_by_coordinator(&mut self, node: &NodeId) -> Vec<SubscriptionId> {
        let ids: Vec<SubscriptionId> = self
            .subs
            .values()
            .filter(|s| matches!(&s.route, DeltaRoute::Coordinator(n) if n == node))
            .map(|s| s.id)
            .collect();
        for id in &ids {
            self.remove(*id);
        }
        ids
    }

    /// Number of registered subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.subs.len()
    }

    /// Result keys a subscription currently tracks (for tests and
    /// diagnostics).
    pub fn result_keys(&self, subscription_id: SubscriptionId) -> Option<&HashSet<String>> {
        self.subs
            .get(&subscription_id)
            .map(|s| &s.previous_result_keys)
    }

    /// Process one record change and compute the affected subscriptions'
    /// deltas.
    ///
    /// Candidate subscriptions come from the reverse index; each candidate
    /// gets a cheap predicate check against the new record, and only when
    /// that check or the tracked result set says the change matters is the
    /// query re-executed against the map snapshot. Full re-execution is
    /// what keeps sort + limit sliding windows correct.
    pub fn process_change(
        &mut self,
        map_name: &str,
        source: &dyn RecordSource,
        key: &str,
        new_record: Option<&Record>,
        old_record: Option<&Record>,
    ) -> Vec<QueryNotification> {
        let candidates = self.candidates(map_name, new_record, old_record);
        if candidates.is_empty() {
            return Vec::new();
        }

        let mut notifications = Vec::new();
        let mut candidates: Vec<SubscriptionId> = candidates.into_iter().collect();
        candidates.sort();

        for sub_id in candidates {
            let Some(sub) = self.subs.get_mut(&sub_id) else {
                continue;
            };

            let approx_match = new_record.map_or(false, |record| {
                sub.query
                    .predicate
                    .as_ref()
                    .map_or(true, |p| p.matches(record))
            });
            let was_in_results = sub.previous_result_keys.contains(key);
            if !was_in_results && !approx_match {
                continue;
            }

            let rows = execute_query(&sub.query, source);
            let new_keys: HashSet<String> = rows.iter().map(|(k, _)| k.clone()).collect();

            let mut deltas = Vec::new();
            let mut removed: Vec<&String> = sub
                .previous_result_keys
                .difference(&new_keys)
                .collect();
            removed.sort();
            for dropped in removed {
                deltas.push(QueryDelta {
                    kind: QueryDeltaKind::Remove,
                    key: dropped.clone(),
                    value: None,
                });
            }
            for (row_key, record) in &rows {
                let newly_visible = !sub.previous_result_keys.contains(row_key);
                if newly_visible || row_key == key {
                    deltas.push(QueryDelta {
                        kind: QueryDeltaKind::Update,
                        key: row_key.clone(),
                        value: Some(record_to_value(record)),
                    });
                }
            }

            sub.previous_result_keys = new_keys;
            if !deltas.is_empty() {
                notifications.push(QueryNotification {
                    subscription_id: sub.id,
                    map_name: sub.map_name.clone(),
                    route: sub.route.clone(),
                    deltas,
                });
            }
        }
        notifications
    }

    fn candidates(
        &self,
        map_name: &str,
        new_record: Option<&Record>,
        old_record: Option<&Record>,
    ) -> HashSet<SubscriptionId> {
        let mut out = HashSet::new();

        match changed_fields(old_record, new_record) {
            FieldChanges::All => {
                // structural change: everything on the map is a candidate
                if let Some(all) = self.by_map.get(map_name) {
                    out.extend(all.iter().copied());
                }
            }
            FieldChanges::Fields(fields) => {
                for field in &fields {
                    let key = (map_name.to_string(), field.clone());
                    if let Some(buckets) = self.equality.get(&key) {
                        for record in [old_record, new_record].into_iter().flatten() {
                            let value = record.get(field).cloned().unwrap_or(Value::Null);
                            if let Some(set) = buckets.get(&value.bucket_key()) {
                                out.extend(set.iter().copied());
                            }
                        }
                    }
                    if let Some(set) = self.interest.get(&key) {
                        out.extend(set.iter().copied());
                    }
                }
                if let Some(set) = self.wildcard.get(map_name) {
                    out.extend(set.iter().copied());
                }
            }
        }
        out
    }
}
