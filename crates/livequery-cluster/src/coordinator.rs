//! Distributed subscription coordination.
//!
//! Per subscription the coordinator runs this state machine:
//!
//! ```text
//!  CREATED --register-local--> PENDING_ACKS --ack-from-all--> ACTIVE --unsubscribe--> TERMINATED
//!                                 | timeout                       ^            |
//!                                 +--partial-resolve--> ACTIVE ---+            |
//!                                                                  node-left --+
//! ```
//!
//! Registration resolves with partial results when the ACK timer fires;
//! it never rejects on timeout. Nodes that did not acknowledge (or
//! acknowledged a failure) surface in `failed_nodes`. A resolved wait is
//! never mutated by late ACKs: they still update `registered_nodes`, but
//! their initial results are dropped.

use crate::clients::ClientRegistry;
use crate::config::ClusterConfig;
use crate::engine::LocalEngine;
use crate::error::{ClusterError, Result};
use crate::membership::MemberRegistry;
use crate::messages::{
    AckPayload, ClusterMessage, DeltaPayload, InitialResult, SubscribePayload, SubscriptionKind,
    UnsubscribePayload,
};
use crate::rrf::rrf_merge;
use crate::transport::ClusterTransport;
use livequery_core::{
    unix_millis, ClientFrame, ClientId, DeltaKind, MetricsSink, NodeId, QueryUpdateKind,
    QueryUpdatePayload, SearchUpdatePayload, SubscriptionId, Value,
};
use livequery_engine::Query;
use livequery_text::SearchOptions;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex, RwLock};
use tracing::{debug, info, warn};

/// Lifecycle of one distributed subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Scattered, waiting for member acknowledgements.
    PendingAcks,
    /// Registered and streaming deltas.
    Active,
}

/// One merged result the coordinator currently tracks for a client.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultEntry {
    pub value: Option<Value>,
    pub score: Option<f64>,
    pub source_node: NodeId,
}

/// A distributed subscription owned by this coordinator node.
#[derive(Debug)]
pub struct DistributedSubscription {
    pub id: SubscriptionId,
    pub kind: SubscriptionKind,
    pub map_name: String,
    pub client_id: ClientId,
    pub state: SubscriptionState,
    /// Nodes that successfully hold a local subscription with this id.
    pub registered_nodes: HashSet<NodeId>,
    /// Merged live view, keyed by record key.
    pub current_results: HashMap<String, ResultEntry>,
    pub created_at: u64,
    limit: Option<usize>,
}

/// Outcome of a subscription registration.
#[derive(Debug, Clone)]
pub struct SubscribeOutcome {
    pub subscription_id: SubscriptionId,
    pub results: Vec<InitialResult>,
    pub total_hits: usize,
    /// Nodes that acknowledged successfully, in arrival order.
    pub responded_nodes: Vec<NodeId>,
    /// Nodes that never acknowledged or acknowledged a failure.
    pub failed_nodes: Vec<NodeId>,
}

/// Pending-acknowledgement bookkeeping for one registration.
///
/// Contract: the completion channel fires at most once; every outcome is
/// either the channel firing or the caller's timer elapsing, and timer
/// cancellation happens before any resolution is observed (the caller
/// owns both ends).
struct AckWait {
    expected: HashSet<NodeId>,
    responded: HashSet<NodeId>,
    /// Acks in arrival order; merge depends on it.
    received: Vec<AckPayload>,
    complete_tx: Option<oneshot::Sender<std::result::Result<(), ClusterError>>>,
}

impl AckWait {
    fn record(&mut self, ack: AckPayload) {
        if !self.responded.insert(ack.node_id.clone()) {
            return;
        }
        self.received.push(ack);
        if self.responded.len() >= self.expected.len() {
            if let Some(tx) = self.complete_tx.take() {
                let _ = tx.send(Ok(()));
            }
        }
    }
}

/// Coordinator-side and data-node-side handling of distributed
/// subscriptions for one node.
pub struct SubscriptionCoordinator {
    node_id: NodeId,
    config: ClusterConfig,
    members: Arc<RwLock<MemberRegistry>>,
    transport: Arc<dyn ClusterTransport>,
    clients: Arc<ClientRegistry>,
    local: Arc<LocalEngine>,
    metrics: Arc<dyn MetricsSink>,
    subs: RwLock<HashMap<SubscriptionId, DistributedSubscription>>,
    acks: Mutex<HashMap<SubscriptionId, AckWait>>,
    destroyed: AtomicBool,
}

impl SubscriptionCoordinator {
    /// Wire up the coordinator for one node.
    pub fn new(
        node_id: NodeId,
        config: ClusterConfig,
        members: Arc<RwLock<MemberRegistry>>,
        transport: Arc<dyn ClusterTransport>,
        clients: Arc<ClientRegistry>,
        local: Arc<LocalEngine>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            node_id,
            config,
            members,
            transport,
            clients,
            local,
            metrics,
            subs: RwLock::new(HashMap::new()),
            acks: Mutex::new(HashMap::new()),
            destroyed: AtomicBool::new(false),
        }
    }

    /// Register a distributed full-text search subscription.
    pub async fn subscribe_search(
        &self,
        client_id: ClientId,
        map_name: &str,
        query: &str,
        options: SearchOptions,
    ) -> Result<SubscribeOutcome> {
        let subscription_id = SubscriptionId::new();
        let payload = SubscribePayload {
            subscription_id,
            coordinator_node_id: self.node_id.clone(),
            map_name: map_name.to_string(),
            kind: SubscriptionKind::Search,
            search_query: Some(query.to_string()),
            search_options: Some(options.clone()),
            query: None,
        };
        self.subscribe(client_id, payload, options.limit).await
    }

    /// Register a distributed predicate-query subscription.
    pub async fn subscribe_query(
        &self,
        client_id: ClientId,
        map_name: &str,
        query: Query,
    ) -> Result<SubscribeOutcome> {
        let subscription_id = SubscriptionId::new();
        let limit = query.limit;
        let payload = SubscribePayload {
            subscription_id,
            coordinator_node_id: self.node_id.clone(),
            map_name: map_name.to_string(),
            kind: SubscriptionKind::Query,
            search_query: None,
            search_options: None,
            query: Some(query),
        };
        self.subscribe(client_id, payload, limit).await
    }

    async fn subscribe(
        &self,
        client_id: ClientId,
        payload: SubscribePayload,
        limit: Option<usize>,
    ) -> Result<SubscribeOutcome> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(ClusterError::Terminated);
        }
        payload.validate()?;

        let subscription_id = payload.subscription_id;
        let members: Vec<NodeId> = self.members.read().await.member_ids();

        self.subs.write().await.insert(
            subscription_id,
            DistributedSubscription {
                id: subscription_id,
                kind: payload.kind,
                map_name: payload.map_name.clone(),
                client_id,
                state: SubscriptionState::PendingAcks,
                registered_nodes: HashSet::new(),
                current_results: HashMap::new(),
                created_at: unix_millis(),
                limit,
            },
        );

        let (complete_tx, complete_rx) = oneshot::channel();
        self.acks.lock().await.insert(
            subscription_id,
            AckWait {
                expected: members.iter().cloned().collect(),
                responded: HashSet::new(),
                received: Vec::new(),
                complete_tx: Some(complete_tx),
            },
        );

        // register locally and synthesize the self-ACK
        let self_ack = self.local_ack(&payload).await;
        self.handle_ack(self_ack).await;

        // scatter to every other member
        for member in members.iter().filter(|m| **m != self.node_id) {
            if let Err(error) = self
                .transport
                .deliver(member, ClusterMessage::Subscribe(payload.clone()))
                .await
            {
                warn!(%subscription_id, node = %member, %error, "subscription scatter failed");
            }
        }

        // gather under the ACK timer; timeout resolves with partials
        let timeout = Duration::from_millis(self.config.ack_timeout_ms);
        match tokio::time::timeout(timeout, complete_rx).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(error))) => return Err(error),
            Ok(Err(_closed)) => return Err(ClusterError::Terminated),
            Err(_elapsed) => {
                self.metrics.inc_counter(
                    "cluster_ack_timeout_total",
                    &[("map", payload.map_name.as_str())],
                );
                debug!(%subscription_id, "ACK timer fired; resolving with partial results");
            }
        }

        self.resolve(subscription_id).await
    }

    /// Assemble the outcome from whatever acknowledgements arrived.
    async fn resolve(&self, subscription_id: SubscriptionId) -> Result<SubscribeOutcome> {
        let Some(wait) = self.acks.lock().await.remove(&subscription_id) else {
            return Err(ClusterError::Terminated);
        };

        let responded_nodes: Vec<NodeId> = wait
            .received
            .iter()
            .filter(|a| a.success)
            .map(|a| a.node_id.clone())
            .collect();
        let mut failed_nodes: Vec<NodeId> = wait
            .expected
            .iter()
            .filter(|&n| !responded_nodes.contains(n))
            .cloned()
            .collect();
        failed_nodes.sort();

        let mut subs = self.subs.write().await;
        let Some(sub) = subs.get_mut(&subscription_id) else {
            return Err(ClusterError::Terminated);
        };

        let (results, total_hits) = match sub.kind {
            SubscriptionKind::Search => {
                merge_search_results(&wait.received, sub.limit, self.config.rrf_k)
            }
            SubscriptionKind::Query => merge_query_results(&wait.received, sub.limit),
        };

        sub.current_results = results
            .iter()
            .map(|r| {
                let source = first_reporter(&wait.received, &r.key)
                    .unwrap_or_else(|| self.node_id.clone());
                (
                    r.key.clone(),
                    ResultEntry {
                        value: r.value.clone(),
                        score: r.score,
                        source_node: source,
                    },
                )
            })
            .collect();
        sub.state = SubscriptionState::Active;

        self.metrics.inc_counter(
            "cluster_sub_registered_total",
            &[("map", sub.map_name.as_str())],
        );
        info!(
            %subscription_id,
            map = %sub.map_name,
            responded = responded_nodes.len(),
            failed = failed_nodes.len(),
            results = results.len(),
            "distributed subscription active"
        );

        Ok(SubscribeOutcome {
            subscription_id,
            results,
            total_hits,
            responded_nodes,
            failed_nodes,
        })
    }

    /// Build this node's own acknowledgement by registering locally.
    async fn local_ack(&self, payload: &SubscribePayload) -> AckPayload {
        match self.register_local(payload).await {
            Ok((initial_results, total_hits)) => AckPayload {
                subscription_id: payload.subscription_id,
                node_id: self.node_id.clone(),
                success: true,
                initial_results,
                total_hits: Some(total_hits),
                error: None,
            },
            Err(error) => AckPayload::failure(
                payload.subscription_id,
                self.node_id.clone(),
                error.to_string(),
            ),
        }
    }

    async fn register_local(
        &self,
        payload: &SubscribePayload,
    ) -> Result<(Vec<InitialResult>, usize)> {
        match payload.kind {
            SubscriptionKind::Search => {
                self.local
                    .register_search(
                        payload.subscription_id,
                        &payload.map_name,
                        payload.search_query.as_deref().unwrap_or_default(),
                        payload.search_options.clone().unwrap_or_default(),
                        payload.coordinator_node_id.clone(),
                    )
                    .await
            }
            SubscriptionKind::Query => {
                let results = self
                    .local
                    .register_query(
                        payload.subscription_id,
                        &payload.map_name,
                        payload.query.clone().unwrap_or_default(),
                        payload.coordinator_node_id.clone(),
                    )
                    .await?;
                let total = results.len();
                Ok((results, total))
            }
        }
    }

    /// Data-node side of `CLUSTER_SUB_REGISTER`: register locally and
    /// reply with an acknowledgement.
    pub async fn handle_subscribe(&self, payload: SubscribePayload) {
        let coordinator = payload.coordinator_node_id.clone();
        let ack = self.local_ack(&payload).await;
        if let Err(error) = self
            .transport
            .deliver(&coordinator, ClusterMessage::Ack(ack))
            .await
        {
            warn!(
                subscription_id = %payload.subscription_id,
                node = %coordinator,
                %error,
                "failed to send subscription ACK"
            );
        }
    }

    /// Coordinator side of `CLUSTER_SUB_ACK`.
    pub async fn handle_ack(&self, ack: AckPayload) {
        let subscription_id = ack.subscription_id;
        {
            let mut subs = self.subs.write().await;
            let Some(sub) = subs.get_mut(&subscription_id) else {
                debug!(%subscription_id, node = %ack.node_id, "ACK for unknown subscription; dropped");
                return;
            };
            if ack.success {
                sub.registered_nodes.insert(ack.node_id.clone());
            }
        }

        let mut acks = self.acks.lock().await;
        if let Some(wait) = acks.get_mut(&subscription_id) {
            wait.record(ack);
        }
        // a missing wait means the registration already resolved; the
        // late ACK still updated registered_nodes above
    }

    /// Coordinator side of `CLUSTER_SUB_UPDATE`: fold the delta into the
    /// merged view and forward a frame to the owning client.
    pub async fn handle_delta(&self, delta: DeltaPayload) {
        let frame;
        let client_id;
        {
            let mut subs = self.subs.write().await;
            let Some(sub) = subs.get_mut(&delta.subscription_id) else {
                debug!(
                    subscription_id = %delta.subscription_id,
                    "delta for unknown subscription; dropped"
                );
                return;
            };

            let was_tracked = sub.current_results.contains_key(&delta.key);
            match delta.change_type {
                DeltaKind::Leave => {
                    sub.current_results.remove(&delta.key);
                }
                DeltaKind::Enter | DeltaKind::Update => {
                    sub.current_results.insert(
                        delta.key.clone(),
                        ResultEntry {
                            value: delta.value.clone(),
                            score: delta.score,
                            source_node: delta.source_node_id.clone(),
                        },
                    );
                }
            }

            client_id = sub.client_id.clone();
            frame = match sub.kind {
                SubscriptionKind::Search => ClientFrame::SearchUpdate(SearchUpdatePayload {
                    subscription_id: sub.id,
                    key: delta.key.clone(),
                    value: delta.value.clone(),
                    score: delta.score.unwrap_or(0.0),
                    matched_terms: delta.matched_terms.clone().unwrap_or_default(),
                    change_type: delta.change_type,
                }),
                SubscriptionKind::Query => ClientFrame::QueryUpdate(QueryUpdatePayload {
                    query_id: sub.id,
                    key: delta.key.clone(),
                    value: delta.value.clone(),
                    kind: match delta.change_type {
                        DeltaKind::Leave => QueryUpdateKind::Leave,
                        DeltaKind::Update if was_tracked => QueryUpdateKind::Update,
                        _ => QueryUpdateKind::Enter,
                    },
                }),
            };
        }

        self.clients.send(&client_id, frame).await;
        let latency = unix_millis().saturating_sub(delta.timestamp_ms) as f64;
        self.metrics
            .observe("cluster_delta_latency_ms", latency, &[]);
    }

    /// Data-node side of `CLUSTER_SUB_UNREGISTER`. Idempotent.
    pub async fn handle_unsubscribe(&self, payload: UnsubscribePayload) {
        self.local.unregister(payload.subscription_id).await;
    }

    /// Tear down a subscription this node coordinates: unregister locally
    /// and fan out fire-and-forget unregisters. No ACK is awaited.
    pub async fn unsubscribe(&self, subscription_id: SubscriptionId) -> bool {
        let Some(sub) = self.subs.write().await.remove(&subscription_id) else {
            return false;
        };
        self.local.unregister(subscription_id).await;

        for node in sub.registered_nodes.iter().filter(|n| **n != self.node_id) {
            let message = ClusterMessage::Unsubscribe(UnsubscribePayload { subscription_id });
            if let Err(error) = self.transport.deliver(node, message).await {
                debug!(%subscription_id, node = %node, %error, "unregister fan-out failed");
            }
        }
        true
    }

    /// Tear down every subscription owned by a client.
    pub async fn unsubscribe_client(&self, client_id: &ClientId) -> usize {
        let ids: Vec<SubscriptionId> = self
            .subs
            .read()
            .await
            .values()
            .filter(|s| s.client_id == *client_id)
            .map(|s| s.id)
            .collect();
        let mut removed = 0;
        for id in ids {
            if self.unsubscribe(id).await {
                removed += 1;
            }
        }
        removed
    }

    /// React to a member leaving the cluster.
    pub async fn member_left(&self, node: &NodeId) {
        // evict the departed node from every coordinated subscription
        {
            let mut subs = self.subs.write().await;
            for sub in subs.values_mut() {
                sub.registered_nodes.remove(node);
                sub.current_results
                    .retain(|_, entry| entry.source_node != *node);
            }
        }

        // synthetically complete pending waits so no timer runs out on a
        // node that will never answer
        {
            let mut acks = self.acks.lock().await;
            for (subscription_id, wait) in acks.iter_mut() {
                if wait.expected.contains(node) && !wait.responded.contains(node) {
                    wait.record(AckPayload::failure(
                        *subscription_id,
                        node.clone(),
                        "node left the cluster",
                    ));
                }
            }
        }

        // drop local subscriptions whose coordinator disappeared
        self.local.unregister_by_coordinator(node).await;

        self.metrics
            .inc_counter("cluster_node_disconnect_total", &[("node", node.as_str())]);
        info!(node = %node, "cleaned up after departed member");
    }

    /// Reject all pending registrations and drop every subscription.
    pub async fn destroy(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
        {
            let mut acks = self.acks.lock().await;
            for wait in acks.values_mut() {
                if let Some(tx) = wait.complete_tx.take() {
                    let _ = tx.send(Err(ClusterError::Terminated));
                }
            }
            acks.clear();
        }
        self.subs.write().await.clear();
    }

    /// Snapshot a subscription's coordinator-side state (tests and
    /// diagnostics).
    pub async fn subscription_view(
        &self,
        subscription_id: SubscriptionId,
    ) -> Option<(SubscriptionState, HashSet<NodeId>, Vec<String>)> {
        let subs = self.subs.read().await;
        subs.get(&subscription_id).map(|sub| {
            let mut keys: Vec<String> = sub.current_results.keys().cloned().collect();
            keys.sort();
            (sub.state, sub.registered_nodes.clone(), keys)
        })
    }

    /// Number of subscriptions this node coordinates.
    pub async fn coordinated_count(&self) -> usize {
        self.subs.read().await.len()
    }
}

/// RRF-merge per-node ranked lists, rehydrating each key from the first
/// node that reported it.
fn merge_search_results(
    acks: &[AckPayload],
    limit: Option<usize>,
    rrf_k: f64,
) -> (Vec<InitialResult>, usize) {
    let lists: Vec<Vec<(String, f64)>> = acks
        .iter()
        .filter(|a| a.success)
        .map(|a| {
            a.initial_results
                .iter()
                .map(|r| (r.key.clone(), r.score.unwrap_or(0.0)))
                .collect()
        })
        .collect();
    let fused = rrf_merge(&lists, rrf_k);

    let mut originals: HashMap<&str, &InitialResult> = HashMap::new();
    for ack in acks.iter().filter(|a| a.success) {
        for result in &ack.initial_results {
            originals.entry(result.key.as_str()).or_insert(result);
        }
    }

    let total_hits = acks
        .iter()
        .filter(|a| a.success)
        .map(|a| a.total_hits.unwrap_or(a.initial_results.len()))
        .sum();

    let mut merged: Vec<InitialResult> = fused
        .into_iter()
        .filter_map(|(key, rrf_score)| {
            originals.get(key.as_str()).map(|original| InitialResult {
                key,
                value: original.value.clone(),
                score: Some(rrf_score),
                matched_terms: original.matched_terms.clone(),
            })
        })
        .collect();
    if let Some(limit) = limit {
        if limit > 0 {
            merged.truncate(limit);
        }
    }
    (merged, total_hits)
}

/// First-writer-wins key deduplication in acknowledgement arrival order.
fn merge_query_results(acks: &[AckPayload], limit: Option<usize>) -> (Vec<InitialResult>, usize) {
    let mut seen = HashSet::new();
    let mut merged = Vec::new();
    for ack in acks.iter().filter(|a| a.success) {
        for result in &ack.initial_results {
            if seen.insert(result.key.clone()) {
                merged.push(result.clone());
            }
        }
    }
    let total_hits = merged.len();
    if let Some(limit) = limit {
        if limit > 0 {
            merged.truncate(limit);
        }
    }
    (merged, total_hits)
}

fn first_reporter(acks: &[AckPayload], key: &str) -> Option<NodeId> {
    for ack in acks.iter().filter(|a| a.success) {
        if ack.initial_results.iter().any(|r| r.key == key) {
            return Some(ack.node_id.clone());
        }
    }
    None
}
