//! One cluster member, fully wired.
//!
//! `ClusterNode` owns the local engine (live search coordinator, standing
//! query registry, in-memory map catalog), the distributed subscription
//! coordinator, the one-shot search executor, and the delta pump that
//! moves computed deltas to client sockets or to remote coordinators.

use crate::clients::ClientRegistry;
use crate::config::ClusterConfig;
use crate::coordinator::{SubscribeOutcome, SubscriptionCoordinator};
use crate::engine::LocalEngine;
use crate::error::Result;
use crate::membership::{MemberInfo, MemberRegistry};
use crate::messages::{ClusterMessage, DeltaPayload, SearchRequest, SearchResponse};
use crate::search::{ClusterSearch, ClusterSearchResult};
use crate::transport::{ClusterTransport, MessageEndpoint};
use async_trait::async_trait;
use livequery_core::{
    unix_millis, ChangeType, ClientFrame, ClientId, ClientSink, MetricsSink, NodeId,
    QueryUpdateKind, QueryUpdatePayload, Record, RecordCatalog, SearchUpdatePayload,
    SubscriptionId,
};
use livequery_engine::{
    spawn_delta_pump, BatchOptions, ChannelSink, DeltaDelivery, DeltaRoute, KeyLocks,
    MemoryCatalog, Query, QueryDeltaKind, QueryNotification, SearchConfig, SearchCoordinator,
    SearchDelta, StandingQueryRegistry,
};
use livequery_text::SearchOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// A livequery cluster member.
pub struct ClusterNode {
    node_id: NodeId,
    members: Arc<RwLock<MemberRegistry>>,
    engine: Arc<LocalEngine>,
    subscriptions: Arc<SubscriptionCoordinator>,
    cluster_search: ClusterSearch,
    clients: Arc<ClientRegistry>,
    catalog: Arc<MemoryCatalog>,
    key_locks: KeyLocks,
    transport: Arc<dyn ClusterTransport>,
}

impl ClusterNode {
    /// Build a node on the given transport.
    ///
    /// The node registers itself as a member; remote members arrive via
    /// [`ClusterNode::member_joined`]. Must run inside a tokio runtime
    /// (the delta pump is spawned here).
    pub fn new(
        node_id: NodeId,
        address: impl Into<String>,
        config: ClusterConfig,
        transport: Arc<dyn ClusterTransport>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Arc<Self> {
        let catalog = Arc::new(MemoryCatalog::new());
        let clients = Arc::new(ClientRegistry::new());

        let mut members = MemberRegistry::with_heartbeat_timeout(config.heartbeat_timeout_ms);
        members.register(MemberInfo::new(node_id.clone(), address));
        let members = Arc::new(RwLock::new(members));

        let (delta_sink, delta_rx) = ChannelSink::channel();
        let search = Arc::new(RwLock::new(SearchCoordinator::new(Arc::new(delta_sink))));
        let queries = Arc::new(RwLock::new(StandingQueryRegistry::new()));
        let engine = Arc::new(LocalEngine::new(
            node_id.clone(),
            search,
            queries,
            catalog.clone(),
        ));

        let subscriptions = Arc::new(SubscriptionCoordinator::new(
            node_id.clone(),
            config.clone(),
            members.clone(),
            transport.clone(),
            clients.clone(),
            engine.clone(),
            metrics.clone(),
        ));

        let delivery = Arc::new(NodeDeltaDelivery {
            node_id: node_id.clone(),
            clients: clients.clone(),
            transport: transport.clone(),
            subscriptions: subscriptions.clone(),
        });
        let batch = match config.batch_flush_ms {
            Some(ms) => BatchOptions::Batched(Duration::from_millis(ms)),
            None => BatchOptions::Immediate,
        };
        spawn_delta_pump(delta_rx, delivery, batch);

        let cluster_search = ClusterSearch::new(
            node_id.clone(),
            config,
            members.clone(),
            transport.clone(),
            engine.clone(),
            metrics,
        );

        Arc::new(Self {
            node_id,
            members,
            engine,
            subscriptions,
            cluster_search,
            clients,
            catalog,
            key_locks: KeyLocks::new(),
            transport,
        })
    }

    /// This node's id.
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// The node's map catalog.
    pub fn catalog(&self) -> &Arc<MemoryCatalog> {
        &self.catalog
    }

    /// The local engine seam.
    pub fn engine(&self) -> &Arc<LocalEngine> {
        &self.engine
    }

    /// The distributed subscription coordinator.
    pub fn subscriptions(&self) -> &Arc<SubscriptionCoordinator> {
        &self.subscriptions
    }

    /// The membership view.
    pub fn members(&self) -> &Arc<RwLock<MemberRegistry>> {
        &self.members
    }

    /// Attach a client socket.
    pub async fn connect_client(&self, client_id: ClientId, sink: Arc<dyn ClientSink>) {
        self.clients.register(client_id, sink).await;
    }

    /// Detach a client and drop everything it subscribed to.
    pub async fn disconnect_client(&self, client_id: &ClientId) {
        self.subscriptions.unsubscribe_client(client_id).await;
        self.engine
            .search()
            .write()
            .await
            .unsubscribe_client(client_id);
        self.engine.queries().write().await.remove_client(client_id);
        self.clients.unregister(client_id).await;
        info!(%client_id, "client disconnected; subscriptions dropped");
    }

    /// Enable full-text search on a map and seed the index from its
    /// current contents.
    pub async fn enable_search(&self, map_name: &str, config: SearchConfig) -> Result<()> {
        let entries = self.catalog.map(map_name).entries();
        let mut search = self.engine.search().write().await;
        search.enable_search(map_name, config);
        search.build_index_from_entries(map_name, entries)?;
        Ok(())
    }

    /// Register a distributed live search subscription for a client.
    pub async fn subscribe_search(
        &self,
        client_id: ClientId,
        map_name: &str,
        query: &str,
        options: SearchOptions,
    ) -> Result<SubscribeOutcome> {
        self.subscriptions
            .subscribe_search(client_id, map_name, query, options)
            .await
    }

    /// Register a distributed live predicate subscription for a client.
    pub async fn subscribe_query(
        &self,
        client_id: ClientId,
        map_name: &str,
        query: Query,
    ) -> Result<SubscribeOutcome> {
        self.subscriptions
            .subscribe_query(client_id, map_name, query)
            .await
    }

    /// Tear down a subscription this node coordinates.
    pub async fn unsubscribe(&self, subscription_id: SubscriptionId) -> bool {
        self.subscriptions.unsubscribe(subscription_id).await
    }

    /// One-shot distributed search.
    pub async fn search(
        &self,
        map_name: &str,
        query: &str,
        options: SearchOptions,
        cursor: Option<&str>,
    ) -> Result<ClusterSearchResult> {
        self.cluster_search
            .search(map_name, query, options, cursor, true)
            .await
    }

    /// Write a record through the per-key lock and propagate the change.
    pub async fn write_record(&self, map_name: &str, key: &str, record: Record) -> Result<()> {
        let _guard = self.key_locks.lock(map_name, key).await;
        let map = self.catalog.map(map_name);
        let old = map.set(key, record.clone());
        let change_type = if old.is_some() {
            ChangeType::Update
        } else {
            ChangeType::Add
        };
        self.apply_record_change(map_name, key, old, Some(record), change_type)
            .await
    }

    /// Delete a record through the per-key lock and propagate the change.
    pub async fn delete_record(&self, map_name: &str, key: &str) -> Result<()> {
        let _guard = self.key_locks.lock(map_name, key).await;
        let map = self.catalog.map(map_name);
        let Some(old) = map.remove(key) else {
            return Ok(());
        };
        self.apply_record_change(map_name, key, Some(old), None, ChangeType::Remove)
            .await
    }

    /// Propagate an already-applied store change into the live engines.
    ///
    /// This is the entry point the replication layer calls after its
    /// merge decided the change: index mutation and subscription delta
    /// computation happen synchronously here; delivery is asynchronous
    /// behind the delta pump and the notification fan-out below.
    pub async fn apply_record_change(
        &self,
        map_name: &str,
        key: &str,
        old: Option<Record>,
        new: Option<Record>,
        change_type: ChangeType,
    ) -> Result<()> {
        self.engine
            .search()
            .write()
            .await
            .on_data_change(map_name, key, new.as_ref(), change_type)?;

        let Some(source) = self.catalog.open(map_name) else {
            return Ok(());
        };
        let notifications = self.engine.queries().write().await.process_change(
            map_name,
            source.as_ref(),
            key,
            new.as_ref(),
            old.as_ref(),
        );
        for notification in notifications {
            self.deliver_query_notification(notification).await;
        }
        Ok(())
    }

    async fn deliver_query_notification(&self, notification: QueryNotification) {
        match notification.route {
            DeltaRoute::Local(client_id) => {
                for delta in notification.deltas {
                    let frame = ClientFrame::QueryUpdate(QueryUpdatePayload {
                        query_id: notification.subscription_id,
                        key: delta.key,
                        value: delta.value,
                        kind: match delta.kind {
                            QueryDeltaKind::Update => QueryUpdateKind::Update,
                            QueryDeltaKind::Remove => QueryUpdateKind::Remove,
                        },
                    });
                    self.clients.send(&client_id, frame).await;
                }
            }
            DeltaRoute::Coordinator(coordinator) => {
                for delta in notification.deltas {
                    let payload = DeltaPayload {
                        subscription_id: notification.subscription_id,
                        source_node_id: self.node_id.clone(),
                        key: delta.key,
                        value: delta.value,
                        score: None,
                        matched_terms: None,
                        change_type: match delta.kind {
                            QueryDeltaKind::Update => livequery_core::DeltaKind::Update,
                            QueryDeltaKind::Remove => livequery_core::DeltaKind::Leave,
                        },
                        timestamp_ms: unix_millis(),
                    };
                    self.forward_delta(&coordinator, payload).await;
                }
            }
        }
    }

    async fn forward_delta(&self, coordinator: &NodeId, payload: DeltaPayload) {
        if *coordinator == self.node_id {
            // this node coordinates the subscription itself
            self.subscriptions.handle_delta(payload).await;
            return;
        }
        if let Err(error) = self
            .transport
            .deliver(coordinator, ClusterMessage::Delta(payload))
            .await
        {
            warn!(node = %coordinator, %error, "delta forwarding failed");
        }
    }

    /// A member joined the cluster.
    pub async fn member_joined(&self, info: MemberInfo) {
        debug!(node = %info.id, address = %info.address, "member joined");
        self.members.write().await.register(info);
    }

    /// A member left; clean up everything tied to it.
    pub async fn member_left(&self, node: &NodeId) {
        self.members.write().await.remove(node);
        self.subscriptions.member_left(node).await;
    }
}

/// Routes drained search deltas to their destinations.
struct NodeDeltaDelivery {
    node_id: NodeId,
    clients: Arc<ClientRegistry>,
    transport: Arc<dyn ClusterTransport>,
    subscriptions: Arc<SubscriptionCoordinator>,
}

#[async_trait]
impl DeltaDelivery for NodeDeltaDelivery {
    async fn deliver(&self, deltas: Vec<SearchDelta>) {
        // local deltas coalesce per client into one frame; remote deltas
        // travel one message each so the coordinator sees producer order
        let mut per_client: Vec<(ClientId, Vec<SearchUpdatePayload>)> = Vec::new();

        for delta in deltas {
            match delta.route.clone() {
                DeltaRoute::Local(client_id) => {
                    let payload = SearchUpdatePayload {
                        subscription_id: delta.subscription_id,
                        key: delta.key,
                        value: delta.value,
                        score: delta.score,
                        matched_terms: delta.matched_terms,
                        change_type: delta.change,
                    };
                    match per_client.iter_mut().find(|(id, _)| *id == client_id) {
                        Some((_, payloads)) => payloads.push(payload),
                        None => per_client.push((client_id, vec![payload])),
                    }
                }
                DeltaRoute::Coordinator(coordinator) => {
                    let payload = DeltaPayload {
                        subscription_id: delta.subscription_id,
                        source_node_id: self.node_id.clone(),
                        key: delta.key,
                        value: delta.value,
                        score: Some(delta.score),
                        matched_terms: Some(delta.matched_terms),
                        change_type: delta.change,
                        timestamp_ms: unix_millis(),
                    };
                    if coordinator == self.node_id {
                        self.subscriptions.handle_delta(payload).await;
                    } else if let Err(error) = self
                        .transport
                        .deliver(&coordinator, ClusterMessage::Delta(payload))
                        .await
                    {
                        warn!(node = %coordinator, %error, "delta forwarding failed");
                    }
                }
            }
        }

        for (client_id, mut payloads) in per_client {
            let frame = if payloads.len() == 1 {
                ClientFrame::SearchUpdate(payloads.remove(0))
            } else {
                ClientFrame::SearchUpdateBatch(payloads)
            };
            self.clients.send(&client_id, frame).await;
        }
    }
}

#[async_trait]
impl MessageEndpoint for ClusterNode {
    fn endpoint_id(&self) -> &NodeId {
        &self.node_id
    }

    async fn handle_message(&self, sender: NodeId, message: ClusterMessage) {
        if let Err(error) = message.validate() {
            warn!(
                kind = message.kind_name(),
                sender = %sender,
                %error,
                "dropping invalid cluster message"
            );
            return;
        }
        match message {
            ClusterMessage::Subscribe(payload) => self.subscriptions.handle_subscribe(payload).await,
            ClusterMessage::Ack(payload) => self.subscriptions.handle_ack(payload).await,
            ClusterMessage::Delta(payload) => self.subscriptions.handle_delta(payload).await,
            ClusterMessage::Unsubscribe(payload) => {
                self.subscriptions.handle_unsubscribe(payload).await
            }
        }
    }

    async fn handle_search(&self, request: SearchRequest) -> SearchResponse {
        if let Err(error) = request.validate() {
            return SearchResponse {
                request_id: request.request_id,
                node_id: self.node_id.clone(),
                results: Vec::new(),
                total_hits: 0,
                execution_time_ms: 0,
                error: Some(error.to_string()),
            };
        }
        self.engine.execute_search(&request).await
    }
}
