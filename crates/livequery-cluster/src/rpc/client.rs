//! tarpc client pool implementing the cluster transport.
//!
//! Connections are established lazily per peer and reused; a broken
//! connection is dropped from the pool and re-dialed with bounded
//! retries.

use crate::error::{ClusterError, Result};
use crate::messages::{ClusterMessage, SearchRequest, SearchResponse};
use crate::rpc::protocol::NodeServiceClient;
use crate::transport::ClusterTransport;
use async_trait::async_trait;
use livequery_core::NodeId;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;
use tarpc::client::Config;
use tokio::sync::RwLock;
use tokio_serde::formats::Bincode;
use tracing::{debug, info, warn};

/// Default connection timeout in milliseconds.
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;

/// Default number of dial attempts for a peer.
const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Default delay between dial attempts in milliseconds.
const DEFAULT_RETRY_DELAY_MS: u64 = 500;

/// Configuration for peer connections.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Number of dial attempts.
    pub retry_attempts: u32,
    /// Delay between dial attempts.
    pub retry_delay: Duration,
    /// Maximum in-flight requests per peer.
    pub max_pending_requests: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            max_pending_requests: 100,
        }
    }
}

/// Dial one peer directly.
pub async fn connect_to_node(addr: SocketAddr) -> Result<NodeServiceClient> {
    debug!(%addr, "connecting to peer");
    let transport = tarpc::serde_transport::tcp::connect(addr, Bincode::default)
        .await
        .map_err(|e| ClusterError::Transport(e.to_string()))?;
    let client = NodeServiceClient::new(Config::default(), transport).spawn();
    info!(%addr, "connected to peer");
    Ok(client)
}

/// Connection pool addressing peers by node id.
pub struct RpcTransport {
    config: ClientConfig,
    addresses: RwLock<HashMap<NodeId, SocketAddr>>,
    clients: RwLock<HashMap<NodeId, NodeServiceClient>>,
}

impl RpcTransport {
    /// Create an empty pool.
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            addresses: RwLock::new(HashMap::new()),
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Record a peer's address; connections dial lazily.
    pub async fn add_peer(&self, id: NodeId, addr: SocketAddr) {
        self.addresses.write().await.insert(id, addr);
    }

    /// Forget a peer and drop its connection.
    pub async fn remove_peer(&self, id: &NodeId) {
        self.addresses.write().await.remove(id);
        self.clients.write().await.remove(id);
    }

    async fn client_for(&self, id: &NodeId) -> Result<NodeServiceClient> {
        if let Some(client) = self.clients.read().await.get(id) {
            return Ok(client.clone());
        }

        let addr = self
            .addresses
            .read()
            .await
            .get(id)
            .copied()
            .ok_or_else(|| ClusterError::NodeUnavailable(id.clone()))?;

        let mut last_error = String::new();
        for attempt in 0..self.config.retry_attempts {
            if attempt > 0 {
                tokio::time::sleep(self.config.retry_delay).await;
            }
            let dialed = tokio::time::timeout(
                self.config.connect_timeout,
                tarpc::serde_transport::tcp::connect(addr, Bincode::default),
            )
            .await;
            match dialed {
                Ok(Ok(transport)) => {
                    let mut config = Config::default();
                    config.max_in_flight_requests = self.config.max_pending_requests;
                    let client = NodeServiceClient::new(config, transport).spawn();
                    self.clients.write().await.insert(id.clone(), client.clone());
                    return Ok(client);
                }
                Ok(Err(error)) => {
                    warn!(node = %id, %addr, %error, attempt, "peer dial failed");
                    last_error = error.to_string();
                }
                Err(_elapsed) => {
                    warn!(node = %id, %addr, attempt, "peer dial timed out");
                    last_error = "connect timeout".to_string();
                }
            }
        }
        Err(ClusterError::Transport(format!(
            "could not reach {}: {}",
            id, last_error
        )))
    }

    async fn drop_client(&self, id: &NodeId) {
        self.clients.write().await.remove(id);
    }
}

#[async_trait]
impl ClusterTransport for RpcTransport {
    async fn deliver(&self, to: &NodeId, message: ClusterMessage) -> Result<()> {
        let client = self.client_for(to).await?;
        match client.deliver(tarpc::context::current(), message).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(rpc_error)) => Err(ClusterError::Transport(rpc_error.to_string())),
            Err(error) => {
                self.drop_client(to).await;
                Err(ClusterError::Transport(error.to_string()))
            }
        }
    }

    async fn search(&self, to: &NodeId, request: SearchRequest) -> Result<SearchResponse> {
        let client = self.client_for(to).await?;
        match client.search(tarpc::context::current(), request).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(rpc_error)) => Err(ClusterError::NodeError {
                node: to.clone(),
                message: rpc_error.to_string(),
            }),
            Err(error) => {
                self.drop_client(to).await;
                Err(ClusterError::Transport(error.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_config_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_millis(5_000));
        assert_eq!(config.retry_attempts, 3);
        assert_eq!(config.max_pending_requests, 100);
    }

    #[tokio::test]
    async fn test_unknown_peer_is_unavailable() {
        let pool = RpcTransport::new(ClientConfig::default());
        let err = pool
            .deliver(
                &NodeId::new("ghost"),
                ClusterMessage::Unsubscribe(crate::messages::UnsubscribePayload {
                    subscription_id: livequery_core::SubscriptionId::new(),
                }),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::NodeUnavailable(_)));
    }

    #[tokio::test]
    async fn test_removed_peer_forgotten() {
        let pool = RpcTransport::new(ClientConfig::default());
        let id = NodeId::new("n2");
        pool.add_peer(id.clone(), "127.0.0.1:39999".parse().unwrap())
            .await;
        pool.remove_peer(&id).await;
        let err = pool
            .search(
                &id,
                SearchRequest {
                    request_id: livequery_core::RequestId::new(),
                    map_name: "m".to_string(),
                    query: "q".to_string(),
                    options: Default::default(),
                    include_matched_terms: false,
                    timeout_ms: 100,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::NodeUnavailable(_)));
    }
}
