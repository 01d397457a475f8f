//! tarpc service trait of a cluster member.

use crate::messages::{ClusterMessage, SearchRequest, SearchResponse};
use livequery_core::NodeId;
use serde::{Deserialize, Serialize};

/// Result type for RPC operations; must be serializable end to end.
pub type RpcResult<T> = Result<T, RpcError>;

/// Serializable error for RPC calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RpcError {
    /// The payload failed validation on the receiving node.
    Rejected(String),
    /// The receiving node failed internally.
    Internal(String),
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RpcError::Rejected(msg) => write!(f, "rejected: {}", msg),
            RpcError::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl std::error::Error for RpcError {}

/// Service every cluster member exposes to its peers.
#[tarpc::service]
pub trait NodeService {
    /// Deliver a one-way subscription message.
    ///
    /// Invalid payloads are dropped on the receiving side with a warning;
    /// the call itself still succeeds (fire-and-forget semantics).
    async fn deliver(message: ClusterMessage) -> RpcResult<()>;

    /// Execute a one-shot local search and return this node's results.
    async fn search(request: SearchRequest) -> RpcResult<SearchResponse>;

    /// Liveness probe; returns the receiver's current Unix millis.
    async fn ping(sender: NodeId) -> RpcResult<u64>;
}
