//! Cluster-layer errors.

use livequery_core::NodeId;
use livequery_engine::EngineError;
use thiserror::Error;

/// Result type for cluster operations.
pub type Result<T> = std::result::Result<T, ClusterError>;

/// Errors raised by distributed coordination.
#[derive(Debug, Clone, Error)]
pub enum ClusterError {
    /// No transport route to a member.
    #[error("node unavailable: {0}")]
    NodeUnavailable(NodeId),

    /// The transport failed to move a message.
    #[error("transport error: {0}")]
    Transport(String),

    /// A remote member answered with an error.
    #[error("node {node} failed: {message}")]
    NodeError { node: NodeId, message: String },

    /// An inbound payload failed validation.
    #[error("invalid cluster message: {0}")]
    InvalidMessage(String),

    /// A pagination cursor failed validation.
    #[error("invalid cursor: {0}")]
    InvalidCursor(String),

    /// The coordinator was destroyed while requests were pending.
    #[error("coordinator destroyed")]
    Terminated,

    /// A local engine operation failed.
    #[error(transparent)]
    Engine(#[from] EngineError),
}
