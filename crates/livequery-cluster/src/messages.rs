//! Cluster message payloads.
//!
//! Every inbound payload is validated before it may touch any state;
//! handlers drop invalid messages with a warning. The transport carries
//! these types opaquely (bincode over tarpc in the TCP binding).

use crate::error::{ClusterError, Result};
use livequery_core::{DeltaKind, NodeId, RequestId, SubscriptionId, Value};
use livequery_engine::Query;
use livequery_text::SearchOptions;
use serde::{Deserialize, Serialize};

/// What kind of standing subscription a registration describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionKind {
    /// BM25 full-text search subscription.
    Search,
    /// Predicate query subscription.
    Query,
}

/// `CLUSTER_SUB_REGISTER`: coordinator asks a data node to register a
/// local subscription on its behalf.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscribePayload {
    pub subscription_id: SubscriptionId,
    pub coordinator_node_id: NodeId,
    pub map_name: String,
    pub kind: SubscriptionKind,
    /// Present when `kind == Search`.
    pub search_query: Option<String>,
    pub search_options: Option<SearchOptions>,
    /// Present when `kind == Query`.
    pub query: Option<Query>,
}

/// One entry of an initial result set, as shipped between nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitialResult {
    pub key: String,
    pub value: Option<Value>,
    pub score: Option<f64>,
    pub matched_terms: Option<Vec<String>>,
}

/// `CLUSTER_SUB_ACK`: a data node acknowledges a registration, carrying
/// its initial local results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AckPayload {
    pub subscription_id: SubscriptionId,
    pub node_id: NodeId,
    pub success: bool,
    pub initial_results: Vec<InitialResult>,
    pub total_hits: Option<usize>,
    pub error: Option<String>,
}

impl AckPayload {
    /// A failure acknowledgement with no results.
    pub fn failure(
        subscription_id: SubscriptionId,
        node_id: NodeId,
        error: impl Into<String>,
    ) -> Self {
        Self {
            subscription_id,
            node_id,
            success: false,
            initial_results: Vec::new(),
            total_hits: None,
            error: Some(error.into()),
        }
    }
}

/// `CLUSTER_SUB_UPDATE`: a data node reports a delta to the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaPayload {
    pub subscription_id: SubscriptionId,
    pub source_node_id: NodeId,
    pub key: String,
    pub value: Option<Value>,
    pub score: Option<f64>,
    pub matched_terms: Option<Vec<String>>,
    pub change_type: DeltaKind,
    /// Producer-side Unix millis, for delta latency accounting.
    pub timestamp_ms: u64,
}

/// `CLUSTER_SUB_UNREGISTER`: coordinator tells data nodes to drop a
/// subscription. Fire-and-forget, idempotent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnsubscribePayload {
    pub subscription_id: SubscriptionId,
}

/// `CLUSTER_SEARCH_REQ`: one-shot search scattered to a data node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub request_id: RequestId,
    pub map_name: String,
    pub query: String,
    pub options: SearchOptions,
    pub include_matched_terms: bool,
    pub timeout_ms: u64,
}

/// `CLUSTER_SEARCH_RESP`: a data node's local results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub request_id: RequestId,
    pub node_id: NodeId,
    pub results: Vec<InitialResult>,
    pub total_hits: usize,
    pub execution_time_ms: u64,
    pub error: Option<String>,
}

/// Any subscription-related message moved between members.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClusterMessage {
    Subscribe(SubscribePayload),
    Ack(AckPayload),
    Delta(DeltaPayload),
    Unsubscribe(UnsubscribePayload),
}

impl SubscribePayload {
    /// Check the payload's internal consistency.
    pub fn validate(&self) -> Result<()> {
        if self.map_name.is_empty() {
            return Err(ClusterError::InvalidMessage("empty map name".into()));
        }
        if self.coordinator_node_id.is_empty() {
            return Err(ClusterError::InvalidMessage("empty coordinator node id".into()));
        }
        match self.kind {
            SubscriptionKind::Search => {
                if self.search_query.as_deref().unwrap_or("").is_empty() {
                    return Err(ClusterError::InvalidMessage(
                        "SEARCH subscription without a query".into(),
                    ));
                }
            }
            SubscriptionKind::Query => {
                if self.query.is_none() {
                    return Err(ClusterError::InvalidMessage(
                        "QUERY subscription without a predicate query".into(),
                    ));
                }
            }
        }
        Ok(())
    }
}

impl AckPayload {
    /// Check the payload's internal consistency.
    pub fn validate(&self) -> Result<()> {
        if self.node_id.is_empty() {
            return Err(ClusterError::InvalidMessage("ack without a node id".into()));
        }
        if !self.success && self.error.is_none() {
            return Err(ClusterError::InvalidMessage(
                "failed ack without an error message".into(),
            ));
        }
        Ok(())
    }
}

impl DeltaPayload {
    /// Check the payload's internal consistency.
    pub fn validate(&self) -> Result<()> {
        if self.key.is_empty() {
            return Err(ClusterError::InvalidMessage("delta without a key".into()));
        }
        if self.source_node_id.is_empty() {
            return Err(ClusterError::InvalidMessage("delta without a source node".into()));
        }
        Ok(())
    }
}

impl SearchRequest {
    /// Check the payload's internal consistency.
    pub fn validate(&self) -> Result<()> {
        if self.map_name.is_empty() {
            return Err(ClusterError::InvalidMessage("empty map name".into()));
        }
        if self.query.is_empty() {
            return Err(ClusterError::InvalidMessage("empty search query".into()));
        }
        if self.timeout_ms == 0 {
            return Err(ClusterError::InvalidMessage("zero search timeout".into()));
        }
        Ok(())
    }
}

impl ClusterMessage {
    /// Validate whichever payload this message carries.
    pub fn validate(&self) -> Result<()> {
        match self {
            ClusterMessage::Subscribe(p) => p.validate(),
            ClusterMessage::Ack(p) => p.validate(),
            ClusterMessage::Delta(p) => p.validate(),
            ClusterMessage::Unsubscribe(_) => Ok(()),
        }
    }

    /// Short name for logging.
    pub fn kind_name(&self) -> &'static str {
        match self {
            ClusterMessage::Subscribe(_) => "CLUSTER_SUB_REGISTER",
            ClusterMessage::Ack(_) => "CLUSTER_SUB_ACK",
            ClusterMessage::Delta(_) => "CLUSTER_SUB_UPDATE",
            ClusterMessage::Unsubscribe(_) => "CLUSTER_SUB_UNREGISTER",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn search_payload() -> SubscribePayload {
        SubscribePayload {
            subscription_id: SubscriptionId::new(),
            coordinator_node_id: NodeId::new("n1"),
            map_name: "articles".to_string(),
            kind: SubscriptionKind::Search,
            search_query: Some("hello".to_string()),
            search_options: Some(SearchOptions::default()),
            query: None,
        }
    }

    #[test]
    fn test_valid_search_payload() {
        assert!(search_payload().validate().is_ok());
    }

    #[test]
    fn test_search_payload_requires_query() {
        let mut payload = search_payload();
        payload.search_query = None;
        assert!(payload.validate().is_err());
        payload.search_query = Some(String::new());
        assert!(payload.validate().is_err());
    }

    #[test]
    fn test_query_payload_requires_predicate() {
        let mut payload = search_payload();
        payload.kind = SubscriptionKind::Query;
        assert!(payload.validate().is_err());
        payload.query = Some(Query::default());
        assert!(payload.validate().is_ok());
    }

    #[test]
    fn test_empty_map_rejected() {
        let mut payload = search_payload();
        payload.map_name.clear();
        assert!(ClusterMessage::Subscribe(payload).validate().is_err());
    }

    #[test]
    fn test_failed_ack_needs_error() {
        let mut ack = AckPayload::failure(SubscriptionId::new(), NodeId::new("n2"), "boom");
        assert!(ack.validate().is_ok());
        ack.error = None;
        assert!(ack.validate().is_err());
    }

    #[test]
    fn test_delta_validation() {
        let delta = DeltaPayload {
            subscription_id: SubscriptionId::new(),
            source_node_id: NodeId::new("n2"),
            key: String::new(),
            value: None,
            score: None,
            matched_terms: None,
            change_type: DeltaKind::Enter,
            timestamp_ms: 0,
        };
        assert!(delta.validate().is_err());
    }

    #[test]
    fn test_message_round_trip_bincode_shape() {
        // serde JSON round trip stands in for the wire codec
        let message = ClusterMessage::Subscribe(search_payload());
        let json = serde_json::to_string(&message).unwrap();
        let back: ClusterMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(message, back);
        assert_eq!(message.kind_name(), "CLUSTER_SUB_REGISTER");
    }
}
