//! Client-facing frames.
//!
//! Frames are what the connection layer writes to a client socket when a
//! subscription's result set changes. They serialize as tagged camelCase
//! JSON so any transport can relay them verbatim.

use crate::types::{DeltaKind, SubscriptionId};
use crate::value::Value;
use serde::{Deserialize, Serialize};

/// Kind carried by a `QUERY_UPDATE` frame.
///
/// Distributed query subscriptions use `ENTER`/`UPDATE`/`LEAVE`; the
/// single-map predicate path uses the `UPDATE`/`REMOVE` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryUpdateKind {
    Enter,
    Update,
    Leave,
    Remove,
}

/// Payload of a `SEARCH_UPDATE` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchUpdatePayload {
    pub subscription_id: SubscriptionId,
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    pub score: f64,
    pub matched_terms: Vec<String>,
    pub change_type: DeltaKind,
}

/// Payload of a `QUERY_UPDATE` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryUpdatePayload {
    pub query_id: SubscriptionId,
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(rename = "type")]
    pub kind: QueryUpdateKind,
}

/// An outbound frame destined for a client socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ClientFrame {
    /// Delta on a live full-text search subscription.
    #[serde(rename = "SEARCH_UPDATE")]
    SearchUpdate(SearchUpdatePayload),
    /// Batched deltas on live full-text search subscriptions, flushed on
    /// the notification timer.
    #[serde(rename = "SEARCH_UPDATE_BATCH")]
    SearchUpdateBatch(Vec<SearchUpdatePayload>),
    /// Delta on a live predicate-query subscription.
    #[serde(rename = "QUERY_UPDATE")]
    QueryUpdate(QueryUpdatePayload),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_update_wire_shape() {
        let frame = ClientFrame::SearchUpdate(SearchUpdatePayload {
            subscription_id: SubscriptionId::new(),
            key: "a".to_string(),
            value: None,
            score: 1.5,
            matched_terms: vec!["hello".to_string()],
            change_type: DeltaKind::Enter,
        });

        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "SEARCH_UPDATE");
        assert_eq!(json["payload"]["key"], "a");
        assert_eq!(json["payload"]["changeType"], "ENTER");
        assert_eq!(json["payload"]["matchedTerms"][0], "hello");
        // absent value must not appear on the wire
        assert!(json["payload"].get("value").is_none());
    }

    #[test]
    fn test_query_update_wire_shape() {
        let frame = ClientFrame::QueryUpdate(QueryUpdatePayload {
            query_id: SubscriptionId::new(),
            key: "k".to_string(),
            value: Some(Value::Int(5)),
            kind: QueryUpdateKind::Remove,
        });

        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "QUERY_UPDATE");
        assert_eq!(json["payload"]["type"], "REMOVE");
    }

    #[test]
    fn test_frame_round_trip() {
        let frame = ClientFrame::QueryUpdate(QueryUpdatePayload {
            query_id: SubscriptionId::new(),
            key: "k".to_string(),
            value: None,
            kind: QueryUpdateKind::Enter,
        });
        let json = serde_json::to_string(&frame).unwrap();
        let back: ClientFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(frame, back);
    }
}
