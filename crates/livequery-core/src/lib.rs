//! # livequery-core
//!
//! Shared types for the livequery engine: identifiers, the tagged [`Value`]
//! sum used at the data boundary, record change descriptions, client-facing
//! frames, and the collaborator traits (record access, client sockets,
//! metrics) that the engine consumes but does not implement.

pub mod error;
pub mod frames;
pub mod metrics;
pub mod sink;
pub mod source;
pub mod types;
pub mod value;

pub use error::SinkError;
pub use frames::{ClientFrame, QueryUpdateKind, QueryUpdatePayload, SearchUpdatePayload};
pub use metrics::{MetricsSink, NullMetrics};
pub use sink::ClientSink;
pub use source::{RecordCatalog, RecordSource};
pub use types::{unix_millis, ChangeType, ClientId, DeltaKind, NodeId, RequestId, SubscriptionId};
pub use value::{changed_fields, record_to_value, FieldChanges, Record, Value};
