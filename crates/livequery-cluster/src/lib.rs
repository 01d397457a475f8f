//! # livequery-cluster
//!
//! Cluster-wide coordination for live subscriptions and one-shot search.
//!
//! A subscription originates on its **coordinator node** (the node holding
//! the client's socket). The coordinator registers locally, scatters the
//! subscription to every other member, gathers acknowledgements with
//! initial results under a bounded timeout, merges (Reciprocal Rank
//! Fusion for text search, key deduplication for predicate queries) and
//! then forwards per-node deltas to the client as they arrive. One-shot
//! distributed search uses the same scatter-gather skeleton with cursor
//! pagination instead of standing state.
//!
//! The transport is pluggable: a tarpc TCP binding for real clusters and
//! an in-process loopback for tests and embedded use.

pub mod clients;
pub mod config;
pub mod coordinator;
pub mod cursor;
pub mod engine;
pub mod error;
pub mod membership;
pub mod messages;
pub mod node;
pub mod rpc;
pub mod rrf;
pub mod search;
pub mod transport;

pub use clients::ClientRegistry;
pub use config::ClusterConfig;
pub use coordinator::{
    DistributedSubscription, ResultEntry, SubscribeOutcome, SubscriptionCoordinator,
    SubscriptionState,
};
pub use cursor::{decode_cursor, encode_cursor, query_fingerprint, Cursor};
pub use engine::LocalEngine;
pub use error::{ClusterError, Result};
pub use membership::{MemberInfo, MemberRegistry, MemberStatus};
pub use messages::{
    AckPayload, ClusterMessage, DeltaPayload, InitialResult, SearchRequest, SearchResponse,
    SubscribePayload, SubscriptionKind, UnsubscribePayload,
};
pub use node::ClusterNode;
pub use rrf::rrf_merge;
pub use search::{ClusterSearch, ClusterSearchResult};
pub use transport::{ClusterTransport, LoopbackTransport, MessageEndpoint};
