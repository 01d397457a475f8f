//! # livequery
//!
//! A cluster-aware live full-text search and live predicate-query engine
//! layered over a replicated key/value store. Clients register standing
//! queries (a BM25 text query or a structured predicate) against a named
//! map; the engine returns an initial ranked or filtered result set and
//! then streams `ENTER` / `UPDATE` / `LEAVE` deltas whenever data changes
//! on any node of the cluster.
//!
//! ## Quick start (single node)
//!
//! ```rust,ignore
//! use livequery::prelude::*;
//! use std::sync::Arc;
//!
//! # #[tokio::main] async fn main() -> livequery::cluster::Result<()> {
//! let transport = Arc::new(LoopbackTransport::new());
//! let node = ClusterNode::new(
//!     NodeId::new("n1"),
//!     "127.0.0.1:7401",
//!     ClusterConfig::default(),
//!     transport.clone(),
//!     Arc::new(NullMetrics),
//! );
//! transport.attach(node.clone()).await;
//!
//! node.enable_search("articles", SearchConfig::new(["title", "body"])).await?;
//! node.write_record("articles", "a", [
//!     ("title".to_string(), Value::from("Hello World")),
//! ].into_iter().collect()).await?;
//!
//! let found = node.search("articles", "hello", SearchOptions::default(), None).await?;
//! assert_eq!(found.results[0].key, "a");
//! # Ok(()) }
//! ```
//!
//! ## Architecture
//!
//! The workspace is organized into four crates:
//!
//! - [`core`] - shared types: the tagged value sum, records, frames, and
//!   the collaborator traits (record access, client sockets, metrics)
//! - [`text`] - tokenizer with Porter stemming, inverted index, BM25
//!   scoring, and the incrementally maintained multi-field index
//! - [`engine`] - per-node runtime: predicate queries with a reverse-
//!   indexed standing-query registry, the live search coordinator, and
//!   notification batching
//! - [`cluster`] - distributed coordination: scatter-gather subscription
//!   registration with ACK tracking, Reciprocal Rank Fusion merging,
//!   one-shot cluster search with cursors, and the tarpc transport

pub use livequery_cluster as cluster;
pub use livequery_core as core;
pub use livequery_engine as engine;
pub use livequery_text as text;

/// The commonly used surface, re-exported flat.
pub mod prelude {
    pub use livequery_cluster::{
        ClusterConfig, ClusterNode, ClusterSearchResult, LoopbackTransport, MemberInfo,
        SubscribeOutcome,
    };
    pub use livequery_core::{
        ChangeType, ClientFrame, ClientId, ClientSink, DeltaKind, MetricsSink, NodeId,
        NullMetrics, Record, RecordSource, SubscriptionId, Value,
    };
    pub use livequery_engine::{Predicate, Query, SearchConfig, SortKey};
    pub use livequery_text::{Bm25Params, SearchOptions, TokenizerConfig};
}
