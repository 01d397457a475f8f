//! # livequery-engine
//!
//! The per-node runtime of the livequery system: structured predicate
//! queries with an efficiently reverse-indexed standing-query registry,
//! the live full-text [`SearchCoordinator`], notification batching, and
//! the per-key write serialization used by read-modify-write callers.
//!
//! Everything in this crate computes deltas synchronously with respect to
//! a data change; delivery (client sockets, cluster messages) happens
//! behind injected sinks so no component here ever suspends while holding
//! index state.

pub mod batch;
pub mod error;
pub mod keylock;
pub mod predicate;
pub mod query;
pub mod registry;
pub mod search;
pub mod store;

pub use batch::{spawn_delta_pump, BatchOptions, ChannelSink, DeltaDelivery, DeltaReceiver};
pub use error::{EngineError, Result};
pub use keylock::KeyLocks;
pub use predicate::Predicate;
pub use query::{execute_query, Query, SortKey};
pub use registry::{QueryDelta, QueryDeltaKind, QueryNotification, StandingQueryRegistry};
pub use search::{
    DeltaRoute, InitialHit, SearchConfig, SearchCoordinator, SearchDelta, SearchDeltaSink,
    SearchPage,
};
pub use store::{MemoryCatalog, MemoryMap};
