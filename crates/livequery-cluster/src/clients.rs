//! Client socket registry.
//!
//! The connection layer owns sockets; this registry only maps client ids
//! to their sinks so subscription machinery can address them. A send to a
//! closed or missing sink is logged and dropped, never an error that
//! mutates subscription state.

use livequery_core::{ClientFrame, ClientId, ClientSink};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Connected clients of this node.
#[derive(Default)]
pub struct ClientRegistry {
    sinks: RwLock<HashMap<ClientId, Arc<dyn ClientSink>>>,
}

impl ClientRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a client's sink.
    pub async fn register(&self, client_id: ClientId, sink: Arc<dyn ClientSink>) {
        self.sinks.write().await.insert(client_id, sink);
    }

    /// Detach a client.
    pub async fn unregister(&self, client_id: &ClientId) -> bool {
        self.sinks.write().await.remove(client_id).is_some()
    }

    /// Number of attached clients.
    pub async fn count(&self) -> usize {
        self.sinks.read().await.len()
    }

    /// Send a frame to one client; returns whether it was handed to the
    /// sink.
    pub async fn send(&self, client_id: &ClientId, frame: ClientFrame) -> bool {
        let sink = self.sinks.read().await.get(client_id).cloned();
        let Some(sink) = sink else {
            debug!(%client_id, "dropping frame for unknown client");
            return false;
        };
        if !sink.is_open() {
            warn!(%client_id, "dropping frame: client socket not open");
            return false;
        }
        if let Err(error) = sink.send(frame).await {
            warn!(%client_id, %error, "client send failed; frame dropped");
            return false;
        }
        true
    }
}
