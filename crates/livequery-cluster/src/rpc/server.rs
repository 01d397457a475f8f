//! tarpc server exposing a node to its peers.

use crate::node::ClusterNode;
use crate::rpc::protocol::{NodeService, RpcResult};
use crate::transport::MessageEndpoint;
use crate::messages::{ClusterMessage, SearchRequest, SearchResponse};
use futures::StreamExt;
use livequery_core::{unix_millis, NodeId};
use std::net::SocketAddr;
use std::sync::Arc;
use tarpc::context::Context;
use tarpc::server::{self, Channel};
use tokio_serde::formats::Bincode;
use tracing::{debug, info, instrument};

/// Serves a [`ClusterNode`] over tarpc TCP with bincode framing.
#[derive(Clone)]
pub struct NodeServer {
    node: Arc<ClusterNode>,
}

impl NodeServer {
    /// Wrap a node for serving.
    pub fn new(node: Arc<ClusterNode>) -> Self {
        Self { node }
    }

    /// Listen on `addr` and serve peers until the task is dropped.
    ///
    /// Each connection gets its own handler task; concurrency per
    /// listener is bounded so one noisy peer cannot starve the rest.
    pub async fn start(self, addr: SocketAddr) -> Result<(), std::io::Error> {
        let listener = tarpc::serde_transport::tcp::listen(&addr, Bincode::default).await?;
        info!(node = %self.node.node_id(), %addr, "cluster RPC listening");

        listener
            .filter_map(|conn| futures::future::ready(conn.ok()))
            .map(server::BaseChannel::with_defaults)
            .for_each_concurrent(16, |channel| {
                let server = self.clone();
                async move {
                    channel
                        .execute(server.serve())
                        .for_each(|handler| async {
                            tokio::spawn(handler);
                        })
                        .await;
                }
            })
            .await;

        Ok(())
    }
}

impl NodeService for NodeServer {
    #[instrument(skip(self, _ctx, message), fields(kind = message.kind_name()))]
    async fn deliver(self, _ctx: Context, message: ClusterMessage) -> RpcResult<()> {
        debug!("inbound cluster message");
        // sender identity rides in the payload; validation happens in the
        // node's dispatch
        let sender = NodeId::new("");
        self.node.handle_message(sender, message).await;
        Ok(())
    }

    #[instrument(skip(self, _ctx, request), fields(map = %request.map_name, query = %request.query))]
    async fn search(self, _ctx: Context, request: SearchRequest) -> RpcResult<SearchResponse> {
        debug!("inbound cluster search");
        Ok(self.node.handle_search(request).await)
    }

    #[instrument(skip(self, _ctx))]
    async fn ping(self, _ctx: Context, sender: NodeId) -> RpcResult<u64> {
        self.node.members().write().await.heartbeat(&sender);
        Ok(unix_millis())
    }
}
