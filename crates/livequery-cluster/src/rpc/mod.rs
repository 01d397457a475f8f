//! tarpc TCP binding of the cluster transport.
//!
//! Three pieces, mirroring the service/server/client split:
//! [`protocol`] declares the `NodeService` trait, [`server`] exposes a
//! [`crate::node::ClusterNode`] on a socket, and [`client`] maintains a
//! pool of connections implementing [`crate::transport::ClusterTransport`].

pub mod client;
pub mod protocol;
pub mod server;

pub use client::{connect_to_node, ClientConfig, RpcTransport};
pub use protocol::{NodeService, NodeServiceClient, RpcError, RpcResult};
pub use server::NodeServer;
