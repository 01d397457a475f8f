//! Standalone cluster node binary.
//!
//! Run with: cargo run --bin livequery-node -- --id n1 --listen 127.0.0.1:7401

use livequery_cluster::rpc::{ClientConfig, NodeServer, RpcTransport};
use livequery_cluster::{ClusterConfig, ClusterNode, MemberInfo};
use livequery_core::{NodeId, NullMetrics};
use std::env;
use std::net::SocketAddr;
use std::sync::Arc;

fn print_usage() {
    println!("livequery cluster node");
    println!();
    println!("Usage: livequery-node --id <node-id> --listen <host:port> [options]");
    println!();
    println!("Options:");
    println!("  --id ID              This node's identifier (required)");
    println!("  --listen ADDR        Address to serve cluster RPC on (required)");
    println!("  --peer ID=ADDR       A peer node (repeatable)");
    println!("  --ack-timeout MS     ACK gather timeout (default: 5000)");
    println!();
    println!("Examples:");
    println!("  livequery-node --id n1 --listen 127.0.0.1:7401");
    println!("  livequery-node --id n2 --listen 127.0.0.1:7402 --peer n1=127.0.0.1:7401");
}

struct NodeArgs {
    id: String,
    listen: SocketAddr,
    peers: Vec<(String, SocketAddr)>,
    config: ClusterConfig,
}

fn parse_args(args: &[String]) -> Option<NodeArgs> {
    let mut id = None;
    let mut listen = None;
    let mut peers = Vec::new();
    let mut config = ClusterConfig::default();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--id" => {
                if i + 1 < args.len() {
                    id = Some(args[i + 1].clone());
                    i += 1;
                }
            }
            "--listen" => {
                if i + 1 < args.len() {
                    listen = args[i + 1].parse().ok();
                    i += 1;
                }
            }
            "--peer" => {
                if i + 1 < args.len() {
                    if let Some((peer_id, addr)) = args[i + 1].split_once('=') {
                        if let Ok(addr) = addr.parse() {
                            peers.push((peer_id.to_string(), addr));
                        }
                    }
                    i += 1;
                }
            }
            "--ack-timeout" => {
                if i + 1 < args.len() {
                    config.ack_timeout_ms = args[i + 1].parse().unwrap_or(config.ack_timeout_ms);
                    i += 1;
                }
            }
            _ => {}
        }
        i += 1;
    }

    Some(NodeArgs {
        id: id?,
        listen: listen?,
        peers,
        config,
    })
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let Some(parsed) = parse_args(&args) else {
        print_usage();
        std::process::exit(2);
    };

    let transport = Arc::new(RpcTransport::new(ClientConfig::default()));
    for (peer_id, addr) in &parsed.peers {
        transport.add_peer(NodeId::new(peer_id.clone()), *addr).await;
    }

    let node = ClusterNode::new(
        NodeId::new(parsed.id.clone()),
        parsed.listen.to_string(),
        parsed.config,
        transport,
        Arc::new(NullMetrics),
    );
    for (peer_id, addr) in &parsed.peers {
        node.member_joined(MemberInfo::new(
            NodeId::new(peer_id.clone()),
            addr.to_string(),
        ))
        .await;
    }

    let server = NodeServer::new(node);
    if let Err(error) = server.start(parsed.listen).await {
        eprintln!("node server failed: {}", error);
        std::process::exit(1);
    }
}
