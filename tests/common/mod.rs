//! Shared utilities for integration tests.
//!
//! Builds clusters of adapters that share one transport.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use meshcast::broadcaster::Outbound;
use meshcast::bus::Transport;
use meshcast::{AdapterConfig, ChannelTransport, ClusterAdapter, MemoryBroadcaster, Value};

/// One cluster member: the adapter and the broadcaster it wraps.
pub struct Node {
    pub adapter: ClusterAdapter,
    pub local: Arc<MemoryBroadcaster>,
}

/// Adapter configuration with a short request timeout.
pub fn test_config() -> AdapterConfig {
    AdapterConfig {
        requests_timeout_ms: 500,
        ..Default::default()
    }
}

/// Start a node for `nsp` on the given transport.
pub async fn start_node(transport: Arc<dyn Transport>, nsp: &str, config: &AdapterConfig) -> Node {
    let local = Arc::new(MemoryBroadcaster::new(nsp));
    let adapter = ClusterAdapter::new(local.clone(), transport, config)
        .await
        .expect("Failed to start adapter");
    Node { adapter, local }
}

/// Start `size` nodes for `nsp` on one shared channel hub.
pub async fn start_cluster(hub: &ChannelTransport, nsp: &str, size: usize) -> Vec<Node> {
    let config = test_config();
    let mut nodes = Vec::with_capacity(size);
    for _ in 0..size {
        nodes.push(start_node(Arc::new(hub.connect()), nsp, &config).await);
    }
    nodes
}

/// Give relayed messages time to arrive.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

/// Drain a socket's outbound queue, returning the packet payloads.
pub fn received(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<Value> {
    let mut out = Vec::new();
    while let Ok(item) = rx.try_recv() {
        if let Outbound::Packet { packet, .. } = item {
            out.push(packet.data);
        }
    }
    out
}
