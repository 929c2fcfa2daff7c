//! meshcast-node: standalone cluster member
//!
//! Joins a cluster with an empty in-memory broadcaster. Logs server-side
//! events it receives, acknowledges them with its uid, and periodically
//! reports how many nodes share the namespace. Useful for checking that a
//! transport is wired up before embedding the adapter in a real server.
//!
//! ## Configuration
//! - MESHCAST_CONFIG: Path to a YAML config file (optional)
//! - MESHCAST__TRANSPORT__TYPE: `channel` or `redis`
//! - MESHCAST_NAMESPACE: Namespace to join (default: "/")
//! - MESHCAST_LOG: Log filter (default: "info")

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use meshcast::broadcaster::DEFAULT_NAMESPACE;
use meshcast::utils::bootstrap::init_tracing;
use meshcast::{init_transport, ClusterAdapter, Config, MemoryBroadcaster, Value};

const REPORT_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    init_tracing();

    let config = Config::load(None)?;
    let nsp = std::env::var("MESHCAST_NAMESPACE").unwrap_or_else(|_| DEFAULT_NAMESPACE.to_string());

    let transport = init_transport(&config.transport).await?;
    let local = Arc::new(MemoryBroadcaster::new(nsp.as_str()));
    let mut events = local
        .take_server_events()
        .ok_or("server-side events already taken")?;
    let adapter = ClusterAdapter::new(local.clone(), transport, &config.adapter).await?;

    info!(uid = %adapter.uid(), nsp = %nsp, "meshcast-node started");

    let uid = adapter.uid().to_string();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            info!(args = ?event.args, "Server-side event received");
            if let Some(reply) = event.reply {
                let _ = reply.send(Value::from(uid.as_str()));
            }
        }
    });

    let mut ticker = tokio::time::interval(REPORT_INTERVAL);
    loop {
        tokio::select! {
            _ = ticker.tick() => match adapter.server_count().await {
                Ok(count) => info!(servers = count, "Cluster size"),
                Err(e) => warn!(error = %e, "Failed to count servers"),
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    adapter.close();
    info!("meshcast-node stopped");
    Ok(())
}
