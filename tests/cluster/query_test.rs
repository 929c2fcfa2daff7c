//! Cluster-wide queries.

use std::collections::HashSet;
use std::sync::Arc;

use meshcast::{AdapterError, BroadcastOptions, ChannelTransport, LocalBroadcaster, Value};

use crate::common::{start_cluster, start_node, test_config};

fn set(items: &[&str]) -> HashSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_sockets_in_room_across_cluster() {
    let hub = ChannelTransport::new();
    let nodes = start_cluster(&hub, "/", 3).await;
    let _rx: Vec<_> = ["a", "b", "c", "d"]
        .iter()
        .enumerate()
        .map(|(i, id)| nodes[i % 3].local.connect(*id))
        .collect();
    nodes[0].local.join("a", "team");
    nodes[1].local.join("b", "team");
    nodes[0].local.join("d", "team");

    let team = nodes[2].adapter.sockets(&set(&["team"])).await.unwrap();

    assert_eq!(team, set(&["a", "b", "d"]));
}

#[tokio::test]
async fn test_all_rooms_includes_every_node() {
    let hub = ChannelTransport::new();
    let nodes = start_cluster(&hub, "/", 2).await;
    let _a = nodes[0].local.connect("a");
    let _b = nodes[1].local.connect("b");
    nodes[1].local.join("b", "lobby");

    let rooms = nodes[0].adapter.all_rooms().await.unwrap();

    assert_eq!(rooms, set(&["a", "b", "lobby"]));
}

#[tokio::test]
async fn test_fetch_sockets_carries_descriptors() {
    let hub = ChannelTransport::new();
    let nodes = start_cluster(&hub, "/", 2).await;
    let handshake = Value::map([
        ("address", Value::from("10.0.0.7")),
        ("secure", Value::from(true)),
    ]);
    let _rx = nodes[1]
        .local
        .connect_with("remote", handshake.clone(), Value::from(99i64));
    nodes[1].local.join("remote", "vip");

    let fetched = nodes[0]
        .adapter
        .fetch_sockets(&BroadcastOptions::new().to("vip"))
        .await
        .unwrap();

    assert_eq!(fetched.len(), 1);
    assert_eq!(fetched[0].id, "remote");
    assert_eq!(fetched[0].handshake, handshake);
    assert_eq!(fetched[0].data, Value::from(99i64));
    let rooms: HashSet<String> = fetched[0].rooms.iter().cloned().collect();
    assert_eq!(rooms, set(&["remote", "vip"]));
}

#[tokio::test]
async fn test_query_times_out_when_a_member_is_unresponsive() {
    let hub = ChannelTransport::new();
    let config = meshcast::AdapterConfig {
        requests_timeout_ms: 100,
        ..test_config()
    };
    let node = start_node(Arc::new(hub.connect()), "/", &config).await;

    // A bare subscriber on the request channel counts as a member but never answers.
    let silent = hub.connect();
    let _subscription = {
        use meshcast::bus::{MessageHandler, Topic, Transport};

        struct Ignore;
        impl MessageHandler for Ignore {
            fn handle(
                &self,
                _channel: String,
                _payload: bytes::Bytes,
            ) -> futures::future::BoxFuture<'static, ()> {
                Box::pin(async {})
            }
        }

        silent
            .subscribe(
                vec![Topic::Channel(node.adapter.channels().request.clone())],
                Arc::new(Ignore),
            )
            .await
            .unwrap()
    };

    let err = node.adapter.all_rooms().await.unwrap_err();

    assert!(matches!(
        err,
        AdapterError::Timeout {
            received: 1,
            expected: 2,
            ..
        }
    ));
    assert_eq!(node.adapter.pending_requests().await, 0);
}
