//! Broadcast delivery across nodes.

use std::time::Duration;

use meshcast::broadcaster::Outbound;
use meshcast::{AckEvent, BroadcastOptions, ChannelTransport, LocalBroadcaster, Packet, Value};

use crate::common::{received, settle, start_cluster};

#[tokio::test]
async fn test_room_broadcast_reaches_members_on_all_nodes() {
    let hub = ChannelTransport::new();
    let nodes = start_cluster(&hub, "/", 3).await;

    let mut members = Vec::new();
    let mut others = Vec::new();
    for (i, node) in nodes.iter().enumerate() {
        members.push(node.local.connect(format!("member{i}")));
        others.push(node.local.connect(format!("other{i}")));
        node.local.join(&format!("member{i}"), "game");
    }

    nodes[1]
        .adapter
        .broadcast(Packet::new("/", "start"), &BroadcastOptions::new().to("game"))
        .await
        .unwrap();
    settle().await;

    for rx in members.iter_mut() {
        assert_eq!(received(rx), vec![Value::from("start")]);
    }
    for rx in others.iter_mut() {
        assert!(received(rx).is_empty());
    }
}

#[tokio::test]
async fn test_broadcast_to_several_rooms_delivers_once_per_socket() {
    let hub = ChannelTransport::new();
    let nodes = start_cluster(&hub, "/", 2).await;
    let mut rx = nodes[1].local.connect("s1");
    nodes[1].local.join("s1", "a");
    nodes[1].local.join("s1", "b");

    nodes[0]
        .adapter
        .broadcast(
            Packet::new("/", 42i64),
            &BroadcastOptions::new().to("a").to("b"),
        )
        .await
        .unwrap();
    settle().await;

    assert_eq!(received(&mut rx), vec![Value::from(42i64)]);
}

#[tokio::test]
async fn test_broadcast_except_socket_id() {
    let hub = ChannelTransport::new();
    let nodes = start_cluster(&hub, "/", 2).await;
    let mut sender = nodes[0].local.connect("sender");
    let mut peer = nodes[1].local.connect("peer");

    nodes[0]
        .adapter
        .broadcast(
            Packet::new("/", "hi"),
            &BroadcastOptions::new().except("sender"),
        )
        .await
        .unwrap();
    settle().await;

    assert!(received(&mut sender).is_empty());
    assert_eq!(received(&mut peer), vec![Value::from("hi")]);
}

#[tokio::test]
async fn test_namespaces_are_isolated() {
    let hub = ChannelTransport::new();
    let chat = start_cluster(&hub, "/chat", 2).await;
    let admin = start_cluster(&hub, "/admin", 1).await;
    let mut chat_rx = chat[1].local.connect("c");
    let mut admin_rx = admin[0].local.connect("a");

    chat[0]
        .adapter
        .broadcast(Packet::new("/chat", "msg"), &BroadcastOptions::new())
        .await
        .unwrap();
    settle().await;

    assert_eq!(received(&mut chat_rx).len(), 1);
    assert!(received(&mut admin_rx).is_empty());
    assert_eq!(chat[0].adapter.server_count().await.unwrap(), 2);
    assert_eq!(admin[0].adapter.server_count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_broadcast_with_ack_collects_from_cluster() {
    let hub = ChannelTransport::new();
    let nodes = start_cluster(&hub, "/", 3).await;

    for (i, node) in nodes.iter().enumerate() {
        let mut rx = node.local.connect(format!("s{i}"));
        tokio::spawn(async move {
            while let Some(item) = rx.recv().await {
                if let Outbound::Packet { ack: Some(ack), .. } = item {
                    let _ = ack.send(Value::from(i as i64));
                }
            }
        });
    }

    let opts = BroadcastOptions::new().timeout(Duration::from_millis(300));
    let mut stream = nodes[0]
        .adapter
        .broadcast_with_ack(Packet::new("/", "ping"), &opts)
        .await
        .unwrap();

    let mut total = 0;
    let mut acks = Vec::new();
    while let Some(event) = stream.recv().await {
        match event {
            AckEvent::ClientCount(n) => total += n,
            AckEvent::Ack(v) => acks.push(v.as_i64().unwrap()),
        }
    }
    acks.sort();

    assert_eq!(total, 3);
    assert_eq!(acks, vec![0, 1, 2]);
    assert_eq!(nodes[0].adapter.pending_acks().await, 0);
}
