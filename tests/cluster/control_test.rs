//! Socket control and server-side events across nodes.

use meshcast::broadcaster::Outbound;
use meshcast::{
    AdapterError, BroadcastOptions, ChannelTransport, LocalBroadcaster, Packet, Value,
};

use crate::common::{received, settle, start_cluster};

#[tokio::test]
async fn test_join_then_broadcast_to_joined_room() {
    let hub = ChannelTransport::new();
    let nodes = start_cluster(&hub, "/", 2).await;
    let mut local = nodes[0].local.connect("local");
    let mut remote = nodes[1].local.connect("remote");

    nodes[0].adapter.remote_join("local", "room1").await.unwrap();
    nodes[0].adapter.remote_join("remote", "room1").await.unwrap();

    nodes[1]
        .adapter
        .broadcast(Packet::new("/", "joined"), &BroadcastOptions::new().to("room1"))
        .await
        .unwrap();
    settle().await;

    assert_eq!(received(&mut local), vec![Value::from("joined")]);
    assert_eq!(received(&mut remote), vec![Value::from("joined")]);
}

#[tokio::test]
async fn test_remote_leave_stops_delivery() {
    let hub = ChannelTransport::new();
    let nodes = start_cluster(&hub, "/", 2).await;
    let mut remote = nodes[1].local.connect("remote");
    nodes[1].local.join("remote", "news");

    nodes[0].adapter.remote_leave("remote", "news").await.unwrap();
    nodes[0]
        .adapter
        .broadcast(Packet::new("/", "update"), &BroadcastOptions::new().to("news"))
        .await
        .unwrap();
    settle().await;

    assert!(received(&mut remote).is_empty());
}

#[tokio::test]
async fn test_remote_disconnect_of_missing_socket_times_out() {
    let hub = ChannelTransport::new();
    let nodes = start_cluster(&hub, "/", 3).await;

    let err = nodes[0]
        .adapter
        .remote_disconnect("nobody", false)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        AdapterError::Timeout {
            operation: "remoteDisconnect",
            received: 0,
            expected: 1
        }
    ));
}

#[tokio::test]
async fn test_disconnect_room_across_cluster() {
    let hub = ChannelTransport::new();
    let nodes = start_cluster(&hub, "/", 3).await;
    let mut kicked = Vec::new();
    for (i, node) in nodes.iter().enumerate() {
        let id = format!("k{i}");
        kicked.push(node.local.connect(id.as_str()));
        node.local.join(&id, "banned");
        let _ = node.local.connect(format!("ok{i}"));
    }

    nodes[2]
        .adapter
        .disconnect_sockets(&BroadcastOptions::new().to("banned"), true)
        .await
        .unwrap();
    settle().await;

    for (i, node) in nodes.iter().enumerate() {
        assert!(!node.local.has_socket(&format!("k{i}")));
        assert!(node.local.has_socket(&format!("ok{i}")));
        assert!(!node.local.has_room("banned"));
    }
    for rx in kicked.iter_mut() {
        assert!(matches!(rx.try_recv(), Ok(Outbound::Disconnect { close: true })));
    }
}

#[tokio::test]
async fn test_add_sockets_then_query_room() {
    let hub = ChannelTransport::new();
    let nodes = start_cluster(&hub, "/", 2).await;
    let _a = nodes[0].local.connect("a");
    let _b = nodes[1].local.connect("b");

    nodes[1]
        .adapter
        .add_sockets(&BroadcastOptions::new(), &["everyone".to_string()])
        .await
        .unwrap();
    settle().await;

    let members = nodes[0]
        .adapter
        .sockets(&["everyone".to_string()].into_iter().collect())
        .await
        .unwrap();
    assert_eq!(members.len(), 2);
}

#[tokio::test]
async fn test_server_side_emit_with_ack_from_every_peer() {
    let hub = ChannelTransport::new();
    let nodes = start_cluster(&hub, "/", 4).await;
    for (i, node) in nodes.iter().enumerate().skip(1) {
        let mut events = node.local.take_server_events().unwrap();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                assert_eq!(event.args, vec![Value::from("status?")]);
                if let Some(reply) = event.reply {
                    let _ = reply.send(Value::from(i as i64));
                }
            }
        });
    }

    let mut replies: Vec<i64> = nodes[0]
        .adapter
        .server_side_emit_with_ack(vec![Value::from("status?")])
        .await
        .unwrap()
        .iter()
        .filter_map(Value::as_i64)
        .collect();
    replies.sort();

    assert_eq!(replies, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_closed_node_leaves_cluster() {
    let hub = ChannelTransport::new();
    let nodes = start_cluster(&hub, "/", 2).await;
    let _rx = nodes[1].local.connect("gone");

    nodes[1].adapter.close();
    settle().await;

    let sockets = nodes[0]
        .adapter
        .sockets(&Default::default())
        .await
        .unwrap();
    assert!(sockets.is_empty());
    assert!(nodes[1].local.has_socket("gone"));
}
