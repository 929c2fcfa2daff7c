//! Wire compatibility with peers that speak the protocol directly.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::sync::mpsc;

use meshcast::bus::{MessageHandler, Topic, Transport};
use meshcast::{decode, encode, ChannelTransport, LocalBroadcaster, Value};

use crate::common::{received, settle, start_cluster};

/// Forwards every delivery to a channel.
struct Capture {
    tx: mpsc::UnboundedSender<(String, Bytes)>,
}

impl MessageHandler for Capture {
    fn handle(&self, channel: String, payload: Bytes) -> BoxFuture<'static, ()> {
        let _ = self.tx.send((channel, payload));
        Box::pin(async {})
    }
}

async fn capture(
    transport: &ChannelTransport,
    topic: Topic,
) -> (
    meshcast::bus::Subscription,
    mpsc::UnboundedReceiver<(String, Bytes)>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let subscription = transport
        .subscribe(vec![topic], Arc::new(Capture { tx }))
        .await
        .unwrap();
    (subscription, rx)
}

#[tokio::test]
async fn test_json_request_gets_encoded_response() {
    let hub = ChannelTransport::new();
    let nodes = start_cluster(&hub, "/", 1).await;
    let _rx = nodes[0].local.connect("s1");
    nodes[0].local.join("s1", "lobby");

    let peer = hub.connect();
    let (_sub, mut responses) =
        capture(&peer, Topic::Channel("adapter-response#/#".to_string())).await;

    let request = r#"{"type":0,"uid":"legacy-node","requestId":"abc","rooms":["lobby"]}"#;
    peer.publish("adapter-request#/#", Bytes::from_static(request.as_bytes()))
        .await
        .unwrap();

    let (_, payload) = tokio::time::timeout(Duration::from_secs(1), responses.recv())
        .await
        .unwrap()
        .unwrap();
    let response = decode(&payload).unwrap();

    assert_eq!(response.get("type"), Some(&Value::from(0i64)));
    assert_eq!(response.get("requestId"), Some(&Value::from("abc")));
    assert_eq!(
        response.get("sockets"),
        Some(&Value::Array(vec![Value::from("s1")]))
    );
}

#[tokio::test]
async fn test_hand_encoded_broadcast_is_delivered() {
    let hub = ChannelTransport::new();
    let nodes = start_cluster(&hub, "/", 1).await;
    let mut rx = nodes[0].local.connect("s1");
    nodes[0].local.join("s1", "room1");

    let envelope = Value::Array(vec![
        Value::from("foreign-uid"),
        Value::map([
            ("type", Value::from(2i64)),
            ("nsp", Value::from("/")),
            ("data", Value::Array(vec![Value::from("event"), Value::from(1.5)])),
        ]),
        Value::map([
            ("rooms", Value::Array(vec![Value::from("room1")])),
            ("except", Value::Array(vec![])),
            ("flags", Value::map([("local", Value::from(false))])),
        ]),
    ]);

    hub.connect()
        .publish("adapter#/#room1#", encode(&envelope).unwrap())
        .await
        .unwrap();
    settle().await;

    assert_eq!(
        received(&mut rx),
        vec![Value::Array(vec![Value::from("event"), Value::from(1.5)])]
    );
}

#[tokio::test]
async fn test_broadcast_wire_layout() {
    let hub = ChannelTransport::new();
    let nodes = start_cluster(&hub, "/", 1).await;
    let (_sub, mut captured) = capture(&hub, Topic::Pattern("adapter#/#*".to_string())).await;

    nodes[0]
        .adapter
        .broadcast(
            meshcast::Packet::new("/", "hello"),
            &meshcast::BroadcastOptions::new().to("r"),
        )
        .await
        .unwrap();

    let (channel, payload) = tokio::time::timeout(Duration::from_secs(1), captured.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(channel, "adapter#/#r#");

    let parts = decode(&payload).unwrap().into_array().unwrap();
    assert_eq!(parts.len(), 3);
    assert_eq!(parts[0], Value::from(nodes[0].adapter.uid()));
    assert_eq!(parts[1].get("nsp"), Some(&Value::from("/")));
    assert_eq!(parts[1].get("data"), Some(&Value::from("hello")));
    assert_eq!(
        parts[2].get("rooms"),
        Some(&Value::Array(vec![Value::from("r")]))
    );
}
