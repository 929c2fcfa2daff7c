//! Cluster adapter.
//!
//! Wraps a [`LocalBroadcaster`] so that several processes act as one
//! broadcaster. Every operation runs locally and is relayed to peer adapters
//! over a [`Transport`]:
//! - broadcasts go out on a broadcast channel and are replayed by peers
//! - queries and control operations go out on a request channel; peers answer
//!   on a response channel and the answers are merged here
//!
//! Each node stamps its messages with a random uid and ignores its own echo.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use serde::Deserialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::broadcaster::{
    AckEvent, BroadcastOptions, LocalBroadcaster, Packet, Room, ServerSideEvent, SocketDescriptor,
    SocketId,
};
use crate::bus::{BusError, MessageHandler, Subscription, Topic, Transport};
use crate::codec::{self, DecodeError, EncodeError, Value};
use crate::utils::short_id;

mod channels;
pub mod message;
pub mod tracker;

pub use channels::Channels;
pub use message::{
    BroadcastEnvelope, MessageError, RawResponse, Request, RequestEnvelope, RequestType, Response,
};
pub use tracker::{AckTracker, Expired, Gathered, RequestTracker};

// ============================================================================
// Configuration
// ============================================================================

/// Cluster adapter configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// Prefix of every channel name.
    pub key: String,
    /// How long to wait for peer responses, in milliseconds.
    pub requests_timeout_ms: u64,
    /// Answer each requester on its own response channel instead of the shared one.
    pub publish_on_specific_response_channel: bool,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            key: "adapter".to_string(),
            requests_timeout_ms: 5000,
            publish_on_specific_response_channel: false,
        }
    }
}

impl AdapterConfig {
    pub fn requests_timeout(&self) -> Duration {
        Duration::from_millis(self.requests_timeout_ms)
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Result type for adapter operations.
pub type Result<T> = std::result::Result<T, AdapterError>;

/// Errors that can occur during adapter operations.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("Encode failed: {0}")]
    Encode(#[from] EncodeError),

    #[error("Decode failed: {0}")]
    Decode(#[from] DecodeError),

    #[error("Malformed message: {0}")]
    Message(#[from] MessageError),

    #[error("Transport error: {0}")]
    Transport(#[from] BusError),

    #[error("Timeout reached while waiting for {operation} response ({received} of {expected} received)")]
    Timeout {
        operation: &'static str,
        received: usize,
        expected: usize,
    },

    /// Carries the responses that did arrive.
    #[error("Timeout reached while waiting for serverSideEmit responses ({} of {expected} received)", .responses.len())]
    ServerSideEmitTimeout {
        responses: Vec<Value>,
        expected: usize,
    },

    #[error("Request {0} was dropped before completing")]
    Cancelled(String),
}

impl From<Expired> for AdapterError {
    fn from(expired: Expired) -> Self {
        match expired.partial {
            Gathered::Responses(responses) => AdapterError::ServerSideEmitTimeout {
                responses,
                expected: expired.expected,
            },
            _ => AdapterError::Timeout {
                operation: expired.kind.operation(),
                received: expired.received,
                expected: expired.expected,
            },
        }
    }
}

/// Acknowledgement progress of a cluster-wide broadcast.
///
/// Yields one `ClientCount` per node that delivered the packet, then the
/// clients' acknowledgements. Ends once the acknowledgement window closes.
pub type AckStream = mpsc::UnboundedReceiver<AckEvent>;

// ============================================================================
// Adapter
// ============================================================================

/// Adapter that relays a local broadcaster's operations across the cluster.
///
/// Cheap to clone; clones share one node identity. The subscription ends when
/// the last clone is dropped or [`ClusterAdapter::close`] is called.
#[derive(Clone)]
pub struct ClusterAdapter {
    inner: Arc<Inner>,
}

struct Inner {
    uid: String,
    local: Arc<dyn LocalBroadcaster>,
    transport: Arc<dyn Transport>,
    channels: Channels,
    requests: RequestTracker,
    acks: AckTracker,
    requests_timeout: Duration,
    publish_on_specific_response_channel: bool,
    subscription: Mutex<Option<Subscription>>,
}

/// Routes transport deliveries to an adapter, if it is still alive.
struct InboundHandler {
    inner: Weak<Inner>,
}

impl MessageHandler for InboundHandler {
    fn handle(&self, channel: String, payload: Bytes) -> BoxFuture<'static, ()> {
        let inner = self.inner.clone();
        Box::pin(async move {
            if let Some(inner) = inner.upgrade() {
                inner.on_message(&channel, &payload).await;
            }
        })
    }
}

impl ClusterAdapter {
    /// Create an adapter for the broadcaster's namespace and subscribe to its
    /// broadcast, request, and response channels.
    pub async fn new(
        local: Arc<dyn LocalBroadcaster>,
        transport: Arc<dyn Transport>,
        config: &AdapterConfig,
    ) -> Result<Self> {
        let uid = short_id();
        let channels = Channels::new(&config.key, local.namespace());
        let topics = vec![
            Topic::Pattern(channels.broadcast_pattern()),
            Topic::Channel(channels.request.clone()),
            Topic::Channel(channels.response.clone()),
            Topic::Channel(channels.specific_response(&uid)),
        ];

        let inner = Arc::new(Inner {
            uid,
            local,
            transport,
            channels,
            requests: RequestTracker::new(),
            acks: AckTracker::new(),
            requests_timeout: config.requests_timeout(),
            publish_on_specific_response_channel: config.publish_on_specific_response_channel,
            subscription: Mutex::new(None),
        });

        let handler = Arc::new(InboundHandler {
            inner: Arc::downgrade(&inner),
        });
        let subscription = inner.transport.subscribe(topics, handler).await?;
        *inner
            .subscription
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(subscription);

        info!(
            uid = %inner.uid,
            nsp = %inner.local.namespace(),
            key = %config.key,
            "Cluster adapter started"
        );

        Ok(Self { inner })
    }

    /// This node's identifier.
    pub fn uid(&self) -> &str {
        &self.inner.uid
    }

    pub fn namespace(&self) -> &str {
        self.inner.local.namespace()
    }

    pub fn channels(&self) -> &Channels {
        &self.inner.channels
    }

    /// The wrapped broadcaster.
    pub fn local(&self) -> &Arc<dyn LocalBroadcaster> {
        &self.inner.local
    }

    /// Requests still waiting for peers.
    pub async fn pending_requests(&self) -> usize {
        self.inner.requests.len().await
    }

    /// Broadcasts still relaying acknowledgements.
    pub async fn pending_acks(&self) -> usize {
        self.inner.acks.len().await
    }

    /// Stop listening to the cluster. Local operations keep working.
    pub fn close(&self) {
        let subscription = self
            .inner
            .subscription
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if subscription.is_some() {
            info!(uid = %self.inner.uid, "Cluster adapter closed");
        }
    }

    // ------------------------------------------------------------------------
    // Broadcast
    // ------------------------------------------------------------------------

    /// Deliver a packet to matching sockets on every node.
    ///
    /// The packet is stamped with this adapter's namespace. Local delivery
    /// happens even if relaying fails; the relay error is still returned.
    #[tracing::instrument(name = "adapter.broadcast", skip_all, fields(uid = %self.inner.uid))]
    pub async fn broadcast(&self, packet: Packet, opts: &BroadcastOptions) -> Result<()> {
        let packet = Packet {
            nsp: self.namespace().to_string(),
            ..packet
        };

        let relayed = if opts.flags.local {
            Ok(())
        } else {
            self.relay_broadcast(&packet, opts).await
        };

        self.inner.local.broadcast(&packet, opts);
        relayed
    }

    async fn relay_broadcast(&self, packet: &Packet, opts: &BroadcastOptions) -> Result<()> {
        let envelope = BroadcastEnvelope {
            uid: self.inner.uid.clone(),
            packet: packet.clone(),
            opts: opts.clone(),
        };
        let bytes = codec::encode(&envelope.to_value())?;
        let channel = self.inner.channels.broadcast_for(opts);
        debug!(channel = %channel, "Publishing broadcast");
        self.inner.transport.publish(&channel, bytes).await?;
        Ok(())
    }

    /// Broadcast and collect client acknowledgements from every node.
    ///
    /// Acknowledgements are relayed until `opts.flags.timeout` (default: the
    /// request timeout) has elapsed. Local delivery happens even if relaying
    /// fails; the relay error is then returned and the local acknowledgements
    /// are not observable.
    pub async fn broadcast_with_ack(
        &self,
        packet: Packet,
        opts: &BroadcastOptions,
    ) -> Result<AckStream> {
        let packet = Packet {
            nsp: self.namespace().to_string(),
            ..packet
        };
        let timeout = opts.flags.timeout.unwrap_or(self.inner.requests_timeout);
        let mut opts = opts.clone();
        opts.flags.timeout = Some(timeout);

        let (sink, stream) = mpsc::unbounded_channel();

        let relayed = if opts.flags.local {
            Ok(())
        } else {
            self.relay_broadcast_with_ack(&packet, &opts, &sink, timeout)
                .await
        };

        self.inner.local.broadcast_with_ack(&packet, &opts, sink);
        relayed.map(|()| stream)
    }

    async fn relay_broadcast_with_ack(
        &self,
        packet: &Packet,
        opts: &BroadcastOptions,
        sink: &mpsc::UnboundedSender<AckEvent>,
        timeout: Duration,
    ) -> Result<()> {
        let request_id = short_id();
        let envelope = RequestEnvelope {
            uid: self.inner.uid.clone(),
            request_id: Some(request_id.clone()),
            request: Request::Broadcast {
                packet: packet.clone(),
                opts: opts.clone(),
            },
        };
        let bytes = codec::encode(&envelope.to_value())?;
        // Registered before publishing so early answers are not lost.
        self.inner
            .acks
            .insert(request_id.clone(), sink.clone(), timeout)
            .await;
        if let Err(e) = self
            .inner
            .transport
            .publish(&self.inner.channels.request, bytes)
            .await
        {
            self.inner.acks.remove(&request_id).await;
            return Err(e.into());
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Ids of sockets in any of `rooms` across the cluster (all when empty).
    pub async fn sockets(&self, rooms: &HashSet<Room>) -> Result<HashSet<SocketId>> {
        let local = self.inner.local.sockets(rooms);
        let mut rooms: Vec<Room> = rooms.iter().cloned().collect();
        rooms.sort();
        let gathered = self
            .gather(Request::Sockets { rooms }, Gathered::Sockets(local))
            .await?;
        Ok(match gathered {
            Gathered::Sockets(sockets) => sockets,
            _ => HashSet::new(),
        })
    }

    /// Every room with at least one member on some node.
    pub async fn all_rooms(&self) -> Result<HashSet<Room>> {
        let local = self.inner.local.rooms();
        let gathered = self
            .gather(Request::AllRooms, Gathered::Rooms(local))
            .await?;
        Ok(match gathered {
            Gathered::Rooms(rooms) => rooms,
            _ => HashSet::new(),
        })
    }

    /// Descriptors of matching sockets: local ones first, then each peer's in
    /// arrival order. Local only when `opts.flags.local` is set.
    pub async fn fetch_sockets(&self, opts: &BroadcastOptions) -> Result<Vec<SocketDescriptor>> {
        let local = self.inner.local.fetch_sockets(opts);
        if opts.flags.local {
            return Ok(local);
        }
        let gathered = self
            .gather(Request::RemoteFetch { opts: opts.clone() }, Gathered::Fetch(local))
            .await?;
        Ok(match gathered {
            Gathered::Fetch(sockets) => sockets,
            _ => Vec::new(),
        })
    }

    /// Number of adapters listening on this namespace's request channel.
    pub async fn server_count(&self) -> Result<usize> {
        Ok(self
            .inner
            .transport
            .count_subscribers(&self.inner.channels.request)
            .await?)
    }

    /// Ask every node and wait for all of them, counting this one as answered.
    async fn gather(&self, request: Request, local: Gathered) -> Result<Gathered> {
        let num_sub = self.server_count().await?;
        debug!(
            operation = request.kind().operation(),
            num_sub, "Waiting for responses"
        );
        if num_sub <= 1 {
            return Ok(local);
        }
        self.await_peers(request, num_sub, 1, local).await
    }

    // ------------------------------------------------------------------------
    // Single-socket control
    // ------------------------------------------------------------------------

    /// Make a socket join a room, wherever it is connected.
    pub async fn remote_join(&self, sid: &str, room: &str) -> Result<()> {
        if self.inner.local.join(sid, room) {
            return Ok(());
        }
        let request = Request::RemoteJoin {
            sid: sid.to_string(),
            room: room.to_string(),
        };
        self.await_peers(request, 1, 0, Gathered::Done).await?;
        Ok(())
    }

    /// Make a socket leave a room, wherever it is connected.
    pub async fn remote_leave(&self, sid: &str, room: &str) -> Result<()> {
        if self.inner.local.leave(sid, room) {
            return Ok(());
        }
        let request = Request::RemoteLeave {
            sid: sid.to_string(),
            room: room.to_string(),
        };
        self.await_peers(request, 1, 0, Gathered::Done).await?;
        Ok(())
    }

    /// Disconnect a socket, wherever it is connected.
    pub async fn remote_disconnect(&self, sid: &str, close: bool) -> Result<()> {
        if self.inner.local.disconnect(sid, close) {
            return Ok(());
        }
        let request = Request::RemoteDisconnect {
            sid: sid.to_string(),
            close,
        };
        self.await_peers(request, 1, 0, Gathered::Done).await?;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Bulk control (fire-and-forget)
    // ------------------------------------------------------------------------

    /// Make matching sockets on every node join `rooms`.
    pub async fn add_sockets(&self, opts: &BroadcastOptions, rooms: &[Room]) -> Result<()> {
        self.inner.local.add_sockets(opts, rooms);
        if opts.flags.local {
            return Ok(());
        }
        self.publish_request(
            None,
            Request::AddSockets {
                opts: opts.clone(),
                rooms: rooms.to_vec(),
            },
        )
        .await
    }

    /// Make matching sockets on every node leave `rooms`.
    pub async fn del_sockets(&self, opts: &BroadcastOptions, rooms: &[Room]) -> Result<()> {
        self.inner.local.del_sockets(opts, rooms);
        if opts.flags.local {
            return Ok(());
        }
        self.publish_request(
            None,
            Request::DelSockets {
                opts: opts.clone(),
                rooms: rooms.to_vec(),
            },
        )
        .await
    }

    /// Disconnect matching sockets on every node.
    pub async fn disconnect_sockets(&self, opts: &BroadcastOptions, close: bool) -> Result<()> {
        self.inner.local.disconnect_sockets(opts, close);
        if opts.flags.local {
            return Ok(());
        }
        self.publish_request(
            None,
            Request::DisconnectSockets {
                opts: opts.clone(),
                close,
            },
        )
        .await
    }

    // ------------------------------------------------------------------------
    // Server-side events
    // ------------------------------------------------------------------------

    /// Send an event to every other node's server-side listeners.
    pub async fn server_side_emit(&self, args: Vec<Value>) -> Result<()> {
        self.publish_request(None, Request::ServerSideEmit { data: args })
            .await
    }

    /// Send an event to every other node and collect one reply from each.
    ///
    /// On timeout the error carries the replies that did arrive.
    pub async fn server_side_emit_with_ack(&self, args: Vec<Value>) -> Result<Vec<Value>> {
        let peers = self.server_count().await?.saturating_sub(1);
        debug!(peers, "Waiting for serverSideEmit responses");
        if peers == 0 {
            return Ok(Vec::new());
        }
        let gathered = self
            .await_peers(
                Request::ServerSideEmit { data: args },
                peers,
                0,
                Gathered::Responses(Vec::new()),
            )
            .await?;
        Ok(match gathered {
            Gathered::Responses(responses) => responses,
            _ => Vec::new(),
        })
    }

    // ------------------------------------------------------------------------
    // Request plumbing
    // ------------------------------------------------------------------------

    async fn publish_request(&self, request_id: Option<String>, request: Request) -> Result<()> {
        let envelope = RequestEnvelope {
            uid: self.inner.uid.clone(),
            request_id,
            request,
        };
        let bytes = codec::encode(&envelope.to_value())?;
        self.inner
            .transport
            .publish(&self.inner.channels.request, bytes)
            .await?;
        Ok(())
    }

    /// Publish a request and wait until `expected` answers are counted.
    async fn await_peers(
        &self,
        request: Request,
        expected: usize,
        received: usize,
        seed: Gathered,
    ) -> Result<Gathered> {
        let kind = request.kind();
        let request_id = short_id();
        let envelope = RequestEnvelope {
            uid: self.inner.uid.clone(),
            request_id: Some(request_id.clone()),
            request,
        };
        let bytes = codec::encode(&envelope.to_value())?;

        let outcome = self
            .inner
            .requests
            .insert(
                request_id.clone(),
                kind,
                expected,
                received,
                seed,
                self.inner.requests_timeout,
            )
            .await;

        if let Err(e) = self
            .inner
            .transport
            .publish(&self.inner.channels.request, bytes)
            .await
        {
            self.inner.requests.remove(&request_id).await;
            return Err(e.into());
        }

        match outcome.await {
            Ok(Ok(gathered)) => Ok(gathered),
            Ok(Err(expired)) => Err(expired.into()),
            Err(_) => Err(AdapterError::Cancelled(request_id)),
        }
    }
}

// ============================================================================
// Inbound
// ============================================================================

/// Publishes the answers to one request.
#[derive(Clone)]
struct Responder {
    transport: Arc<dyn Transport>,
    channel: String,
    request_id: String,
}

impl Responder {
    async fn send(&self, response: Response) {
        let bytes = match codec::encode(&response.to_value(&self.request_id)) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(request_id = %self.request_id, error = %e, "Failed to encode response");
                return;
            }
        };
        if let Err(e) = self.transport.publish(&self.channel, bytes).await {
            warn!(
                channel = %self.channel,
                request_id = %self.request_id,
                error = %e,
                "Failed to publish response"
            );
        }
    }
}

async fn reply(responder: Option<Responder>, response: Response) {
    match responder {
        Some(responder) => responder.send(response).await,
        None => debug!(kind = ?response.kind(), "Request has no id, not answering"),
    }
}

fn decode_request(payload: &[u8]) -> Result<RequestEnvelope> {
    Ok(RequestEnvelope::from_value(codec::decode_payload(payload)?)?)
}

fn decode_response(payload: &[u8]) -> Result<RawResponse> {
    Ok(RawResponse::from_value(codec::decode_payload(payload)?)?)
}

fn decode_broadcast(payload: &[u8]) -> Result<BroadcastEnvelope> {
    Ok(BroadcastEnvelope::from_value(codec::decode(payload)?)?)
}

impl Inner {
    async fn on_message(&self, channel: &str, payload: &[u8]) {
        if channel.starts_with(&self.channels.response) {
            self.on_response(payload).await;
        } else if channel == self.channels.request {
            self.on_request(payload).await;
        } else {
            self.on_broadcast(channel, payload);
        }
    }

    fn on_broadcast(&self, channel: &str, payload: &[u8]) {
        let Some(room) = self.channels.broadcast_room(channel) else {
            debug!(channel = %channel, "Ignoring different channel");
            return;
        };
        if !room.is_empty() && !self.local.has_room(room) {
            debug!(room = %room, "Ignoring broadcast to unknown room");
            return;
        }

        let envelope = match decode_broadcast(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!(error = %e, "Ignoring malformed broadcast");
                return;
            }
        };
        if envelope.uid == self.uid {
            debug!("Ignoring own broadcast");
            return;
        }
        if envelope.packet.nsp != self.local.namespace() {
            debug!(nsp = %envelope.packet.nsp, "Ignoring broadcast for different namespace");
            return;
        }

        self.local.broadcast(&envelope.packet, &envelope.opts);
    }

    fn responder(&self, requester_uid: &str, request_id: String) -> Responder {
        let channel = if self.publish_on_specific_response_channel {
            self.channels.specific_response(requester_uid)
        } else {
            self.channels.response.clone()
        };
        Responder {
            transport: self.transport.clone(),
            channel,
            request_id,
        }
    }

    async fn on_request(&self, payload: &[u8]) {
        let envelope = match decode_request(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!(error = %e, "Ignoring malformed request");
                return;
            }
        };
        if envelope.uid == self.uid {
            debug!("Ignoring own request");
            return;
        }

        debug!(
            kind = ?envelope.request.kind(),
            from = %envelope.uid,
            request_id = ?envelope.request_id,
            "Received request"
        );

        let responder = envelope
            .request_id
            .map(|id| self.responder(&envelope.uid, id));

        match envelope.request {
            Request::Sockets { rooms } => {
                let sockets = self.local.sockets(&rooms.into_iter().collect());
                let response = Response::Sockets {
                    sockets: sockets.into_iter().collect(),
                };
                reply(responder, response).await;
            }
            Request::AllRooms => {
                let response = Response::AllRooms {
                    rooms: self.local.rooms().into_iter().collect(),
                };
                reply(responder, response).await;
            }
            Request::RemoteJoin { sid, room } => {
                if self.local.join(&sid, &room) {
                    reply(responder, Response::RemoteJoin).await;
                }
            }
            Request::RemoteLeave { sid, room } => {
                if self.local.leave(&sid, &room) {
                    reply(responder, Response::RemoteLeave).await;
                }
            }
            Request::RemoteDisconnect { sid, close } => {
                if self.local.disconnect(&sid, close) {
                    reply(responder, Response::RemoteDisconnect).await;
                }
            }
            Request::AddSockets { opts, rooms } => self.local.add_sockets(&opts, &rooms),
            Request::DelSockets { opts, rooms } => self.local.del_sockets(&opts, &rooms),
            Request::DisconnectSockets { opts, close } => {
                self.local.disconnect_sockets(&opts, close)
            }
            Request::RemoteFetch { opts } => {
                let response = Response::RemoteFetch {
                    sockets: self.local.fetch_sockets(&opts),
                };
                reply(responder, response).await;
            }
            Request::ServerSideEmit { data } => self.on_server_side_emit(data, responder),
            Request::Broadcast { packet, opts } => self.on_broadcast_with_ack(packet, opts, responder),
        }
    }

    fn on_server_side_emit(&self, args: Vec<Value>, responder: Option<Responder>) {
        let Some(responder) = responder else {
            self.local.server_side_emit(ServerSideEvent { args, reply: None });
            return;
        };

        let (reply, answer) = oneshot::channel();
        self.local.server_side_emit(ServerSideEvent {
            args,
            reply: Some(reply),
        });

        let timeout = self.requests_timeout;
        tokio::spawn(async move {
            match tokio::time::timeout(timeout, answer).await {
                Ok(Ok(data)) => responder.send(Response::ServerSideEmit { data }).await,
                _ => debug!(
                    request_id = %responder.request_id,
                    "Server-side listener did not acknowledge"
                ),
            }
        });
    }

    fn on_broadcast_with_ack(
        &self,
        packet: Packet,
        opts: BroadcastOptions,
        responder: Option<Responder>,
    ) {
        let Some(responder) = responder else {
            debug!("Ignoring broadcast-with-ack request without id");
            return;
        };

        let (sink, mut events) = mpsc::unbounded_channel();
        self.local.broadcast_with_ack(&packet, &opts, sink);

        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let response = match event {
                    AckEvent::ClientCount(client_count) => {
                        debug!(client_count, "Waiting for client acknowledgements");
                        Response::BroadcastClientCount { client_count }
                    }
                    AckEvent::Ack(packet) => Response::BroadcastAck { packet },
                };
                responder.send(response).await;
            }
        });
    }

    async fn on_response(&self, payload: &[u8]) {
        let raw = match decode_response(payload) {
            Ok(raw) => raw,
            Err(e) => {
                debug!(error = %e, "Ignoring malformed response");
                return;
            }
        };
        let request_id = raw.request_id.clone();

        if self.acks.contains(&request_id).await {
            let kind = raw.ack_kind();
            let event = match raw.into_response(kind) {
                Ok(Response::BroadcastClientCount { client_count }) => {
                    AckEvent::ClientCount(client_count)
                }
                Ok(Response::BroadcastAck { packet }) => AckEvent::Ack(packet),
                _ => {
                    debug!(request_id = %request_id, "Ignoring unexpected acknowledgement response");
                    return;
                }
            };
            self.acks.dispatch(&request_id, event).await;
            return;
        }

        let Some(kind) = self.requests.kind_of(&request_id).await else {
            debug!(request_id = %request_id, "Ignoring response to unknown request");
            return;
        };
        match raw.into_response(kind) {
            Ok(response) => {
                self.requests.resolve(&request_id, response).await;
            }
            Err(e) => {
                debug!(request_id = %request_id, error = %e, "Ignoring malformed response");
            }
        }
    }
}
