//! Local, single-process room broadcaster.
//!
//! This module contains:
//! - `LocalBroadcaster` trait: membership and delivery for sockets on this process
//! - Room/packet/option types shared with the cluster adapter
//! - `MemoryBroadcaster`: in-memory implementation for tests and standalone use

use std::collections::HashSet;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::codec::Value;

pub mod memory;

pub use memory::{MemoryBroadcaster, Outbound};

/// Room identifier.
pub type Room = String;

/// Identifier of a connected socket, unique within one process.
pub type SocketId = String;

/// Namespace every packet belongs to when none is given.
pub const DEFAULT_NAMESPACE: &str = "/";

/// A message addressed to sockets of one namespace.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    /// Namespace the packet belongs to.
    pub nsp: String,
    /// Application payload.
    pub data: Value,
}

impl Packet {
    pub fn new(nsp: impl Into<String>, data: impl Into<Value>) -> Self {
        Self {
            nsp: nsp.into(),
            data: data.into(),
        }
    }
}

/// Delivery modifiers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastFlags {
    /// Act on this process only, never relay.
    pub local: bool,
    /// How long acknowledgements are awaited for broadcast-with-ack.
    pub timeout: Option<Duration>,
}

/// Which sockets a broadcast or bulk operation targets.
///
/// Empty `rooms` means every socket. Sockets in any `except` room are skipped;
/// since each socket sits in a room named after its own id, `except` may also
/// hold socket ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastOptions {
    pub rooms: HashSet<Room>,
    pub except: HashSet<Room>,
    pub flags: BroadcastFlags,
}

impl BroadcastOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Target a room (may be called repeatedly).
    pub fn to(mut self, room: impl Into<Room>) -> Self {
        self.rooms.insert(room.into());
        self
    }

    /// Exclude a room or socket id.
    pub fn except(mut self, room: impl Into<Room>) -> Self {
        self.except.insert(room.into());
        self
    }

    pub fn local(mut self) -> Self {
        self.flags.local = true;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.flags.timeout = Some(timeout);
        self
    }
}

/// Serialisable view of a socket, as returned by fetch operations.
#[derive(Debug, Clone, PartialEq)]
pub struct SocketDescriptor {
    pub id: SocketId,
    pub handshake: Value,
    pub rooms: Vec<Room>,
    pub data: Value,
}

/// Progress of a broadcast that expects client acknowledgements.
#[derive(Debug, Clone, PartialEq)]
pub enum AckEvent {
    /// Number of clients one process delivered the packet to.
    ClientCount(usize),
    /// One client's acknowledgement payload.
    Ack(Value),
}

/// Sink for acknowledgement progress.
pub type AckSender = mpsc::UnboundedSender<AckEvent>;

/// A custom event sent between servers rather than to clients.
#[derive(Debug)]
pub struct ServerSideEvent {
    pub args: Vec<Value>,
    /// Present when the emitter waits for a reply. At most one reply is sent.
    pub reply: Option<oneshot::Sender<Value>>,
}

/// Room membership and delivery for the sockets of one process.
///
/// The cluster adapter holds one of these and calls it for the local half of
/// every operation. All methods act on local sockets only.
pub trait LocalBroadcaster: Send + Sync {
    /// Namespace served by this broadcaster.
    fn namespace(&self) -> &str;

    /// Deliver a packet to matching local sockets.
    fn broadcast(&self, packet: &Packet, opts: &BroadcastOptions);

    /// Deliver a packet and report the client count, then each acknowledgement.
    fn broadcast_with_ack(&self, packet: &Packet, opts: &BroadcastOptions, acks: AckSender);

    /// Ids of sockets in any of `rooms` (all sockets when empty).
    fn sockets(&self, rooms: &HashSet<Room>) -> HashSet<SocketId>;

    /// Every room with at least one local member.
    fn rooms(&self) -> HashSet<Room>;

    fn has_room(&self, room: &str) -> bool;

    fn has_socket(&self, id: &str) -> bool;

    /// Returns `false` if the socket is not connected here.
    fn join(&self, id: &str, room: &str) -> bool;

    /// Returns `false` if the socket is not connected here.
    fn leave(&self, id: &str, room: &str) -> bool;

    /// Returns `false` if the socket is not connected here.
    fn disconnect(&self, id: &str, close: bool) -> bool;

    /// Make matching sockets join `rooms`.
    fn add_sockets(&self, opts: &BroadcastOptions, rooms: &[Room]);

    /// Make matching sockets leave `rooms`.
    fn del_sockets(&self, opts: &BroadcastOptions, rooms: &[Room]);

    fn disconnect_sockets(&self, opts: &BroadcastOptions, close: bool);

    fn fetch_sockets(&self, opts: &BroadcastOptions) -> Vec<SocketDescriptor>;

    /// Hand a server-side event to this process's listeners.
    fn server_side_emit(&self, event: ServerSideEvent);
}
