//! In-memory room broadcaster.
//!
//! Each connected socket is represented by an unbounded channel of
//! [`Outbound`] items that the embedding server drains and writes to the
//! client. Every socket joins a room named after its own id on connect.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use super::{
    AckEvent, AckSender, BroadcastOptions, LocalBroadcaster, Packet, Room, ServerSideEvent,
    SocketDescriptor, SocketId,
};
use crate::codec::Value;

/// How long client acknowledgements are awaited when the caller gives no timeout.
const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Item written to a socket's outbound queue.
#[derive(Debug)]
pub enum Outbound {
    /// Packet to deliver. `ack` is present when the sender waits for a reply.
    Packet {
        packet: Packet,
        ack: Option<oneshot::Sender<Value>>,
    },
    /// The socket was disconnected by the server.
    Disconnect { close: bool },
}

struct SocketEntry {
    rooms: HashSet<Room>,
    handshake: Value,
    data: Value,
    outbox: mpsc::UnboundedSender<Outbound>,
}

#[derive(Default)]
struct State {
    rooms: HashMap<Room, HashSet<SocketId>>,
    sockets: HashMap<SocketId, SocketEntry>,
}

impl State {
    fn join(&mut self, id: &str, room: &str) -> bool {
        let Some(entry) = self.sockets.get_mut(id) else {
            return false;
        };
        entry.rooms.insert(room.to_string());
        self.rooms
            .entry(room.to_string())
            .or_default()
            .insert(id.to_string());
        true
    }

    fn leave(&mut self, id: &str, room: &str) -> bool {
        let Some(entry) = self.sockets.get_mut(id) else {
            return false;
        };
        entry.rooms.remove(room);
        if let Some(members) = self.rooms.get_mut(room) {
            members.remove(id);
            if members.is_empty() {
                self.rooms.remove(room);
            }
        }
        true
    }

    fn remove(&mut self, id: &str) -> Option<SocketEntry> {
        let entry = self.sockets.remove(id)?;
        for room in &entry.rooms {
            if let Some(members) = self.rooms.get_mut(room) {
                members.remove(id);
                if members.is_empty() {
                    self.rooms.remove(room);
                }
            }
        }
        Some(entry)
    }

    /// Ids of sockets matched by `opts`, each once.
    fn matching(&self, opts: &BroadcastOptions) -> Vec<SocketId> {
        let excluded: HashSet<&SocketId> = opts
            .except
            .iter()
            .filter_map(|room| self.rooms.get(room))
            .flatten()
            .collect();

        if opts.rooms.is_empty() {
            return self
                .sockets
                .keys()
                .filter(|id| !excluded.contains(id))
                .cloned()
                .collect();
        }

        let mut seen = HashSet::new();
        let mut ids = Vec::new();
        for room in &opts.rooms {
            let Some(members) = self.rooms.get(room) else {
                continue;
            };
            for id in members {
                if !excluded.contains(id) && seen.insert(id) {
                    ids.push(id.clone());
                }
            }
        }
        ids
    }
}

/// Room broadcaster for the sockets of one namespace on this process.
pub struct MemoryBroadcaster {
    nsp: String,
    state: RwLock<State>,
    server_events: mpsc::UnboundedSender<ServerSideEvent>,
    server_events_rx: Mutex<Option<mpsc::UnboundedReceiver<ServerSideEvent>>>,
}

impl MemoryBroadcaster {
    /// Create a broadcaster for the given namespace.
    pub fn new(nsp: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            nsp: nsp.into(),
            state: RwLock::new(State::default()),
            server_events: tx,
            server_events_rx: Mutex::new(Some(rx)),
        }
    }

    /// Register a socket. Returns its outbound queue.
    pub fn connect(&self, id: impl Into<SocketId>) -> mpsc::UnboundedReceiver<Outbound> {
        self.connect_with(id, Value::Nil, Value::Nil)
    }

    /// Register a socket carrying handshake details and application data.
    pub fn connect_with(
        &self,
        id: impl Into<SocketId>,
        handshake: Value,
        data: Value,
    ) -> mpsc::UnboundedReceiver<Outbound> {
        let id = id.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.write();
        state.sockets.insert(
            id.clone(),
            SocketEntry {
                rooms: HashSet::new(),
                handshake,
                data,
                outbox: tx,
            },
        );
        state.join(&id, &id);
        debug!(nsp = %self.nsp, socket = %id, "Socket connected");
        rx
    }

    /// Take the receiver of server-side events. Only the first call gets it.
    ///
    /// Events arriving before this is called are dropped.
    pub fn take_server_events(&self) -> Option<mpsc::UnboundedReceiver<ServerSideEvent>> {
        self.server_events_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    /// Rooms a local socket is in.
    pub fn socket_rooms(&self, id: &str) -> Option<HashSet<Room>> {
        self.read().sockets.get(id).map(|e| e.rooms.clone())
    }

    pub fn socket_count(&self) -> usize {
        self.read().sockets.len()
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    fn deliver(state: &State, ids: &[SocketId], packet: &Packet) {
        for id in ids {
            if let Some(entry) = state.sockets.get(id) {
                let _ = entry.outbox.send(Outbound::Packet {
                    packet: packet.clone(),
                    ack: None,
                });
            }
        }
    }
}

impl LocalBroadcaster for MemoryBroadcaster {
    fn namespace(&self) -> &str {
        &self.nsp
    }

    fn broadcast(&self, packet: &Packet, opts: &BroadcastOptions) {
        let state = self.read();
        let ids = state.matching(opts);
        debug!(nsp = %self.nsp, recipients = ids.len(), "Local broadcast");
        Self::deliver(&state, &ids, packet);
    }

    fn broadcast_with_ack(&self, packet: &Packet, opts: &BroadcastOptions, acks: AckSender) {
        let pending: FuturesUnordered<oneshot::Receiver<Value>> = {
            let state = self.read();
            let ids = state.matching(opts);
            let _ = acks.send(AckEvent::ClientCount(ids.len()));
            ids.iter()
                .filter_map(|id| state.sockets.get(id))
                .map(|entry| {
                    let (tx, rx) = oneshot::channel();
                    let _ = entry.outbox.send(Outbound::Packet {
                        packet: packet.clone(),
                        ack: Some(tx),
                    });
                    rx
                })
                .collect()
        };

        if pending.is_empty() {
            return;
        }

        let timeout = opts.flags.timeout.unwrap_or(DEFAULT_ACK_TIMEOUT);
        tokio::spawn(async move {
            let forward = pending.for_each(|reply| {
                if let Ok(value) = reply {
                    let _ = acks.send(AckEvent::Ack(value));
                }
                futures::future::ready(())
            });
            if tokio::time::timeout(timeout, forward).await.is_err() {
                debug!("Client acknowledgements timed out");
            }
        });
    }

    fn sockets(&self, rooms: &HashSet<Room>) -> HashSet<SocketId> {
        let opts = BroadcastOptions {
            rooms: rooms.clone(),
            ..Default::default()
        };
        self.read().matching(&opts).into_iter().collect()
    }

    fn rooms(&self) -> HashSet<Room> {
        self.read().rooms.keys().cloned().collect()
    }

    fn has_room(&self, room: &str) -> bool {
        self.read().rooms.contains_key(room)
    }

    fn has_socket(&self, id: &str) -> bool {
        self.read().sockets.contains_key(id)
    }

    fn join(&self, id: &str, room: &str) -> bool {
        self.write().join(id, room)
    }

    fn leave(&self, id: &str, room: &str) -> bool {
        self.write().leave(id, room)
    }

    fn disconnect(&self, id: &str, close: bool) -> bool {
        let Some(entry) = self.write().remove(id) else {
            return false;
        };
        let _ = entry.outbox.send(Outbound::Disconnect { close });
        info!(nsp = %self.nsp, socket = %id, close, "Socket disconnected");
        true
    }

    fn add_sockets(&self, opts: &BroadcastOptions, rooms: &[Room]) {
        let mut state = self.write();
        for id in state.matching(opts) {
            for room in rooms {
                state.join(&id, room);
            }
        }
    }

    fn del_sockets(&self, opts: &BroadcastOptions, rooms: &[Room]) {
        let mut state = self.write();
        for id in state.matching(opts) {
            for room in rooms {
                state.leave(&id, room);
            }
        }
    }

    fn disconnect_sockets(&self, opts: &BroadcastOptions, close: bool) {
        let ids = self.read().matching(opts);
        for id in ids {
            self.disconnect(&id, close);
        }
    }

    fn fetch_sockets(&self, opts: &BroadcastOptions) -> Vec<SocketDescriptor> {
        let state = self.read();
        state
            .matching(opts)
            .into_iter()
            .filter_map(|id| {
                let entry = state.sockets.get(&id)?;
                Some(SocketDescriptor {
                    rooms: entry.rooms.iter().cloned().collect(),
                    handshake: entry.handshake.clone(),
                    data: entry.data.clone(),
                    id,
                })
            })
            .collect()
    }

    fn server_side_emit(&self, event: ServerSideEvent) {
        let listening = self
            .server_events_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_none();
        if !listening {
            debug!(nsp = %self.nsp, "Server-side events not taken, event dropped");
            return;
        }
        if self.server_events.send(event).is_err() {
            debug!(nsp = %self.nsp, "No server-side listener, event dropped");
        }
    }
}
