//! Correlation of outgoing requests with peer responses.
//!
//! [`RequestTracker`] holds operations that wait for a number of answers;
//! [`AckTracker`] holds broadcasts whose client acknowledgements are relayed
//! back until a deadline. Each entry is removed exactly once: by the response
//! that completes it, or by its timer, whichever takes the lock first.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::debug;

use super::message::{RequestType, Response};
use crate::broadcaster::{AckEvent, AckSender, Room, SocketDescriptor, SocketId};
use crate::codec::Value;

/// Results accumulated for one pending request.
#[derive(Debug, Clone, PartialEq)]
pub enum Gathered {
    Sockets(HashSet<SocketId>),
    Rooms(HashSet<Room>),
    /// Concatenated in arrival order.
    Fetch(Vec<SocketDescriptor>),
    /// Single-target operations carry no data.
    Done,
    Responses(Vec<Value>),
}

impl Gathered {
    /// Merge a response. Returns `false` if it does not fit this accumulator.
    fn absorb(&mut self, response: Response) -> bool {
        match (self, response) {
            (Gathered::Sockets(set), Response::Sockets { sockets }) => set.extend(sockets),
            (Gathered::Rooms(set), Response::AllRooms { rooms }) => set.extend(rooms),
            (Gathered::Fetch(list), Response::RemoteFetch { sockets }) => list.extend(sockets),
            (
                Gathered::Done,
                Response::RemoteJoin | Response::RemoteLeave | Response::RemoteDisconnect,
            ) => {}
            (Gathered::Responses(list), Response::ServerSideEmit { data }) => list.push(data),
            _ => return false,
        }
        true
    }
}

/// A request whose deadline passed before enough responses arrived.
#[derive(Debug, Clone, PartialEq)]
pub struct Expired {
    pub kind: RequestType,
    pub received: usize,
    pub expected: usize,
    /// Whatever had been gathered, local result included.
    pub partial: Gathered,
}

pub type Outcome = Result<Gathered, Expired>;

struct PendingRequest {
    kind: RequestType,
    expected: usize,
    received: usize,
    gathered: Gathered,
    completion: oneshot::Sender<Outcome>,
    timer: JoinHandle<()>,
}

/// Pending requests keyed by request id.
#[derive(Clone, Default)]
pub struct RequestTracker {
    pending: Arc<Mutex<HashMap<String, PendingRequest>>>,
}

impl RequestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request and start its timer.
    ///
    /// `received` counts answers already accounted for (the local result for
    /// quorum operations). The request completes when `expected` is reached.
    pub async fn insert(
        &self,
        id: String,
        kind: RequestType,
        expected: usize,
        received: usize,
        seed: Gathered,
        timeout: Duration,
    ) -> oneshot::Receiver<Outcome> {
        let (completion, outcome) = oneshot::channel();
        let mut pending = self.pending.lock().await;

        // The timer needs the lock to expire the entry, so it cannot run
        // before the entry below is inserted.
        let tracker = self.clone();
        let timer_id = id.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            tracker.expire(&timer_id).await;
        });

        pending.insert(
            id,
            PendingRequest {
                kind,
                expected,
                received,
                gathered: seed,
                completion,
                timer,
            },
        );
        outcome
    }

    /// Kind of a pending request, if still pending.
    pub async fn kind_of(&self, id: &str) -> Option<RequestType> {
        self.pending.lock().await.get(id).map(|p| p.kind)
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.pending.lock().await.contains_key(id)
    }

    pub async fn len(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Apply a response. Returns `true` if it matched a pending request.
    ///
    /// Responses for unknown or already-completed ids, and responses of the
    /// wrong kind, are discarded.
    pub async fn resolve(&self, id: &str, response: Response) -> bool {
        let mut pending = self.pending.lock().await;
        let Some(entry) = pending.get_mut(id) else {
            debug!(request_id = %id, "Ignoring response to unknown request");
            return false;
        };
        if !entry.gathered.absorb(response) {
            debug!(request_id = %id, kind = ?entry.kind, "Ignoring response of mismatched kind");
            return false;
        }
        entry.received += 1;
        debug!(
            request_id = %id,
            received = entry.received,
            expected = entry.expected,
            "Response received"
        );

        if entry.received >= entry.expected {
            if let Some(entry) = pending.remove(id) {
                entry.timer.abort();
                let _ = entry.completion.send(Ok(entry.gathered));
            }
        }
        true
    }

    /// Fail a request with whatever it gathered. Returns `false` if it had
    /// already completed.
    pub async fn expire(&self, id: &str) -> bool {
        let Some(entry) = self.pending.lock().await.remove(id) else {
            return false;
        };
        debug!(
            request_id = %id,
            kind = ?entry.kind,
            received = entry.received,
            expected = entry.expected,
            "Request timed out"
        );
        let _ = entry.completion.send(Err(Expired {
            kind: entry.kind,
            received: entry.received,
            expected: entry.expected,
            partial: entry.gathered,
        }));
        true
    }

    /// Drop a request without completing it.
    pub async fn remove(&self, id: &str) {
        if let Some(entry) = self.pending.lock().await.remove(id) {
            entry.timer.abort();
        }
    }
}

/// Acknowledgement sinks of in-flight broadcasts, keyed by request id.
#[derive(Clone, Default)]
pub struct AckTracker {
    pending: Arc<Mutex<HashMap<String, AckSender>>>,
}

impl AckTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sink; it is dropped after `timeout` whatever has arrived.
    pub async fn insert(&self, id: String, sink: AckSender, timeout: Duration) {
        self.pending.lock().await.insert(id.clone(), sink);
        let pending = self.pending.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if pending.lock().await.remove(&id).is_some() {
                debug!(request_id = %id, "Acknowledgement window closed");
            }
        });
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.pending.lock().await.contains_key(id)
    }

    pub async fn len(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop the sink of `id` early. Returns `false` if none is registered.
    pub async fn remove(&self, id: &str) -> bool {
        self.pending.lock().await.remove(id).is_some()
    }

    /// Forward an event to the sink of `id`. Returns `false` if none is registered.
    pub async fn dispatch(&self, id: &str, event: AckEvent) -> bool {
        match self.pending.lock().await.get(id) {
            Some(sink) => {
                let _ = sink.send(event);
                true
            }
            None => false,
        }
    }
}
