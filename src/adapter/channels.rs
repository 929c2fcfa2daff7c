//! Channel names used by one adapter.

use crate::broadcaster::BroadcastOptions;

/// Channel names for one namespace, under a common prefix.
///
/// - broadcast: `<prefix>#<nsp>#`, plus `<room>#` when exactly one room is targeted
/// - request: `<prefix>-request#<nsp>#`
/// - response: `<prefix>-response#<nsp>#`, plus `<uid>#` for a node's own channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channels {
    pub broadcast: String,
    pub request: String,
    pub response: String,
}

impl Channels {
    pub fn new(prefix: &str, nsp: &str) -> Self {
        Self {
            broadcast: format!("{prefix}#{nsp}#"),
            request: format!("{prefix}-request#{nsp}#"),
            response: format!("{prefix}-response#{nsp}#"),
        }
    }

    /// Pattern covering every broadcast channel of the namespace.
    pub fn broadcast_pattern(&self) -> String {
        format!("{}*", self.broadcast)
    }

    /// Channel a broadcast with these options is published on.
    pub fn broadcast_for(&self, opts: &BroadcastOptions) -> String {
        match (opts.rooms.len(), opts.rooms.iter().next()) {
            (1, Some(room)) => format!("{}{}#", self.broadcast, room),
            _ => self.broadcast.clone(),
        }
    }

    /// Room suffix of a broadcast channel.
    ///
    /// `None` when the channel is not a broadcast channel of this namespace,
    /// `Some("")` for the room-less channel.
    pub fn broadcast_room<'a>(&self, channel: &'a str) -> Option<&'a str> {
        let rest = channel.strip_prefix(self.broadcast.as_str())?;
        Some(rest.strip_suffix('#').unwrap_or(rest))
    }

    /// Response channel reserved for the node with this uid.
    pub fn specific_response(&self, uid: &str) -> String {
        format!("{}{}#", self.response, uid)
    }
}
