//! Messages exchanged between adapters.
//!
//! Three envelopes travel on the wire, all as codec [`Value`] trees:
//! - broadcast: `[uid, packet, opts]` on a broadcast channel
//! - request: `{type, uid, requestId?, ...}` on the request channel
//! - response: `{type, requestId, ...}` on a response channel
//!
//! Requests and responses are tagged by their numeric `type`. Responses from
//! older peers may omit it, in which case the caller supplies the kind of the
//! request being answered.

use std::collections::HashSet;
use std::time::Duration;

use crate::broadcaster::{
    BroadcastFlags, BroadcastOptions, Packet, Room, SocketDescriptor, SocketId, DEFAULT_NAMESPACE,
};
use crate::codec::Value;

/// Errors raised while interpreting a decoded message.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("expected {expected}, got {found}")]
    Shape {
        expected: &'static str,
        found: &'static str,
    },

    #[error("missing or invalid field '{0}'")]
    Field(&'static str),

    #[error("unknown message type {0}")]
    UnknownType(i64),

    #[error("a {0:?} message is not a valid response")]
    NotAResponse(RequestType),
}

pub type Result<T> = std::result::Result<T, MessageError>;

// ============================================================================
// Request types
// ============================================================================

/// Wire discriminator shared by requests and responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestType {
    Sockets = 0,
    AllRooms = 1,
    RemoteJoin = 2,
    RemoteLeave = 3,
    RemoteDisconnect = 4,
    RemoteFetch = 5,
    ServerSideEmit = 6,
    Broadcast = 7,
    BroadcastClientCount = 8,
    BroadcastAck = 9,
}

impl RequestType {
    pub fn code(self) -> i64 {
        self as i64
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Some(match code {
            0 => Self::Sockets,
            1 => Self::AllRooms,
            2 => Self::RemoteJoin,
            3 => Self::RemoteLeave,
            4 => Self::RemoteDisconnect,
            5 => Self::RemoteFetch,
            6 => Self::ServerSideEmit,
            7 => Self::Broadcast,
            8 => Self::BroadcastClientCount,
            9 => Self::BroadcastAck,
            _ => return None,
        })
    }

    /// Name of the adapter operation, for errors and logs.
    pub fn operation(self) -> &'static str {
        match self {
            Self::Sockets => "sockets",
            Self::AllRooms => "allRooms",
            Self::RemoteJoin => "remoteJoin",
            Self::RemoteLeave => "remoteLeave",
            Self::RemoteDisconnect => "remoteDisconnect",
            Self::RemoteFetch => "fetchSockets",
            Self::ServerSideEmit => "serverSideEmit",
            Self::Broadcast => "broadcast",
            Self::BroadcastClientCount => "broadcastClientCount",
            Self::BroadcastAck => "broadcastAck",
        }
    }

    fn from_field(map: &Value) -> Result<Option<Self>> {
        match map.get("type") {
            None | Some(Value::Nil) => Ok(None),
            Some(v) => {
                let code = v.as_i64().ok_or(MessageError::Field("type"))?;
                Self::from_code(code)
                    .map(Some)
                    .ok_or(MessageError::UnknownType(code))
            }
        }
    }
}

// ============================================================================
// Field helpers
// ============================================================================

fn expect_map(value: &Value) -> Result<()> {
    match value {
        Value::Map(_) => Ok(()),
        other => Err(MessageError::Shape {
            expected: "map",
            found: other.type_name(),
        }),
    }
}

/// Scalar rendered as text; numbers become their decimal form.
fn text(value: &Value) -> Option<String> {
    match value {
        Value::Nil => None,
        other => other.to_key_string(),
    }
}

fn text_field(map: &Value, key: &'static str) -> Result<String> {
    map.get(key).and_then(text).ok_or(MessageError::Field(key))
}

fn optional_text_field(map: &Value, key: &'static str) -> Result<Option<String>> {
    match map.get(key) {
        None | Some(Value::Nil) => Ok(None),
        Some(v) => text(v).map(Some).ok_or(MessageError::Field(key)),
    }
}

fn bool_field(map: &Value, key: &'static str) -> Result<bool> {
    match map.get(key) {
        None | Some(Value::Nil) => Ok(false),
        Some(v) => v.as_bool().ok_or(MessageError::Field(key)),
    }
}

/// List of room names or socket ids. Absent means empty.
fn string_list(value: Option<&Value>, key: &'static str) -> Result<Vec<String>> {
    match value {
        None | Some(Value::Nil) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| text(v).ok_or(MessageError::Field(key)))
            .collect(),
        Some(_) => Err(MessageError::Field(key)),
    }
}

fn sorted(set: &HashSet<String>) -> Value {
    let mut items: Vec<&String> = set.iter().collect();
    items.sort();
    Value::Array(items.into_iter().map(|s| Value::from(s.as_str())).collect())
}

fn list(items: &[String]) -> Value {
    Value::Array(items.iter().map(|s| Value::from(s.as_str())).collect())
}

// ============================================================================
// Shared payload types
// ============================================================================

/// `{rooms, except, flags: {local, timeout?}}`, timeout in milliseconds.
pub fn opts_to_value(opts: &BroadcastOptions) -> Value {
    let mut flags = Value::map([("local", Value::from(opts.flags.local))]);
    if let Some(timeout) = opts.flags.timeout {
        flags.insert(
            "timeout",
            Value::from(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)),
        );
    }
    Value::map([
        ("rooms", sorted(&opts.rooms)),
        ("except", sorted(&opts.except)),
        ("flags", flags),
    ])
}

pub fn opts_from_value(value: &Value) -> Result<BroadcastOptions> {
    expect_map(value)?;
    let flags = match value.get("flags") {
        None | Some(Value::Nil) => BroadcastFlags::default(),
        Some(flags) => BroadcastFlags {
            local: bool_field(flags, "local")?,
            timeout: flags
                .get("timeout")
                .and_then(Value::as_u64)
                .map(Duration::from_millis),
        },
    };
    Ok(BroadcastOptions {
        rooms: string_list(value.get("rooms"), "rooms")?.into_iter().collect(),
        except: string_list(value.get("except"), "except")?.into_iter().collect(),
        flags,
    })
}

pub fn packet_to_value(packet: &Packet) -> Value {
    Value::map([
        ("nsp", Value::from(packet.nsp.as_str())),
        ("data", packet.data.clone()),
    ])
}

/// A packet without a namespace belongs to the default one.
pub fn packet_from_value(mut value: Value) -> Result<Packet> {
    expect_map(&value)?;
    let nsp = optional_text_field(&value, "nsp")?.unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
    let data = value.take("data").unwrap_or_default();
    Ok(Packet { nsp, data })
}

pub fn descriptor_to_value(socket: &SocketDescriptor) -> Value {
    Value::map([
        ("id", Value::from(socket.id.as_str())),
        ("handshake", socket.handshake.clone()),
        ("rooms", list(&socket.rooms)),
        ("data", socket.data.clone()),
    ])
}

pub fn descriptor_from_value(mut value: Value) -> Result<SocketDescriptor> {
    expect_map(&value)?;
    let id = text_field(&value, "id")?;
    let rooms = string_list(value.get("rooms"), "rooms")?;
    Ok(SocketDescriptor {
        id,
        rooms,
        handshake: value.take("handshake").unwrap_or_default(),
        data: value.take("data").unwrap_or_default(),
    })
}

// ============================================================================
// Broadcast envelope
// ============================================================================

/// `[uid, packet, opts]` published on a broadcast channel.
#[derive(Debug, Clone, PartialEq)]
pub struct BroadcastEnvelope {
    pub uid: String,
    pub packet: Packet,
    pub opts: BroadcastOptions,
}

impl BroadcastEnvelope {
    pub fn to_value(&self) -> Value {
        Value::Array(vec![
            Value::from(self.uid.as_str()),
            packet_to_value(&self.packet),
            opts_to_value(&self.opts),
        ])
    }

    pub fn from_value(value: Value) -> Result<Self> {
        let found = value.type_name();
        let mut items = value
            .into_array()
            .filter(|items| items.len() >= 3)
            .ok_or(MessageError::Shape {
                expected: "[uid, packet, opts]",
                found,
            })?
            .into_iter();
        let uid = items.next().as_ref().and_then(text).ok_or(MessageError::Field("uid"))?;
        let packet = packet_from_value(items.next().unwrap_or_default())?;
        let opts = opts_from_value(&items.next().unwrap_or_default())?;
        Ok(Self { uid, packet, opts })
    }
}

// ============================================================================
// Requests
// ============================================================================

/// A request from one node to its peers.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// Ids of sockets in any of `rooms`.
    Sockets { rooms: Vec<Room> },
    AllRooms,
    /// Make one socket join a room; answered by the node that owns it.
    RemoteJoin { sid: SocketId, room: Room },
    RemoteLeave { sid: SocketId, room: Room },
    RemoteDisconnect { sid: SocketId, close: bool },
    /// Make every matching socket join `rooms`. Not answered.
    AddSockets { opts: BroadcastOptions, rooms: Vec<Room> },
    DelSockets { opts: BroadcastOptions, rooms: Vec<Room> },
    DisconnectSockets { opts: BroadcastOptions, close: bool },
    RemoteFetch { opts: BroadcastOptions },
    ServerSideEmit { data: Vec<Value> },
    /// Broadcast expecting acknowledgements.
    Broadcast { packet: Packet, opts: BroadcastOptions },
}

impl Request {
    pub fn kind(&self) -> RequestType {
        match self {
            Request::Sockets { .. } => RequestType::Sockets,
            Request::AllRooms => RequestType::AllRooms,
            Request::RemoteJoin { .. } | Request::AddSockets { .. } => RequestType::RemoteJoin,
            Request::RemoteLeave { .. } | Request::DelSockets { .. } => RequestType::RemoteLeave,
            Request::RemoteDisconnect { .. } | Request::DisconnectSockets { .. } => {
                RequestType::RemoteDisconnect
            }
            Request::RemoteFetch { .. } => RequestType::RemoteFetch,
            Request::ServerSideEmit { .. } => RequestType::ServerSideEmit,
            Request::Broadcast { .. } => RequestType::Broadcast,
        }
    }
}

/// A request with its routing fields.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestEnvelope {
    /// Uid of the requesting node.
    pub uid: String,
    /// Absent for fire-and-forget requests.
    pub request_id: Option<String>,
    pub request: Request,
}

impl RequestEnvelope {
    pub fn to_value(&self) -> Value {
        let mut map = Value::map([
            ("type", Value::from(self.request.kind().code())),
            ("uid", Value::from(self.uid.as_str())),
        ]);
        if let Some(id) = &self.request_id {
            map.insert("requestId", Value::from(id.as_str()));
        }

        match &self.request {
            Request::Sockets { rooms } => map.insert("rooms", list(rooms)),
            Request::AllRooms => {}
            Request::RemoteJoin { sid, room } | Request::RemoteLeave { sid, room } => {
                map.insert("sid", Value::from(sid.as_str()));
                map.insert("room", Value::from(room.as_str()));
            }
            Request::RemoteDisconnect { sid, close } => {
                map.insert("sid", Value::from(sid.as_str()));
                map.insert("close", Value::from(*close));
            }
            Request::AddSockets { opts, rooms } | Request::DelSockets { opts, rooms } => {
                map.insert("opts", opts_to_value(opts));
                map.insert("rooms", list(rooms));
            }
            Request::DisconnectSockets { opts, close } => {
                map.insert("opts", opts_to_value(opts));
                map.insert("close", Value::from(*close));
            }
            Request::RemoteFetch { opts } => map.insert("opts", opts_to_value(opts)),
            Request::ServerSideEmit { data } => map.insert("data", Value::Array(data.clone())),
            Request::Broadcast { packet, opts } => {
                map.insert("packet", packet_to_value(packet));
                map.insert("opts", opts_to_value(opts));
            }
        }
        map
    }

    pub fn from_value(mut value: Value) -> Result<Self> {
        expect_map(&value)?;
        let kind = RequestType::from_field(&value)?.ok_or(MessageError::Field("type"))?;
        let uid = text_field(&value, "uid")?;
        let request_id = optional_text_field(&value, "requestId")?;

        // Bulk variants of join/leave/disconnect carry `opts` instead of `sid`.
        let opts = match value.get("opts") {
            None | Some(Value::Nil) => None,
            Some(opts) => Some(opts_from_value(opts)?),
        };
        let required_opts = |opts: Option<BroadcastOptions>| opts.ok_or(MessageError::Field("opts"));

        let request = match kind {
            RequestType::Sockets => Request::Sockets {
                rooms: string_list(value.get("rooms"), "rooms")?,
            },
            RequestType::AllRooms => Request::AllRooms,
            RequestType::RemoteJoin => match opts {
                Some(opts) => Request::AddSockets {
                    opts,
                    rooms: string_list(value.get("rooms"), "rooms")?,
                },
                None => Request::RemoteJoin {
                    sid: text_field(&value, "sid")?,
                    room: text_field(&value, "room")?,
                },
            },
            RequestType::RemoteLeave => match opts {
                Some(opts) => Request::DelSockets {
                    opts,
                    rooms: string_list(value.get("rooms"), "rooms")?,
                },
                None => Request::RemoteLeave {
                    sid: text_field(&value, "sid")?,
                    room: text_field(&value, "room")?,
                },
            },
            RequestType::RemoteDisconnect => match opts {
                Some(opts) => Request::DisconnectSockets {
                    opts,
                    close: bool_field(&value, "close")?,
                },
                None => Request::RemoteDisconnect {
                    sid: text_field(&value, "sid")?,
                    close: bool_field(&value, "close")?,
                },
            },
            RequestType::RemoteFetch => Request::RemoteFetch {
                opts: required_opts(opts)?,
            },
            RequestType::ServerSideEmit => Request::ServerSideEmit {
                data: match value.take("data") {
                    None | Some(Value::Nil) => Vec::new(),
                    Some(Value::Array(items)) => items,
                    Some(_) => return Err(MessageError::Field("data")),
                },
            },
            RequestType::Broadcast => Request::Broadcast {
                packet: packet_from_value(value.take("packet").ok_or(MessageError::Field("packet"))?)?,
                opts: required_opts(opts)?,
            },
            other @ (RequestType::BroadcastClientCount | RequestType::BroadcastAck) => {
                return Err(MessageError::UnknownType(other.code()))
            }
        };

        Ok(Self {
            uid,
            request_id,
            request,
        })
    }
}

// ============================================================================
// Responses
// ============================================================================

/// A peer's answer to a request.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Sockets { sockets: Vec<SocketId> },
    AllRooms { rooms: Vec<Room> },
    RemoteJoin,
    RemoteLeave,
    RemoteDisconnect,
    RemoteFetch { sockets: Vec<SocketDescriptor> },
    ServerSideEmit { data: Value },
    BroadcastClientCount { client_count: usize },
    BroadcastAck { packet: Value },
}

impl Response {
    pub fn kind(&self) -> RequestType {
        match self {
            Response::Sockets { .. } => RequestType::Sockets,
            Response::AllRooms { .. } => RequestType::AllRooms,
            Response::RemoteJoin => RequestType::RemoteJoin,
            Response::RemoteLeave => RequestType::RemoteLeave,
            Response::RemoteDisconnect => RequestType::RemoteDisconnect,
            Response::RemoteFetch { .. } => RequestType::RemoteFetch,
            Response::ServerSideEmit { .. } => RequestType::ServerSideEmit,
            Response::BroadcastClientCount { .. } => RequestType::BroadcastClientCount,
            Response::BroadcastAck { .. } => RequestType::BroadcastAck,
        }
    }

    /// Encode with the routing fields.
    pub fn to_value(&self, request_id: &str) -> Value {
        let mut map = Value::map([
            ("type", Value::from(self.kind().code())),
            ("requestId", Value::from(request_id)),
        ]);
        match self {
            Response::Sockets { sockets } => map.insert("sockets", list(sockets)),
            Response::AllRooms { rooms } => map.insert("rooms", list(rooms)),
            Response::RemoteJoin | Response::RemoteLeave | Response::RemoteDisconnect => {}
            Response::RemoteFetch { sockets } => map.insert(
                "sockets",
                Value::Array(sockets.iter().map(descriptor_to_value).collect()),
            ),
            Response::ServerSideEmit { data } => map.insert("data", data.clone()),
            Response::BroadcastClientCount { client_count } => {
                map.insert("clientCount", Value::from(*client_count))
            }
            Response::BroadcastAck { packet } => map.insert("packet", packet.clone()),
        }
        map
    }
}

/// A response whose body has not been interpreted yet.
///
/// The request id is needed first to find out what kind of answer to expect
/// when the peer did not send a `type`.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub kind: Option<RequestType>,
    pub request_id: String,
    body: Value,
}

impl RawResponse {
    pub fn from_value(value: Value) -> Result<Self> {
        expect_map(&value)?;
        Ok(Self {
            kind: RequestType::from_field(&value)?,
            request_id: text_field(&value, "requestId")?,
            body: value,
        })
    }

    /// Kind of an acknowledgement response; untyped ones are told apart by
    /// their fields.
    pub fn ack_kind(&self) -> RequestType {
        match self.kind {
            Some(kind) => kind,
            None if self.body.get("clientCount").is_some() => RequestType::BroadcastClientCount,
            None => RequestType::BroadcastAck,
        }
    }

    /// Interpret the body, using `fallback` when no `type` was sent.
    pub fn into_response(self, fallback: RequestType) -> Result<Response> {
        let mut body = self.body;
        Ok(match self.kind.unwrap_or(fallback) {
            RequestType::Sockets => Response::Sockets {
                sockets: required_list(&body, "sockets")?,
            },
            RequestType::AllRooms => Response::AllRooms {
                rooms: required_list(&body, "rooms")?,
            },
            RequestType::RemoteJoin => Response::RemoteJoin,
            RequestType::RemoteLeave => Response::RemoteLeave,
            RequestType::RemoteDisconnect => Response::RemoteDisconnect,
            RequestType::RemoteFetch => match body.take("sockets") {
                Some(Value::Array(items)) => Response::RemoteFetch {
                    sockets: items
                        .into_iter()
                        .map(descriptor_from_value)
                        .collect::<Result<_>>()?,
                },
                _ => return Err(MessageError::Field("sockets")),
            },
            RequestType::ServerSideEmit => Response::ServerSideEmit {
                data: body.take("data").unwrap_or_default(),
            },
            RequestType::BroadcastClientCount => Response::BroadcastClientCount {
                client_count: body
                    .get("clientCount")
                    .and_then(Value::as_u64)
                    .ok_or(MessageError::Field("clientCount"))? as usize,
            },
            RequestType::BroadcastAck => Response::BroadcastAck {
                packet: body.take("packet").unwrap_or_default(),
            },
            RequestType::Broadcast => return Err(MessageError::NotAResponse(RequestType::Broadcast)),
        })
    }
}

fn required_list(map: &Value, key: &'static str) -> Result<Vec<String>> {
    match map.get(key) {
        Some(v @ Value::Array(_)) => string_list(Some(v), key),
        _ => Err(MessageError::Field(key)),
    }
}
