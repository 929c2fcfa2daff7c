//! Meshcast - cluster adapter for room broadcasting
//!
//! Lets several processes that each hold their own sockets behave as one room
//! broadcaster. Broadcasts, room queries, and socket control are relayed
//! between processes over a pub/sub transport, encoded with a compact
//! MessagePack-compatible codec.

pub mod adapter;
pub mod broadcaster;
pub mod bus;
pub mod codec;
pub mod config;
pub mod utils;

pub use adapter::{AdapterConfig, AdapterError, AckStream, ClusterAdapter};
pub use broadcaster::{
    AckEvent, BroadcastOptions, LocalBroadcaster, MemoryBroadcaster, Packet, SocketDescriptor,
};
pub use bus::{init_transport, ChannelTransport, Transport, TransportConfig};
pub use codec::{decode, encode, Value};
pub use config::Config;
