//! Embeddable request/response messaging runtime over TCP.
//!
//! A [`Server`] accepts many concurrent connections, drains their framed
//! messages through one dispatch queue, and hands each packet to a tick
//! callback that can reply on the originating connection. A [`Client`] is
//! the synchronous counterpart. [`RequestManagerServer`] layers named
//! request routing on top. Wire formats are pluggable codecs resolved from
//! the `courier-codec` registry.

mod address;
mod client;
mod connection;
mod error;
mod manager;
mod server;

pub use address::Address;
pub use client::{Client, ClientState};
pub use connection::Delivery;
pub use courier_codec::{
    Codec, CodecRegistry, DEFAULT_PROTOCOLS, Options, Packet, PacketMalformedError, ProtocolError,
    Value, load_any_protocol, load_default_protocol, load_protocol, load_protocols,
};
pub use error::{ClientError, ManagerError, ServerError};
pub use manager::{DEFAULT_REQUEST_HEADER, RequestFn, RequestManagerServer};
pub use server::{Server, ServerConfig, ServerState, TickCallback};
