//! Pluggable wire codecs for the courier messaging runtime.
//!
//! A [`Codec`] pairs a plugin's `encode`/`decode` functions with one of two
//! framing engines (length-prefixed binary or fixed-width textual) and is
//! built once at registry lookup. Codecs are resolved by logical name from a
//! [`CodecRegistry`] populated from the `protocols/plugins.json` manifest.

mod codec;
mod error;
pub mod framing;
mod packet;
mod plugins;
mod registry;

pub use codec::Codec;
pub use error::{PacketMalformedError, ProtocolError, SendError};
pub use packet::{Packet, Value};
pub use plugins::{DecodeFn, EncodeFn, Plugin};
pub use registry::{
    CodecRegistry, DEFAULT_PROTOCOLS, Options, load_any_protocol, load_default_protocol,
    load_protocol, load_protocols,
};
