//! Shipped codec plugins.
//!
//! A plugin is the payload half of a codec: an `encode`/`decode` pair plus
//! the default framing options its wire format expects. The registry wires
//! plugins to framing engines per the manifest's `"bin"`/`"str"` kind.

pub mod json;
pub mod msgpack;
pub mod native;

use crate::{error::PacketMalformedError, packet::Packet, registry::Options};

pub type EncodeFn = fn(&Packet) -> Result<Vec<u8>, PacketMalformedError>;
pub type DecodeFn = fn(&[u8]) -> Result<Packet, PacketMalformedError>;

/// Payload serializer record exposed by every plugin module.
pub struct Plugin {
    pub encode: EncodeFn,
    pub decode: DecodeFn,
}

pub(crate) struct BuiltinModule {
    pub plugin: &'static Plugin,
    pub default_args: fn() -> Options,
}

/// Resolve a manifest `packagename` to a built-in plugin module.
pub(crate) fn resolve(package: &str) -> Option<BuiltinModule> {
    match package {
        "json" => Some(BuiltinModule { plugin: &json::PLUGIN, default_args: json::default_args }),
        "msgpack" => {
            Some(BuiltinModule { plugin: &msgpack::PLUGIN, default_args: msgpack::default_args })
        }
        "native" => {
            Some(BuiltinModule { plugin: &native::PLUGIN, default_args: native::default_args })
        }
        _ => None,
    }
}
