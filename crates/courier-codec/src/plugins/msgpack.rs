//! MessagePack payloads behind binary framing. The default codec.

use crate::{error::PacketMalformedError, packet::Packet, plugins::Plugin, registry::Options};

pub static PLUGIN: Plugin = Plugin { encode, decode };

pub fn default_args() -> Options {
    let mut args = Options::new();
    args.insert("byte_encoding_string".into(), ">LL".into());
    args.insert("info_bytes".into(), 8.into());
    args
}

fn encode(packet: &Packet) -> Result<Vec<u8>, PacketMalformedError> {
    rmp_serde::to_vec_named(packet).map_err(PacketMalformedError::new)
}

fn decode(payload: &[u8]) -> Result<Packet, PacketMalformedError> {
    rmp_serde::from_slice(payload).map_err(PacketMalformedError::new)
}
