//! UTF-8 JSON payloads behind textual framing.

use crate::{error::PacketMalformedError, packet::Packet, plugins::Plugin, registry::Options};

pub static PLUGIN: Plugin = Plugin { encode, decode };

pub fn default_args() -> Options {
    let mut args = Options::new();
    args.insert("header_length".into(), 12.into());
    args.insert("encoding".into(), "utf-8".into());
    args.insert("zero_string".into(), "0".into());
    args
}

fn encode(packet: &Packet) -> Result<Vec<u8>, PacketMalformedError> {
    serde_json::to_vec(packet).map_err(PacketMalformedError::new)
}

fn decode(payload: &[u8]) -> Result<Packet, PacketMalformedError> {
    serde_json::from_slice(payload).map_err(PacketMalformedError::new)
}
