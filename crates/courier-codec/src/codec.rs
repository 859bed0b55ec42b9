use std::{
    fmt,
    io::{self, Read, Write},
    sync::Arc,
};

use tracing::debug;

use crate::{error::SendError, framing::Framing, packet::Packet, plugins::Plugin};

/// A ready-to-use wire codec: a plugin's encode/decode pair wired to a
/// framing engine. Built once at registry lookup and cheap to clone.
///
/// `send` surfaces encode failures to the caller as
/// [`SendError::Malformed`]; `recv` converts decode failures and clean
/// disconnects to `Ok(None)` so transport code can treat both as
/// "this peer is done".
#[derive(Clone)]
pub struct Codec {
    name: Arc<str>,
    plugin: &'static Plugin,
    framing: Arc<Framing>,
}

impl Codec {
    pub(crate) fn new(name: &str, plugin: &'static Plugin, framing: Framing) -> Self {
        Self { name: Arc::from(name), plugin, framing: Arc::new(framing) }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Encode and frame one packet onto `io`.
    pub fn send(&self, io: &mut dyn Write, packet: &Packet) -> Result<(), SendError> {
        let payload = (self.plugin.encode)(packet)?;
        self.framing.write_frame(io, &payload)
    }

    /// Read one framed packet from `io`.
    ///
    /// `Ok(None)` covers end of stream, a bad header, and undecodable
    /// payload bytes; `Err` is a transport error.
    pub fn recv(&self, io: &mut dyn Read) -> io::Result<Option<Packet>> {
        let Some(payload) = self.framing.read_frame(io)? else {
            return Ok(None);
        };
        match (self.plugin.decode)(&payload) {
            Ok(packet) => Ok(Some(packet)),
            Err(err) => {
                debug!(%err, codec = %self.name, "codec: dropping undecodable payload");
                Ok(None)
            }
        }
    }
}

impl fmt::Debug for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Codec").field("name", &self.name).field("framing", &self.framing).finish()
    }
}

/// Two codecs are equal when they share the one instance the registry
/// memoized: same plugin and the same built framing engine.
impl PartialEq for Codec {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && std::ptr::eq(self.plugin, other.plugin)
            && Arc::ptr_eq(&self.framing, &other.framing)
    }
}
