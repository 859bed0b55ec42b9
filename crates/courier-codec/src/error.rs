use thiserror::Error;

/// A packet the codec cannot encode, or payload bytes it cannot decode.
///
/// Only the encode side ever surfaces this to callers; decode failures are
/// converted to the no-packet outcome by [`crate::Codec::recv`].
#[derive(Error, Debug)]
#[error("malformed packet: {reason}")]
pub struct PacketMalformedError {
    reason: String,
}

impl PacketMalformedError {
    pub(crate) fn new(reason: impl ToString) -> Self {
        Self { reason: reason.to_string() }
    }
}

/// Failure on the send path: the packet could not be encoded, or the
/// transport rejected the write.
#[derive(Error, Debug)]
pub enum SendError {
    #[error(transparent)]
    Malformed(#[from] PacketMalformedError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Failure to resolve or construct a codec.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("protocol {0:?} is not defined")]
    UnknownProtocol(String),
    #[error("none of {0:?} resolves to a loaded protocol")]
    UnresolvedList(Vec<String>),
    #[error("framing options rejected: {0}")]
    BadOptions(String),
    #[error("could not read plugin manifest: {0}")]
    ManifestIo(#[from] std::io::Error),
    #[error("plugin manifest is not a JSON mapping: {0}")]
    ManifestParse(#[from] serde_json::Error),
}
