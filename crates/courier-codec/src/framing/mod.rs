//! Wire framing engines.
//!
//! A frame carries exactly one encoded payload (or one chunk of a chained
//! payload, binary only). Reads return `Ok(None)` for the no-packet
//! outcomes: clean end of stream, a short or unreadable header, or an
//! oversized length claim. Socket errors propagate as `Err`.

mod binary;
mod text;

use std::io::{self, Read};

pub use binary::{BinaryFraming, HeaderFormat, MAX_PACKET_SIZE};
pub use text::TextFraming;

use crate::error::SendError;

/// One of the two framing shapes a codec can use on the wire.
#[derive(Debug)]
pub enum Framing {
    Binary(BinaryFraming),
    Text(TextFraming),
}

impl Framing {
    pub fn write_frame(&self, io: &mut dyn io::Write, payload: &[u8]) -> Result<(), SendError> {
        match self {
            Self::Binary(framing) => framing.write_frame(io, payload),
            Self::Text(framing) => framing.write_frame(io, payload),
        }
    }

    pub fn read_frame(&self, io: &mut dyn Read) -> io::Result<Option<Vec<u8>>> {
        match self {
            Self::Binary(framing) => framing.read_frame(io),
            Self::Text(framing) => framing.read_frame(io),
        }
    }
}

#[derive(PartialEq, Eq)]
pub(crate) enum Fill {
    Full,
    Eof,
}

/// `read_exact` that folds a short read into the end-of-stream outcome.
pub(crate) fn read_full(io: &mut dyn Read, buf: &mut [u8]) -> io::Result<Fill> {
    match io.read_exact(buf) {
        Ok(()) => Ok(Fill::Full),
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => Ok(Fill::Eof),
        Err(err) => Err(err),
    }
}
