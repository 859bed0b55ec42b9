use std::io::{self, Read, Write};

use tracing::debug;

use crate::{
    error::{PacketMalformedError, ProtocolError, SendError},
    framing::{Fill, read_full},
};

/// Largest payload carried by a single binary frame. Anything bigger is
/// split into a chain of frames with descending style counts.
pub const MAX_PACKET_SIZE: u64 = 8_000_000_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FieldWidth {
    U32,
    U64,
}

impl FieldWidth {
    fn size(self) -> usize {
        match self {
            Self::U32 => 4,
            Self::U64 => 8,
        }
    }

    fn limit(self) -> u64 {
        match self {
            Self::U32 => u64::from(u32::MAX),
            Self::U64 => u64::MAX,
        }
    }
}

/// Binary frame header layout, parsed from a pack-pattern string.
///
/// The pattern is `>` or `<` (byte order) followed by two field letters,
/// `L` for a 32-bit word and `Q` for a 64-bit word; `">LL"` is the 8-byte
/// big-endian header the msgpack plugin ships with. The two fields carry
/// `(length, style)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeaderFormat {
    big_endian: bool,
    fields: [FieldWidth; 2],
}

impl HeaderFormat {
    pub fn parse(pattern: &str) -> Result<Self, ProtocolError> {
        let bad = || ProtocolError::BadOptions(format!("unsupported header pattern {pattern:?}"));
        let mut chars = pattern.chars();
        let big_endian = match chars.next() {
            Some('>') => true,
            Some('<') => false,
            _ => return Err(bad()),
        };
        let mut fields = [FieldWidth::U32; 2];
        for field in &mut fields {
            *field = match chars.next() {
                Some('L') => FieldWidth::U32,
                Some('Q') => FieldWidth::U64,
                _ => return Err(bad()),
            };
        }
        if chars.next().is_some() {
            return Err(bad());
        }
        Ok(Self { big_endian, fields })
    }

    /// Header size in bytes; must agree with the plugin's `info_bytes`.
    pub fn size(&self) -> usize {
        self.fields[0].size() + self.fields[1].size()
    }

    fn put(&self, width: FieldWidth, value: u64, out: &mut Vec<u8>) -> Result<(), PacketMalformedError> {
        if value > width.limit() {
            return Err(PacketMalformedError::new(format!(
                "header field value {value} exceeds the {} byte field width",
                width.size()
            )));
        }
        match (width, self.big_endian) {
            (FieldWidth::U32, true) => out.extend_from_slice(&(value as u32).to_be_bytes()),
            (FieldWidth::U32, false) => out.extend_from_slice(&(value as u32).to_le_bytes()),
            (FieldWidth::U64, true) => out.extend_from_slice(&value.to_be_bytes()),
            (FieldWidth::U64, false) => out.extend_from_slice(&value.to_le_bytes()),
        }
        Ok(())
    }

    fn take(&self, width: FieldWidth, bytes: &[u8]) -> u64 {
        let field = &bytes[..width.size()];
        if self.big_endian {
            field.iter().fold(0, |word, &byte| word << 8 | u64::from(byte))
        } else {
            field.iter().rev().fold(0, |word, &byte| word << 8 | u64::from(byte))
        }
    }

    pub(crate) fn pack(&self, length: u64, style: u64) -> Result<Vec<u8>, PacketMalformedError> {
        let mut out = Vec::with_capacity(self.size());
        self.put(self.fields[0], length, &mut out)?;
        self.put(self.fields[1], style, &mut out)?;
        Ok(out)
    }

    pub(crate) fn unpack(&self, bytes: &[u8]) -> Option<(u64, u64)> {
        if bytes.len() != self.size() {
            return None;
        }
        let length = self.take(self.fields[0], bytes);
        let style = self.take(self.fields[1], &bytes[self.fields[0].size()..]);
        Some((length, style))
    }
}

/// Length-prefixed binary framing with frame chaining for oversized payloads.
///
/// Send: a payload of at most the chunk limit goes out as one
/// `header(len, 0)` frame. A larger payload is partitioned into chunks of
/// the limit; chunk `i` of `k` travels with style `k - i`, the final chunk
/// with style `1`.
///
/// Receive: `style == 0` is a complete frame; `style >= 1` announces a chain
/// of `style` remaining chunks whose payloads are concatenated in receive
/// order. The payload of each frame is read exactly once.
#[derive(Debug)]
pub struct BinaryFraming {
    header: HeaderFormat,
    chunk_limit: u64,
}

impl BinaryFraming {
    pub fn new(header: HeaderFormat) -> Self {
        Self { header, chunk_limit: MAX_PACKET_SIZE }
    }

    #[cfg(test)]
    pub(crate) fn with_chunk_limit(header: HeaderFormat, chunk_limit: u64) -> Self {
        Self { header, chunk_limit }
    }

    pub fn write_frame(&self, io: &mut dyn Write, payload: &[u8]) -> Result<(), SendError> {
        let limit = self.chunk_limit as usize;
        if payload.len() <= limit {
            io.write_all(&self.header.pack(payload.len() as u64, 0)?)?;
            io.write_all(payload)?;
            return Ok(());
        }

        let total = payload.len().div_ceil(limit);
        for (i, chunk) in payload.chunks(limit).enumerate() {
            let style = if i + 1 == total { 1 } else { (total - i) as u64 };
            io.write_all(&self.header.pack(chunk.len() as u64, style)?)?;
            io.write_all(chunk)?;
        }
        Ok(())
    }

    pub fn read_frame(&self, io: &mut dyn Read) -> io::Result<Option<Vec<u8>>> {
        let Some((length, style)) = self.read_header(io)? else {
            return Ok(None);
        };

        let Some(mut payload) = self.read_chunk(io, length)? else {
            return Ok(None);
        };
        if style == 0 {
            return Ok(Some(payload));
        }

        for _ in 0..style - 1 {
            let Some((length, _)) = self.read_header(io)? else {
                return Ok(None);
            };
            let Some(chunk) = self.read_chunk(io, length)? else {
                return Ok(None);
            };
            payload.extend_from_slice(&chunk);
        }
        Ok(Some(payload))
    }

    fn read_header(&self, io: &mut dyn Read) -> io::Result<Option<(u64, u64)>> {
        let mut header = vec![0_u8; self.header.size()];
        if read_full(io, &mut header)? == Fill::Eof {
            return Ok(None);
        }
        Ok(self.header.unpack(&header))
    }

    fn read_chunk(&self, io: &mut dyn Read, length: u64) -> io::Result<Option<Vec<u8>>> {
        if length > self.chunk_limit {
            debug!(length, limit = self.chunk_limit, "framing: oversized length claim");
            return Ok(None);
        }
        let mut chunk = vec![0_u8; length as usize];
        if read_full(io, &mut chunk)? == Fill::Eof {
            return Ok(None);
        }
        Ok(Some(chunk))
    }
}
