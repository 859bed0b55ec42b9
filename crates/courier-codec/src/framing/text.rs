use std::io::{self, Read, Write};

use crate::{
    error::{PacketMalformedError, ProtocolError, SendError},
    framing::{Fill, read_full},
};

/// Textual framing: a fixed-width ASCII header of decimal digits, left-padded
/// with a configured fill character, followed by exactly that many payload
/// bytes. A zero-byte read where the header should start is end of stream.
#[derive(Debug)]
pub struct TextFraming {
    header_length: usize,
    pad: char,
}

impl TextFraming {
    pub fn new(header_length: usize, encoding: &str, zero_string: &str) -> Result<Self, ProtocolError> {
        if header_length == 0 {
            return Err(ProtocolError::BadOptions("header_length must be positive".into()));
        }
        if !matches!(encoding.to_ascii_lowercase().as_str(), "utf-8" | "utf8") {
            return Err(ProtocolError::BadOptions(format!("unsupported encoding {encoding:?}")));
        }
        let mut chars = zero_string.chars();
        let pad = chars
            .next()
            .ok_or_else(|| ProtocolError::BadOptions("zero_string must not be empty".into()))?;
        if chars.next().is_some() || pad.len_utf8() != 1 {
            return Err(ProtocolError::BadOptions(format!(
                "zero_string {zero_string:?} must be a single byte"
            )));
        }
        Ok(Self { header_length, pad })
    }

    pub fn write_frame(&self, io: &mut dyn Write, payload: &[u8]) -> Result<(), SendError> {
        let digits = payload.len().to_string();
        if digits.len() > self.header_length {
            return Err(PacketMalformedError::new(format!(
                "payload of {} bytes does not fit a {}-digit header",
                payload.len(),
                self.header_length
            ))
            .into());
        }
        let mut header = String::with_capacity(self.header_length);
        for _ in digits.len()..self.header_length {
            header.push(self.pad);
        }
        header.push_str(&digits);
        io.write_all(header.as_bytes())?;
        io.write_all(payload)?;
        Ok(())
    }

    pub fn read_frame(&self, io: &mut dyn Read) -> io::Result<Option<Vec<u8>>> {
        let mut header = vec![0_u8; self.header_length];
        if read_full(io, &mut header)? == Fill::Eof {
            return Ok(None);
        }
        let Ok(text) = str::from_utf8(&header) else {
            return Ok(None);
        };
        let Some(length) = self.parse_length(text) else {
            return Ok(None);
        };
        let mut payload = vec![0_u8; length];
        if read_full(io, &mut payload)? == Fill::Eof {
            return Ok(None);
        }
        Ok(Some(payload))
    }

    fn parse_length(&self, text: &str) -> Option<usize> {
        // A '0' pad makes the whole header parse directly; other pads are
        // stripped from the left first.
        if let Ok(length) = text.parse::<usize>() {
            return Some(length);
        }
        text.trim_start_matches(self.pad).parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn framing() -> TextFraming {
        TextFraming::new(12, "utf-8", "0").expect("options")
    }

    #[test]
    fn rejects_bad_options() {
        assert!(TextFraming::new(0, "utf-8", "0").is_err());
        assert!(TextFraming::new(12, "latin-1", "0").is_err());
        assert!(TextFraming::new(12, "utf-8", "").is_err());
        assert!(TextFraming::new(12, "utf-8", "00").is_err());
    }

    #[test]
    fn header_is_left_padded_decimal() {
        let out = framing();
        let mut buf = Vec::new();
        out.write_frame(&mut buf, b"abcde").unwrap();
        assert_eq!(&buf[..12], b"000000000005");
        assert_eq!(&buf[12..], b"abcde");
    }

    #[test]
    fn round_trip() {
        let out = framing();
        let mut buf = Vec::new();
        out.write_frame(&mut buf, br#"{"k":"v"}"#).unwrap();
        let got = out.read_frame(&mut Cursor::new(buf)).unwrap();
        assert_eq!(got.as_deref(), Some(&br#"{"k":"v"}"#[..]));
    }

    #[test]
    fn zero_length_payload_is_legal() {
        let out = framing();
        let mut buf = Vec::new();
        out.write_frame(&mut buf, b"").unwrap();
        assert_eq!(&buf, b"000000000000");
        let got = out.read_frame(&mut Cursor::new(buf)).unwrap();
        assert_eq!(got.as_deref(), Some(&b""[..]));
    }

    #[test]
    fn end_of_stream_reads_as_no_packet() {
        let out = framing();
        assert!(out.read_frame(&mut Cursor::new(Vec::new())).unwrap().is_none());
    }

    #[test]
    fn short_header_reads_as_no_packet() {
        let out = framing();
        assert!(out.read_frame(&mut Cursor::new(b"0000".to_vec())).unwrap().is_none());
    }

    #[test]
    fn unparsable_header_reads_as_no_packet() {
        let out = framing();
        assert!(out.read_frame(&mut Cursor::new(b"not a number".to_vec())).unwrap().is_none());
    }

    #[test]
    fn space_padded_header_parses() {
        let out = TextFraming::new(8, "utf-8", " ").unwrap();
        let mut buf = Vec::new();
        out.write_frame(&mut buf, b"xy").unwrap();
        assert_eq!(&buf[..8], b"       2");
        let got = out.read_frame(&mut Cursor::new(buf)).unwrap();
        assert_eq!(got.as_deref(), Some(&b"xy"[..]));
    }

    #[test]
    fn oversized_payload_is_malformed_on_send() {
        let out = TextFraming::new(2, "utf-8", "0").unwrap();
        let payload = vec![0_u8; 100];
        assert!(out.write_frame(&mut Vec::new(), &payload).is_err());
    }
}
