//! Rust-native binary payloads behind binary framing.
//!
//! The wire format is bitcode over a tagged mirror of the packet value
//! tree, so it is compact and Rust-specific rather than self-describing.
//! Opt-in only: it is never part of the default protocol list, and it is
//! the one codec whose encode path rejects values the format cannot carry
//! (a float that is not finite after decode, for instance) as malformed.

use serde::{Deserialize, Serialize};

use crate::{
    error::PacketMalformedError,
    packet::{Packet, Value},
    plugins::Plugin,
    registry::Options,
};

pub static PLUGIN: Plugin = Plugin { encode, decode };

pub fn default_args() -> Options {
    let mut args = Options::new();
    args.insert("byte_encoding_string".into(), ">LL".into());
    args.insert("info_bytes".into(), 8.into());
    args
}

/// Tagged mirror of the packet value domain. Unlike the JSON value tree it
/// derives a non-self-describing serde layout, which is what bitcode needs.
#[derive(Serialize, Deserialize)]
enum Native {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
    List(Vec<Native>),
    Map(Vec<(String, Native)>),
}

fn lower(value: &Value) -> Result<Native, PacketMalformedError> {
    Ok(match value {
        Value::Null => Native::Null,
        Value::Bool(flag) => Native::Bool(*flag),
        Value::Number(number) => {
            if let Some(int) = number.as_i64() {
                Native::Int(int)
            } else if let Some(int) = number.as_u64() {
                Native::UInt(int)
            } else if let Some(float) = number.as_f64() {
                Native::Float(float)
            } else {
                return Err(PacketMalformedError::new(format!("unencodable number {number}")));
            }
        }
        Value::String(text) => Native::Str(text.clone()),
        Value::Array(items) => Native::List(items.iter().map(lower).collect::<Result<_, _>>()?),
        Value::Object(map) => Native::Map(
            map.iter()
                .map(|(key, value)| Ok((key.clone(), lower(value)?)))
                .collect::<Result<_, PacketMalformedError>>()?,
        ),
    })
}

fn raise(native: Native) -> Result<Value, PacketMalformedError> {
    Ok(match native {
        Native::Null => Value::Null,
        Native::Bool(flag) => Value::Bool(flag),
        Native::Int(int) => Value::from(int),
        Native::UInt(int) => Value::from(int),
        Native::Float(float) => serde_json::Number::from_f64(float)
            .map(Value::Number)
            .ok_or_else(|| PacketMalformedError::new(format!("non-finite float {float}")))?,
        Native::Str(text) => Value::String(text),
        Native::List(items) => Value::Array(items.into_iter().map(raise).collect::<Result<_, _>>()?),
        Native::Map(entries) => {
            let mut map = Packet::new();
            for (key, value) in entries {
                map.insert(key, raise(value)?);
            }
            Value::Object(map)
        }
    })
}

fn encode(packet: &Packet) -> Result<Vec<u8>, PacketMalformedError> {
    let mirror = lower(&Value::Object(packet.clone()))?;
    bitcode::serialize(&mirror).map_err(PacketMalformedError::new)
}

fn decode(payload: &[u8]) -> Result<Packet, PacketMalformedError> {
    let mirror: Native = bitcode::deserialize(payload).map_err(PacketMalformedError::new)?;
    match raise(mirror)? {
        Value::Object(map) => Ok(map),
        _ => Err(PacketMalformedError::new("top level is not a mapping")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Packet {
        let value = serde_json::json!({
            "str": "string",
            "int": -3,
            "big": u64::MAX,
            "float": 52.1,
            "flag": true,
            "none": null,
            "list": [1, "two", 3.5],
            "nested": {"a": [true, false]},
        });
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn round_trip() {
        let packet = sample();
        let bytes = encode(&packet).unwrap();
        assert_eq!(decode(&bytes).unwrap(), packet);
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(decode(&[100, 4, 12, 42, 254, 1]).is_err());
    }
}
