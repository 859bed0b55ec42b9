use std::{
    collections::{BTreeMap, HashMap},
    path::Path,
    sync::{Mutex, MutexGuard, PoisonError},
};

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use serde::Deserialize;
use tracing::warn;

use crate::{
    codec::Codec,
    error::ProtocolError,
    framing::{BinaryFraming, Framing, HeaderFormat, TextFraming},
    packet::Value,
    plugins::{self, BuiltinModule},
};

/// Framing options handed to codec construction, merged over the plugin's
/// defaults. Keys and value shapes are per plugin kind: binary expects
/// `byte_encoding_string` and `info_bytes`, textual expects
/// `header_length`, `encoding` and `zero_string`.
pub type Options = serde_json::Map<String, Value>;

/// Preference order used when no protocol name is given.
pub const DEFAULT_PROTOCOLS: [&str; 2] = ["msgpack", "json"];

const CODEC_CACHE_CAPACITY: usize = 256;

const BUNDLED_MANIFEST: &str = include_str!("../protocols/plugins.json");

#[derive(Clone, Copy, Debug)]
enum FramingKind {
    Binary,
    Text,
}

#[derive(Deserialize)]
struct ManifestEntry {
    packagename: String,
    #[serde(rename = "type")]
    kind: String,
}

struct Registered {
    module: BuiltinModule,
    kind: FramingKind,
}

/// Name-to-constructor map for codecs, populated from a plugin manifest.
///
/// Construction is memoized in a bounded LRU keyed by the lowercased name
/// and the canonicalized options, so equal lookups observe the same codec
/// value. Applications normally use one registry for the whole process
/// (see [`load_protocol`]); tests build their own to stay isolated.
pub struct CodecRegistry {
    entries: HashMap<String, Registered>,
    cache: Mutex<IndexMap<(String, String), Codec>>,
}

impl CodecRegistry {
    /// Registry over the manifest bundled with this crate
    /// (`protocols/plugins.json`: json, msgpack, native).
    pub fn bundled() -> Result<Self, ProtocolError> {
        Self::from_manifest_str(BUNDLED_MANIFEST)
    }

    pub fn from_manifest_path(path: impl AsRef<Path>) -> Result<Self, ProtocolError> {
        Self::from_manifest_str(&std::fs::read_to_string(path)?)
    }

    /// Parse a manifest mapping of `name -> { packagename, type }`.
    ///
    /// Entries that are ill-defined, name an unknown module, or carry an
    /// unknown type are warned about and skipped; the rest of the manifest
    /// still loads. Each surviving entry is registered under its own
    /// logical name, lowercased.
    pub fn from_manifest_str(manifest: &str) -> Result<Self, ProtocolError> {
        let plugins: serde_json::Map<String, Value> = serde_json::from_str(manifest)?;

        let mut entries = HashMap::new();
        for (name, definition) in plugins {
            let entry = match serde_json::from_value::<ManifestEntry>(definition) {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(plugin = %name, %err, "registry: ill-defined manifest entry, skipping");
                    continue;
                }
            };
            let kind = match entry.kind.as_str() {
                "bin" => FramingKind::Binary,
                "str" => FramingKind::Text,
                other => {
                    warn!(plugin = %name, kind = %other, "registry: unknown plugin type, skipping");
                    continue;
                }
            };
            let Some(module) = plugins::resolve(&entry.packagename) else {
                warn!(
                    plugin = %name,
                    package = %entry.packagename,
                    "registry: no such plugin module, skipping"
                );
                continue;
            };
            entries.insert(name.to_ascii_lowercase(), Registered { module, kind });
        }

        Ok(Self { entries, cache: Mutex::new(IndexMap::new()) })
    }

    /// Registered logical names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Build (or fetch the memoized) codec for a single name,
    /// case-insensitively. `options` are merged over the plugin defaults.
    pub fn load(&self, name: &str, options: &Options) -> Result<Codec, ProtocolError> {
        let name = name.to_ascii_lowercase();
        let key = (name.clone(), canonical_options(options));

        {
            let mut cache = lock(&self.cache);
            if let Some(codec) = cache.shift_remove(&key) {
                cache.insert(key, codec.clone());
                return Ok(codec);
            }
        }

        let entry = self
            .entries
            .get(&name)
            .ok_or_else(|| ProtocolError::UnknownProtocol(name.clone()))?;
        let codec = build(&name, entry, options)?;

        let mut cache = lock(&self.cache);
        // A concurrent lookup may have built it first; keep that one so
        // equal calls keep observing a single codec value.
        if let Some(existing) = cache.shift_remove(&key) {
            cache.insert(key, existing.clone());
            return Ok(existing);
        }
        while cache.len() >= CODEC_CACHE_CAPACITY {
            cache.shift_remove_index(0);
        }
        cache.insert(key, codec.clone());
        Ok(codec)
    }

    /// Resolve the first loadable name of an ordered preference list.
    pub fn load_first(&self, names: &[&str], options: &Options) -> Result<Codec, ProtocolError> {
        for name in names {
            match self.load(name, options) {
                Ok(codec) => return Ok(codec),
                Err(ProtocolError::UnknownProtocol(_)) => {}
                Err(err) => return Err(err),
            }
        }
        Err(ProtocolError::UnresolvedList(names.iter().map(ToString::to_string).collect()))
    }

    /// Resolve [`DEFAULT_PROTOCOLS`].
    pub fn load_default(&self, options: &Options) -> Result<Codec, ProtocolError> {
        self.load_first(&DEFAULT_PROTOCOLS, options)
    }

    /// Resolve any registered protocol, trying names in sorted order.
    pub fn load_any(&self, options: &Options) -> Result<Codec, ProtocolError> {
        let names = self.names();
        self.load_first(&names, options)
    }
}

fn lock<'a, T>(mutex: &'a Mutex<T>) -> MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Options key with a stable field order, so `{a, b}` and `{b, a}` memoize
/// to the same slot.
fn canonical_options(options: &Options) -> String {
    let sorted: BTreeMap<&String, &Value> = options.iter().collect();
    serde_json::to_string(&sorted).unwrap_or_default()
}

fn build(name: &str, entry: &Registered, options: &Options) -> Result<Codec, ProtocolError> {
    let mut args = (entry.module.default_args)();
    for (key, value) in options {
        args.insert(key.clone(), value.clone());
    }

    let framing = match entry.kind {
        FramingKind::Binary => {
            let pattern = require_str(&args, "byte_encoding_string")?;
            let info_bytes = require_u64(&args, "info_bytes")?;
            let header = HeaderFormat::parse(pattern)?;
            if header.size() as u64 != info_bytes {
                return Err(ProtocolError::BadOptions(format!(
                    "info_bytes {info_bytes} does not match the {} byte header pattern",
                    header.size()
                )));
            }
            Framing::Binary(BinaryFraming::new(header))
        }
        FramingKind::Text => {
            let header_length = require_u64(&args, "header_length")? as usize;
            let encoding = require_str(&args, "encoding")?;
            let zero_string = require_str(&args, "zero_string")?;
            Framing::Text(TextFraming::new(header_length, encoding, zero_string)?)
        }
    };

    Ok(Codec::new(name, entry.module.plugin, framing))
}

fn require_str<'a>(args: &'a Options, key: &str) -> Result<&'a str, ProtocolError> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ProtocolError::BadOptions(format!("missing or non-string option {key:?}")))
}

fn require_u64(args: &Options, key: &str) -> Result<u64, ProtocolError> {
    args.get(key)
        .and_then(Value::as_u64)
        .ok_or_else(|| ProtocolError::BadOptions(format!("missing or non-integer option {key:?}")))
}

static BUNDLED_REGISTRY: Lazy<CodecRegistry> =
    Lazy::new(|| CodecRegistry::bundled().expect("bundled plugin manifest is well-formed"));

/// Resolve a codec by name from the process-wide bundled registry.
pub fn load_protocol(name: &str, options: &Options) -> Result<Codec, ProtocolError> {
    BUNDLED_REGISTRY.load(name, options)
}

/// Resolve the first loadable name of `names` from the bundled registry.
pub fn load_protocols(names: &[&str], options: &Options) -> Result<Codec, ProtocolError> {
    BUNDLED_REGISTRY.load_first(names, options)
}

/// Resolve [`DEFAULT_PROTOCOLS`] from the bundled registry.
pub fn load_default_protocol(options: &Options) -> Result<Codec, ProtocolError> {
    BUNDLED_REGISTRY.load_default(options)
}

/// Resolve any bundled protocol, trying names in sorted order.
pub fn load_any_protocol(options: &Options) -> Result<Codec, ProtocolError> {
    BUNDLED_REGISTRY.load_any(options)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn bundled_codecs_all_build() {
        let registry = CodecRegistry::bundled().unwrap();
        assert_eq!(registry.names(), ["json", "msgpack", "native"]);
        for name in ["json", "msgpack", "native"] {
            registry.load(name, &Options::new()).unwrap();
        }
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let registry = CodecRegistry::bundled().unwrap();
        let lower = registry.load("msgpack", &Options::new()).unwrap();
        let shouty = registry.load("MsgPack", &Options::new()).unwrap();
        assert_eq!(lower, shouty);
    }

    #[test]
    fn unknown_protocol_errors() {
        let registry = CodecRegistry::bundled().unwrap();
        assert!(matches!(
            registry.load("carrier-pigeon", &Options::new()),
            Err(ProtocolError::UnknownProtocol(_))
        ));
    }

    #[test]
    fn list_resolution_takes_the_first_loadable_name() {
        let registry = CodecRegistry::bundled().unwrap();
        let codec = registry.load_first(&["carrier-pigeon", "json"], &Options::new()).unwrap();
        assert_eq!(codec.name(), "json");
        assert!(matches!(
            registry.load_first(&["smoke-signal", "carrier-pigeon"], &Options::new()),
            Err(ProtocolError::UnresolvedList(_))
        ));
    }

    #[test]
    fn default_preference_is_msgpack_then_json() {
        let registry = CodecRegistry::bundled().unwrap();
        assert_eq!(registry.load_default(&Options::new()).unwrap().name(), "msgpack");
    }

    #[test]
    fn construction_is_memoized_per_name_and_options() {
        let registry = CodecRegistry::bundled().unwrap();

        let plain_a = registry.load("json", &Options::new()).unwrap();
        let plain_b = registry.load("json", &Options::new()).unwrap();
        assert_eq!(plain_a, plain_b);

        let mut wide = Options::new();
        wide.insert("header_length".into(), 16.into());
        let wide_codec = registry.load("json", &wide).unwrap();
        assert_ne!(plain_a, wide_codec);
    }

    #[test]
    fn option_order_does_not_split_the_cache() {
        let registry = CodecRegistry::bundled().unwrap();

        let mut forward = Options::new();
        forward.insert("header_length".into(), 16.into());
        forward.insert("zero_string".into(), " ".into());
        let mut backward = Options::new();
        backward.insert("zero_string".into(), " ".into());
        backward.insert("header_length".into(), 16.into());

        assert_eq!(
            registry.load("json", &forward).unwrap(),
            registry.load("json", &backward).unwrap()
        );
    }

    #[test]
    fn cache_is_bounded() {
        let registry = CodecRegistry::bundled().unwrap();
        let first = registry.load("json", &Options::new()).unwrap();
        for i in 0..CODEC_CACHE_CAPACITY + 8 {
            let mut options = Options::new();
            options.insert("header_length".into(), (16 + i).into());
            registry.load("json", &options).unwrap();
        }
        // The original entry was evicted, so an equal lookup rebuilds.
        let rebuilt = registry.load("json", &Options::new()).unwrap();
        assert_ne!(first, rebuilt);
    }

    #[test]
    fn bad_options_are_rejected() {
        let registry = CodecRegistry::bundled().unwrap();

        let mut mismatched = Options::new();
        mismatched.insert("info_bytes".into(), 12.into());
        assert!(matches!(
            registry.load("msgpack", &mismatched),
            Err(ProtocolError::BadOptions(_))
        ));

        let mut garbled = Options::new();
        garbled.insert("byte_encoding_string".into(), "five dollars".into());
        assert!(registry.load("msgpack", &garbled).is_err());
    }

    #[test]
    fn manifest_skips_broken_entries() {
        let registry = CodecRegistry::from_manifest_str(
            r#"{
                "json": { "packagename": "json", "type": "str" },
                "halfbaked": { "type": "bin" },
                "exotic": { "packagename": "quantum", "type": "bin" },
                "odd": { "packagename": "json", "type": "telepathy" }
            }"#,
        )
        .unwrap();
        assert_eq!(registry.names(), ["json"]);
    }

    #[test]
    fn manifest_must_be_a_mapping() {
        assert!(matches!(
            CodecRegistry::from_manifest_str("[1, 2, 3]"),
            Err(ProtocolError::ManifestParse(_))
        ));
    }

    #[test]
    fn manifest_loads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "wire": {{ "packagename": "msgpack", "type": "bin" }} }}"#).unwrap();
        let registry = CodecRegistry::from_manifest_path(file.path()).unwrap();
        assert_eq!(registry.load("wire", &Options::new()).unwrap().name(), "wire");
    }

    #[test]
    fn codec_round_trips_a_packet() {
        let registry = CodecRegistry::bundled().unwrap();
        let packet = match serde_json::json!({"str": "string", "int": 2, "float": 52.1}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        for name in ["json", "msgpack", "native"] {
            let codec = registry.load(name, &Options::new()).unwrap();
            let mut wire = Vec::new();
            codec.send(&mut wire, &packet).unwrap();
            let got = codec.recv(&mut std::io::Cursor::new(wire)).unwrap();
            assert_eq!(got.as_ref(), Some(&packet), "round trip failed for {name}");
        }
    }
}
