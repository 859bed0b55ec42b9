pub use serde_json::Value;

/// Top-level message payload: a string-keyed map of JSON-like values.
///
/// The value domain is {null, bool, integer, float, string, list, map};
/// every shipped codec round-trips this domain exactly. "No packet"
/// (a decode failure or a disconnect) is modelled as `Option<Packet>`
/// at the API boundaries, never as a variant inside the packet itself.
pub type Packet = serde_json::Map<String, Value>;
