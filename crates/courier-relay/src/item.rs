//! Raw items as they arrive on the backend response stream.

use serde_json::{json, Value};

/// One element of the backend's response stream.
///
/// The stream mixes plain text chunks, JSON-wrapped lifecycle markers, file
/// payloads and diagnostic traces, so items are kept as loosely-shaped JSON
/// and only interpreted by [`crate::classify`].
///
/// Byte payloads inside an item take one of three forms:
///
/// | Form | Bytes |
/// |------|-------|
/// | `"text"` | the UTF-8 bytes of the string |
/// | `[104, 105]` | each integer in `0..=255` |
/// | `{"base64": "aGk="}` | standard base64, decoded |
///
/// and may be wrapped as `{"bytes": <payload>}`.
#[derive(Debug, Clone, PartialEq)]
pub struct RawStreamItem(Value);

impl RawStreamItem {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// A `chunk` item carrying `bytes`. Valid UTF-8 is stored as a string,
    /// anything else as a byte array.
    pub fn chunk(bytes: impl AsRef<[u8]>) -> Self {
        Self(json!({ "chunk": { "bytes": bytes_payload(bytes.as_ref()) } }))
    }

    /// A `files` item carrying `(name, type, bytes)` entries.
    pub fn files<'a>(files: impl IntoIterator<Item = (&'a str, &'a str, &'a [u8])>) -> Self {
        let entries: Vec<Value> = files
            .into_iter()
            .map(|(name, mime_type, bytes)| {
                json!({
                    "name": name,
                    "type": mime_type,
                    "bytes": { "base64": crate::codec::encode(bytes) },
                })
            })
            .collect();
        Self(json!({ "files": { "files": entries } }))
    }

    /// A `trace` item whose orchestration trace carries `rationale`.
    pub fn rationale(rationale: &str) -> Self {
        Self(json!({
            "trace": { "trace": { "orchestrationTrace": { "rationale": { "text": rationale } } } }
        }))
    }

    /// Top-level member `key`, if the item is an object.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.as_object().and_then(|map| map.get(key))
    }

    /// Top-level keys, for logging.
    pub fn keys(&self) -> Vec<&str> {
        self.0
            .as_object()
            .map(|map| map.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

impl From<Value> for RawStreamItem {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

fn bytes_payload(bytes: &[u8]) -> Value {
    match std::str::from_utf8(bytes) {
        Ok(text) => Value::String(text.to_string()),
        Err(_) => Value::Array(bytes.iter().map(|b| Value::from(*b)).collect()),
    }
}

/// Extracts a byte payload. Shapes outside the documented forms, including
/// undecodable base64, yield no bytes.
pub(crate) fn decode_bytes(payload: &Value) -> Vec<u8> {
    match payload {
        Value::String(text) => text.as_bytes().to_vec(),
        Value::Array(values) => values
            .iter()
            .map(|v| v.as_u64().and_then(|n| u8::try_from(n).ok()))
            .collect::<Option<Vec<u8>>>()
            .unwrap_or_else(|| {
                tracing::debug!(len = values.len(), "byte array holds non-byte values; ignoring");
                Vec::new()
            }),
        Value::Object(map) => {
            if let Some(inner) = map.get("bytes") {
                decode_bytes(inner)
            } else if let Some(encoded) = map.get("base64").and_then(Value::as_str) {
                crate::codec::decode(encoded).unwrap_or_else(|e| {
                    tracing::debug!("undecodable base64 payload: {}", e);
                    Vec::new()
                })
            } else {
                Vec::new()
            }
        }
        _ => Vec::new(),
    }
}
