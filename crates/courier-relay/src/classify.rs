//! Classification of raw stream items by structural inspection.
//!
//! The backend does not publish a closed schema for its stream, so items are
//! recognised by the keys they carry and anything unfamiliar degrades to
//! [`StreamFragment::Unhandled`] instead of failing the response.

use crate::item::{decode_bytes, RawStreamItem};
use serde_json::{Map, Value};

/// Path from a `trace` member to the orchestration rationale text.
const RATIONALE_PATH: [&str; 4] = ["trace", "orchestrationTrace", "rationale", "text"];

/// Lifecycle or content marker decoded from a `chunk`.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    MessageStart,
    /// Answer text. Chunks that are not JSON objects land here verbatim.
    ContentDelta { text: String },
    MessageStop,
    /// A JSON object with none of the known keys.
    Unrecognized(Value),
}

/// A file delivered by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachedFile {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// The semantic kind of one stream item.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFragment {
    Envelope(Envelope),
    FileBundle(Vec<AttachedFile>),
    /// Reasoning annotation; `None` when the trace carries no rationale.
    Trace(Option<String>),
    Unhandled(RawStreamItem),
}

impl StreamFragment {
    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Envelope(Envelope::MessageStart) => "message_start",
            Self::Envelope(Envelope::ContentDelta { .. }) => "content_delta",
            Self::Envelope(Envelope::MessageStop) => "message_stop",
            Self::Envelope(Envelope::Unrecognized(_)) => "unrecognized_envelope",
            Self::FileBundle(_) => "file_bundle",
            Self::Trace(_) => "trace",
            Self::Unhandled(_) => "unhandled",
        }
    }
}

/// Classifies one raw item.
///
/// Returns `None` only for a chunk whose text is blank; such items are
/// no-ops. Every other item yields exactly one fragment.
pub fn classify(item: RawStreamItem) -> Option<StreamFragment> {
    if let Some(chunk) = item.get("chunk") {
        return classify_chunk(chunk).map(StreamFragment::Envelope);
    }
    if let Some(files) = item.get("files") {
        return Some(StreamFragment::FileBundle(classify_files(files)));
    }
    if let Some(trace) = item.get("trace") {
        return Some(StreamFragment::Trace(rationale_text(trace)));
    }
    Some(StreamFragment::Unhandled(item))
}

fn classify_chunk(chunk: &Value) -> Option<Envelope> {
    let bytes = decode_bytes(chunk);
    let decoded = String::from_utf8_lossy(&bytes);
    let trimmed = decoded.trim();
    if trimmed.is_empty() {
        return None;
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(map)) => Some(classify_envelope(map)),
        // Plain model text. Surrounding whitespace is kept so consecutive
        // deltas concatenate into readable text.
        _ => Some(Envelope::ContentDelta {
            text: decoded.into_owned(),
        }),
    }
}

fn classify_envelope(map: Map<String, Value>) -> Envelope {
    if map.contains_key("messageStart") {
        Envelope::MessageStart
    } else if let Some(block) = map.get("contentBlockDelta") {
        let text = block
            .get("delta")
            .and_then(|delta| delta.get("text"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Envelope::ContentDelta { text }
    } else if map.contains_key("messageStop") {
        Envelope::MessageStop
    } else {
        Envelope::Unrecognized(Value::Object(map))
    }
}

fn classify_files(files: &Value) -> Vec<AttachedFile> {
    let entries = match files {
        Value::Array(entries) => entries.as_slice(),
        other => other
            .get("files")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default(),
    };
    entries.iter().map(attached_file).collect()
}

fn attached_file(entry: &Value) -> AttachedFile {
    let field = |key: &str| {
        entry
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string()
    };
    AttachedFile {
        name: field("name"),
        mime_type: field("type"),
        bytes: entry.get("bytes").map(decode_bytes).unwrap_or_default(),
    }
}

fn rationale_text(trace: &Value) -> Option<String> {
    RATIONALE_PATH
        .iter()
        .try_fold(trace, |node, key| node.get(*key))
        .and_then(Value::as_str)
        .map(str::to_string)
}
