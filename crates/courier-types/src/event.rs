//! Events pushed to a client connection while an invocation runs.

use serde::{Deserialize, Serialize};

/// The unit pushed to a client connection.
///
/// `Delta` and `Thinking` are pushed while the backend stream is being
/// consumed; `FinalText` and `Files` only once it is exhausted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundEvent {
    /// An incremental piece of answer text.
    Delta { text: String },
    /// Reasoning text from a backend trace.
    Thinking { text: String },
    /// The whole answer, trimmed.
    FinalText { text: String },
    /// Every file the backend produced.
    Files { files: Vec<EncodedFile> },
}

/// Discriminant of an [`OutboundEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Delta,
    Thinking,
    FinalText,
    Files,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Delta => "delta",
            Self::Thinking => "thinking",
            Self::FinalText => "final_text",
            Self::Files => "files",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A produced file, ready for JSON transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedFile {
    pub filename: String,
    #[serde(rename = "type")]
    pub mime_type: String,
    /// Standard base64 of the file bytes.
    #[serde(rename = "base64")]
    pub base64_payload: String,
}

/// Wire envelope. Every relay frame carries `statusCode`.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Frame<'a> {
    status_code: u16,
    #[serde(flatten)]
    event: &'a OutboundEvent,
}

impl OutboundEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Delta { .. } => EventKind::Delta,
            Self::Thinking { .. } => EventKind::Thinking,
            Self::FinalText { .. } => EventKind::FinalText,
            Self::Files { .. } => EventKind::Files,
        }
    }

    /// Text carried by the event, if any.
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Delta { text } | Self::Thinking { text } | Self::FinalText { text } => {
                Some(text)
            }
            Self::Files { .. } => None,
        }
    }

    /// Serializes the event as the JSON frame sent to clients.
    pub fn to_frame_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&Frame {
            status_code: 200,
            event: self,
        })
    }
}
