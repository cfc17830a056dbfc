//! Shared types and constants for the Courier relay.
//!
//! This crate holds the values that cross component boundaries: the
//! inbound invocation surface, the retrieval result consumed while building
//! an [`InvocationRequest`], and the [`OutboundEvent`]s pushed to a client
//! connection. The relay core and the server both depend on it; it depends
//! on nothing but `serde`.

use serde::{Deserialize, Serialize};

mod event;
pub use event::{EncodedFile, EventKind, OutboundEvent};

/// Maximum number of supporting documents attached to one invocation.
pub const MAX_SUPPORTING_DOCUMENTS: usize = 5;

/// File suffix a retrieved source must carry to be attached as a
/// supporting document. Compared case-insensitively.
pub const SUPPORTING_DOCUMENT_SUFFIX: &str = ".csv";

/// What an upstream router hands to the relay for one prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationInput {
    pub prompt: String,
    pub connection_id: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Summary of a finished invocation, separate from the events already
/// pushed while it ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationOutcome {
    pub status_code: u16,
    pub body: String,
}

impl InvocationOutcome {
    /// The outcome reported once the stream has been fully relayed.
    pub fn complete() -> Self {
        Self {
            status_code: 200,
            body: serde_json::json!({ "result": "Streaming complete" }).to_string(),
        }
    }

    /// The outcome reported when the invocation aborted.
    pub fn failed(message: impl std::fmt::Display) -> Self {
        Self {
            status_code: 500,
            body: serde_json::json!({ "error": message.to_string() }).to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

/// One passage returned by the knowledge index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievedPassage {
    pub source_uri: String,
    pub text: String,
}

impl RetrievedPassage {
    pub fn new(source_uri: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            source_uri: source_uri.into(),
            text: text.into(),
        }
    }
}

/// Ordered passages returned for a prompt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub passages: Vec<RetrievedPassage>,
}

impl From<Vec<RetrievedPassage>> for RetrievalResult {
    fn from(passages: Vec<RetrievedPassage>) -> Self {
        Self { passages }
    }
}

/// A retrieved file handed to the agent alongside the prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportingDocument {
    /// Location of the document, as reported by the index.
    pub uri: String,
    /// Last path segment of `uri`.
    pub name: String,
}

impl SupportingDocument {
    pub fn from_uri(uri: impl Into<String>) -> Self {
        let uri = uri.into();
        let name = uri
            .rsplit('/')
            .next()
            .filter(|segment| !segment.is_empty())
            .unwrap_or("unknown")
            .to_string();
        Self { uri, name }
    }
}

/// A fully prepared call to the agent backend.
///
/// Built once per prompt and never mutated. Trace output is always
/// requested: reasoning traces are what feed `thinking` events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationRequest {
    prompt: String,
    session_id: String,
    documents: Vec<SupportingDocument>,
}

impl InvocationRequest {
    /// Creates a request. An empty `session_id` asks the backend to open a
    /// new session. Documents beyond [`MAX_SUPPORTING_DOCUMENTS`] are
    /// dropped.
    pub fn new(
        prompt: impl Into<String>,
        session_id: impl Into<String>,
        mut documents: Vec<SupportingDocument>,
    ) -> Self {
        documents.truncate(MAX_SUPPORTING_DOCUMENTS);
        Self {
            prompt: prompt.into(),
            session_id: session_id.into(),
            documents,
        }
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn documents(&self) -> &[SupportingDocument] {
        &self.documents
    }

    pub fn enable_trace(&self) -> bool {
        true
    }
}
