//! Incremental forwarding of classified fragments to the client.

use crate::backend::EventSink;
use crate::classify::{Envelope, StreamFragment};
use crate::codec;
use courier_types::{EncodedFile, OutboundEvent};

/// Per-invocation accumulation of answer text and produced files.
#[derive(Debug, Default)]
pub struct Accumulator {
    text: Vec<String>,
    files: Vec<EncodedFile>,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_text(&mut self, text: impl Into<String>) {
        self.text.push(text.into());
    }

    pub fn push_file(&mut self, file: EncodedFile) {
        self.files.push(file);
    }

    /// Accumulated text joined without separator and trimmed.
    pub fn final_text(&self) -> String {
        self.text.concat().trim().to_string()
    }

    pub(crate) fn into_files(self) -> Vec<EncodedFile> {
        self.files
    }
}

/// The push side of one connection, as seen by one invocation.
pub struct Outbound<'a> {
    sink: &'a dyn EventSink,
    connection_id: &'a str,
}

impl<'a> Outbound<'a> {
    pub fn new(sink: &'a dyn EventSink, connection_id: &'a str) -> Self {
        Self {
            sink,
            connection_id,
        }
    }

    pub fn connection_id(&self) -> &str {
        self.connection_id
    }

    /// Pushes `event`. A delivery failure is logged and otherwise ignored.
    pub async fn push(&self, event: OutboundEvent) {
        if let Err(e) = self.sink.push(self.connection_id, &event).await {
            tracing::warn!(
                connection_id = %self.connection_id,
                event_type = %event.kind(),
                "failed to push event to client: {}",
                e
            );
        }
    }
}

/// Applies one fragment: pushes what the client should see now and records
/// what belongs in the final aggregate.
pub async fn forward(fragment: StreamFragment, acc: &mut Accumulator, outbound: &Outbound<'_>) {
    match fragment {
        StreamFragment::Envelope(Envelope::ContentDelta { text }) => {
            if text.is_empty() {
                return;
            }
            acc.push_text(text.clone());
            outbound.push(OutboundEvent::Delta { text }).await;
        }
        StreamFragment::Envelope(envelope) => {
            tracing::debug!(
                connection_id = %outbound.connection_id(),
                envelope = ?envelope,
                "envelope carries no client-visible content"
            );
        }
        StreamFragment::FileBundle(files) => {
            for file in files {
                tracing::debug!(
                    connection_id = %outbound.connection_id(),
                    filename = %file.name,
                    size = file.bytes.len(),
                    "collected produced file"
                );
                acc.push_file(EncodedFile {
                    base64_payload: codec::encode(&file.bytes),
                    filename: file.name,
                    mime_type: file.mime_type,
                });
            }
        }
        StreamFragment::Trace(Some(text)) if !text.is_empty() => {
            outbound.push(OutboundEvent::Thinking { text }).await;
        }
        StreamFragment::Trace(_) => {}
        StreamFragment::Unhandled(item) => {
            tracing::debug!(
                connection_id = %outbound.connection_id(),
                keys = ?item.keys(),
                "dropping unhandled stream item"
            );
        }
    }
}
