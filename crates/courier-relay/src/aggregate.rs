//! Consolidated events pushed once the response stream is exhausted.

use crate::forward::{Accumulator, Outbound};
use courier_types::OutboundEvent;

/// Pushes `final_text` if any non-blank text accumulated, then `files` if
/// any file did. Consumes the accumulator so it can only run once.
pub async fn finalize(acc: Accumulator, outbound: &Outbound<'_>) {
    let text = acc.final_text();
    if !text.is_empty() {
        outbound.push(OutboundEvent::FinalText { text }).await;
    }

    let files = acc.into_files();
    if !files.is_empty() {
        tracing::info!(
            connection_id = %outbound.connection_id(),
            count = files.len(),
            "delivering produced files"
        );
        outbound.push(OutboundEvent::Files { files }).await;
    }
}
