//! Building the agent request from a prompt and its retrieval results.

use courier_types::{
    InvocationInput, InvocationRequest, RetrievalResult, SupportingDocument,
    MAX_SUPPORTING_DOCUMENTS, SUPPORTING_DOCUMENT_SUFFIX,
};
use std::collections::HashSet;

/// Picks the retrieved sources to attach: recognized suffix only, first
/// occurrence of each URI, at most [`MAX_SUPPORTING_DOCUMENTS`].
pub fn select_documents(retrieval: &RetrievalResult) -> Vec<SupportingDocument> {
    let mut seen = HashSet::new();
    retrieval
        .passages
        .iter()
        .map(|passage| passage.source_uri.as_str())
        .filter(|uri| has_supporting_suffix(uri))
        .filter(|uri| seen.insert(*uri))
        .take(MAX_SUPPORTING_DOCUMENTS)
        .map(SupportingDocument::from_uri)
        .collect()
}

fn has_supporting_suffix(uri: &str) -> bool {
    uri.to_ascii_lowercase().ends_with(SUPPORTING_DOCUMENT_SUFFIX)
}

/// Builds the request for one prompt. A missing session id starts a new
/// session.
pub fn build_request(input: &InvocationInput, retrieval: &RetrievalResult) -> InvocationRequest {
    InvocationRequest::new(
        input.prompt.clone(),
        input.session_id.clone().unwrap_or_default(),
        select_documents(retrieval),
    )
}
