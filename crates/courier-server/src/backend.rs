//! HTTP clients for the knowledge index and the agent backend.

use async_trait::async_trait;
use courier_relay::{AgentBackend, BackendError, ItemStream, RawStreamItem, Retriever};
use courier_types::{InvocationRequest, RetrievalResult, RetrievedPassage};
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

/// Timeout for a retrieval round trip.
const RETRIEVAL_TIMEOUT: Duration = Duration::from_secs(30);

/// Use case attached to documents handed to the agent.
const DOCUMENT_USE_CASE: &str = "CODE_INTERPRETER";

fn build_http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("courier/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Retrieval
// ---------------------------------------------------------------------------

/// Queries the knowledge index over HTTP.
pub struct HttpRetriever {
    client: reqwest::Client,
    url: String,
    number_of_results: u32,
}

impl HttpRetriever {
    pub fn new(url: impl Into<String>, number_of_results: u32) -> Self {
        Self {
            client: build_http_client(RETRIEVAL_TIMEOUT),
            url: url.into(),
            number_of_results,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RetrieveResponse {
    #[serde(default)]
    retrieval_results: Vec<RetrievalHit>,
}

#[derive(Debug, Deserialize)]
struct RetrievalHit {
    #[serde(default)]
    content: Option<HitContent>,
    #[serde(default)]
    metadata: Option<HitMetadata>,
}

#[derive(Debug, Deserialize)]
struct HitContent {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HitMetadata {
    #[serde(default, rename = "sourceUri", alias = "x-amz-bedrock-kb-source-uri")]
    source_uri: Option<String>,
}

impl From<RetrieveResponse> for RetrievalResult {
    fn from(response: RetrieveResponse) -> Self {
        response
            .retrieval_results
            .into_iter()
            .map(|hit| {
                RetrievedPassage::new(
                    hit.metadata.and_then(|m| m.source_uri).unwrap_or_default(),
                    hit.content.and_then(|c| c.text).unwrap_or_default(),
                )
            })
            .collect::<Vec<_>>()
            .into()
    }
}

#[async_trait]
impl Retriever for HttpRetriever {
    async fn retrieve(&self, prompt: &str) -> Result<RetrievalResult, BackendError> {
        let response = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({
                "text": prompt,
                "numberOfResults": self.number_of_results,
            }))
            .send()
            .await
            .map_err(|e| BackendError::transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let body: RetrieveResponse = response
            .json()
            .await
            .map_err(|e| BackendError::new("malformedResponse", e.to_string()))?;
        Ok(body.into())
    }
}

// ---------------------------------------------------------------------------
// Agent invocation
// ---------------------------------------------------------------------------

/// Invokes the agent over HTTP and reads its newline-delimited JSON stream.
pub struct HttpAgentBackend {
    client: reqwest::Client,
    url: String,
}

impl HttpAgentBackend {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: build_http_client(timeout),
            url: url.into(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InvokeBody<'a> {
    input_text: &'a str,
    session_id: &'a str,
    enable_trace: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_state: Option<SessionState<'a>>,
}

#[derive(Debug, Serialize)]
struct SessionState<'a> {
    files: Vec<SessionFile<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionFile<'a> {
    name: &'a str,
    source: FileSource<'a>,
    use_case: &'static str,
}

#[derive(Debug, Serialize)]
struct FileSource<'a> {
    uri: &'a str,
}

impl<'a> From<&'a InvocationRequest> for InvokeBody<'a> {
    fn from(request: &'a InvocationRequest) -> Self {
        let files: Vec<SessionFile<'a>> = request
            .documents()
            .iter()
            .map(|doc| SessionFile {
                name: &doc.name,
                source: FileSource { uri: &doc.uri },
                use_case: DOCUMENT_USE_CASE,
            })
            .collect();
        Self {
            input_text: request.prompt(),
            session_id: request.session_id(),
            enable_trace: request.enable_trace(),
            session_state: (!files.is_empty()).then_some(SessionState { files }),
        }
    }
}

#[async_trait]
impl AgentBackend for HttpAgentBackend {
    async fn invoke(&self, request: &InvocationRequest) -> Result<ItemStream, BackendError> {
        let response = self
            .client
            .post(&self.url)
            .json(&InvokeBody::from(request))
            .send()
            .await
            .map_err(|e| BackendError::transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        Ok(ndjson_items(response.bytes_stream()))
    }
}

// ---------------------------------------------------------------------------
// Wire helpers
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default, rename = "__type", alias = "type")]
    kind: Option<String>,
    #[serde(default, alias = "Message")]
    message: Option<String>,
}

/// Turns a non-success response into a [`BackendError`]. The cause is the
/// body's error type when present; otherwise it is derived from the status so
/// that 500 and 424 still read as the transient categories they denote.
async fn error_from_response(response: reqwest::Response) -> BackendError {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    let body = serde_json::from_str::<ErrorBody>(&text).ok();

    let cause = body
        .as_ref()
        .and_then(|b| b.kind.clone())
        .unwrap_or_else(|| cause_for_status(status.as_u16()));
    let message = body
        .and_then(|b| b.message)
        .unwrap_or_else(|| format!("backend responded {}: {}", status, text.trim()));

    BackendError::new(cause, message)
}

fn cause_for_status(status: u16) -> String {
    match status {
        500 => "internalServerException".to_string(),
        424 => "dependencyFailedException".to_string(),
        other => format!("http{}", other),
    }
}

/// Longest stream line accepted. File bundles arrive as one line, so this
/// bounds the largest produced file as well.
const MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

struct LineSplitter<S> {
    inner: Pin<Box<S>>,
    buffer: Vec<u8>,
    /// Prefix of `buffer` already known to hold no newline.
    scanned: usize,
    max_line: usize,
    ready: VecDeque<Vec<u8>>,
    failure: Option<BackendError>,
    finished: bool,
}

impl<S> LineSplitter<S> {
    fn split_lines(&mut self) {
        while let Some(offset) = self.buffer[self.scanned..].iter().position(|b| *b == b'\n') {
            let end = self.scanned + offset;
            let line: Vec<u8> = self.buffer.drain(..=end).collect();
            self.scanned = 0;
            if !is_blank(&line) {
                self.ready.push_back(line);
            }
        }
        self.scanned = self.buffer.len();

        if self.buffer.len() > self.max_line {
            self.fail(BackendError::new(
                "malformedResponse",
                format!("agent stream line exceeds {} bytes", self.max_line),
            ));
        }
    }

    /// Stops reading. Complete lines already split are still yielded first.
    fn fail(&mut self, error: BackendError) {
        self.buffer.clear();
        self.scanned = 0;
        self.failure = Some(error);
        self.finished = true;
    }
}

/// Splits a byte stream into newline-delimited JSON items.
///
/// A line that is not JSON becomes a string item, which classifies as
/// unhandled. A transport error, or a line longer than 16 MiB, ends the
/// stream after being yielded.
pub fn ndjson_items<S, B, E>(bytes: S) -> ItemStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    split_ndjson(bytes, MAX_LINE_BYTES)
}

fn split_ndjson<S, B, E>(bytes: S, max_line: usize) -> ItemStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let state = LineSplitter {
        inner: Box::pin(bytes),
        buffer: Vec::new(),
        scanned: 0,
        max_line,
        ready: VecDeque::new(),
        failure: None,
        finished: false,
    };

    futures_util::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(line) = state.ready.pop_front() {
                return Some((Ok(parse_line(&line)), state));
            }
            if let Some(error) = state.failure.take() {
                return Some((Err(error), state));
            }
            if state.finished {
                if is_blank(&state.buffer) {
                    return None;
                }
                let line = std::mem::take(&mut state.buffer);
                return Some((Ok(parse_line(&line)), state));
            }
            match state.inner.next().await {
                Some(Ok(chunk)) => {
                    state.buffer.extend_from_slice(chunk.as_ref());
                    state.split_lines();
                }
                Some(Err(e)) => {
                    state.ready.clear();
                    state.fail(BackendError::transport(e.to_string()));
                }
                None => state.finished = true,
            }
        }
    })
    .boxed()
}

fn is_blank(line: &[u8]) -> bool {
    line.iter().all(u8::is_ascii_whitespace)
}

fn parse_line(line: &[u8]) -> RawStreamItem {
    match serde_json::from_slice::<Value>(line) {
        Ok(value) => RawStreamItem::new(value),
        Err(e) => {
            tracing::debug!("agent stream line is not JSON: {}", e);
            RawStreamItem::new(Value::String(String::from_utf8_lossy(line).trim().to_string()))
        }
    }
}
