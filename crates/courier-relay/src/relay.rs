//! One prompt, end to end: retrieve, invoke, stream, finalize.

use crate::aggregate::finalize;
use crate::backend::{AgentBackend, EventSink, Retriever};
use crate::classify::classify;
use crate::error::RelayError;
use crate::forward::{forward, Accumulator, Outbound};
use crate::request::build_request;
use crate::retry::{invoke_with_retry, RetryPolicy};
use courier_types::{InvocationInput, InvocationOutcome};
use futures_util::StreamExt;
use std::sync::Arc;

/// Runs invocations against injected collaborators.
///
/// Cheap to clone; each call to [`Relay::run`] owns its own accumulator, so
/// any number of invocations may run concurrently.
#[derive(Clone)]
pub struct Relay {
    retriever: Arc<dyn Retriever>,
    backend: Arc<dyn AgentBackend>,
    sink: Arc<dyn EventSink>,
    retry: RetryPolicy,
}

impl Relay {
    pub fn new(
        retriever: Arc<dyn Retriever>,
        backend: Arc<dyn AgentBackend>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            retriever,
            backend,
            sink,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Relays the agent's answer to `input.prompt` to the input's connection.
    ///
    /// # Errors
    ///
    /// Only backend failures abort: retrieval, invocation (after retries), or
    /// a broken response stream. Delta and thinking events pushed before a
    /// mid-stream failure are not retracted and no final events follow.
    pub async fn run(&self, input: &InvocationInput) -> Result<(), RelayError> {
        let connection_id = input.connection_id.as_str();

        let retrieval = self
            .retriever
            .retrieve(&input.prompt)
            .await
            .map_err(RelayError::Retrieval)?;
        let request = build_request(input, &retrieval);
        tracing::info!(
            connection_id = %connection_id,
            passages = retrieval.passages.len(),
            documents = request.documents().len(),
            new_session = request.session_id().is_empty(),
            "invoking agent"
        );

        let mut stream = invoke_with_retry(self.backend.as_ref(), &request, &self.retry).await?;

        let outbound = Outbound::new(self.sink.as_ref(), connection_id);
        let mut acc = Accumulator::new();
        let mut items = 0usize;

        while let Some(next) = stream.next().await {
            let item = next.map_err(|e| {
                tracing::error!(
                    connection_id = %connection_id,
                    items,
                    "agent response stream failed: {}",
                    e
                );
                RelayError::Stream(e)
            })?;
            items += 1;

            if let Some(fragment) = classify(item) {
                tracing::trace!(connection_id = %connection_id, kind = fragment.label(), "fragment");
                forward(fragment, &mut acc, &outbound).await;
            }
        }

        finalize(acc, &outbound).await;
        tracing::info!(connection_id = %connection_id, items, "agent response relayed");
        Ok(())
    }

    /// Runs the invocation and reduces the result to a status summary.
    pub async fn handle(&self, input: &InvocationInput) -> InvocationOutcome {
        match self.run(input).await {
            Ok(()) => InvocationOutcome::complete(),
            Err(e) => {
                tracing::error!(connection_id = %input.connection_id, "invocation failed: {}", e);
                InvocationOutcome::failed(e)
            }
        }
    }
}
