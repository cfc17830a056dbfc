use async_trait::async_trait;
use courier_relay::{
    AgentBackend, BackendError, DeliveryError, EventSink, InvocationError, ItemStream,
    RawStreamItem, Relay, RelayError, Retriever, RetryPolicy,
};
use courier_types::{
    InvocationInput, InvocationRequest, OutboundEvent, RetrievalResult, RetrievedPassage,
};
use futures_util::StreamExt;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct FixedRetriever(Result<RetrievalResult, BackendError>);

#[async_trait]
impl Retriever for FixedRetriever {
    async fn retrieve(&self, _prompt: &str) -> Result<RetrievalResult, BackendError> {
        self.0.clone()
    }
}

/// Answers every invocation with the same items, remembering each request.
struct StreamingBackend {
    items: Vec<Result<RawStreamItem, BackendError>>,
    failures_first: Mutex<Vec<BackendError>>,
    requests: Mutex<Vec<InvocationRequest>>,
}

impl StreamingBackend {
    fn new(items: Vec<Result<RawStreamItem, BackendError>>) -> Self {
        Self {
            items,
            failures_first: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn failing_first(self, failures: Vec<BackendError>) -> Self {
        *self.failures_first.lock().unwrap() = failures;
        self
    }
}

#[async_trait]
impl AgentBackend for StreamingBackend {
    async fn invoke(&self, request: &InvocationRequest) -> Result<ItemStream, BackendError> {
        self.requests.lock().unwrap().push(request.clone());
        {
            let mut failures = self.failures_first.lock().unwrap();
            if !failures.is_empty() {
                return Err(failures.remove(0));
            }
        }
        Ok(futures_util::stream::iter(self.items.clone()).boxed())
    }
}

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<(String, OutboundEvent)>>,
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn push(&self, connection_id: &str, event: &OutboundEvent) -> Result<(), DeliveryError> {
        self.events
            .lock()
            .unwrap()
            .push((connection_id.to_string(), event.clone()));
        Ok(())
    }
}

fn input(connection_id: &str) -> InvocationInput {
    InvocationInput {
        prompt: "Who was booked yesterday?".to_string(),
        connection_id: connection_id.to_string(),
        session_id: Some("session-1".to_string()),
    }
}

fn passages() -> RetrievalResult {
    vec![
        RetrievedPassage::new("s3://kb/roster/today.csv", "name,charge"),
        RetrievedPassage::new("s3://kb/roster/today.csv", "name,charge"),
        RetrievedPassage::new("s3://kb/policy.pdf", "policy"),
        RetrievedPassage::new("s3://kb/condemned.csv", "name"),
    ]
    .into()
}

#[tokio::test]
async fn relays_answer_and_attaches_selected_documents() {
    let backend = Arc::new(StreamingBackend::new(vec![
        Ok(RawStreamItem::chunk(r#"{"messageStart":{}}"#)),
        Ok(RawStreamItem::rationale("Checking the roster table.")),
        Ok(RawStreamItem::chunk("Three people ")),
        Ok(RawStreamItem::chunk(r#"{"contentBlockDelta":{"delta":{"text":"were booked."}}}"#)),
        Ok(RawStreamItem::files([("bookings.csv", "text/csv", &b"a,b\n"[..])])),
        Ok(RawStreamItem::chunk(r#"{"messageStop":{}}"#)),
    ]));
    let sink = Arc::new(RecordingSink::default());
    let relay = Relay::new(
        Arc::new(FixedRetriever(Ok(passages()))),
        backend.clone(),
        sink.clone(),
    );

    let outcome = relay.handle(&input("conn-a")).await;
    assert_eq!(outcome.status_code, 200);
    assert!(outcome.body.contains("Streaming complete"));

    let requests = backend.requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].session_id(), "session-1");
    let names: Vec<&str> = requests[0]
        .documents()
        .iter()
        .map(|d| d.name.as_str())
        .collect();
    assert_eq!(names, vec!["today.csv", "condemned.csv"]);

    let events = sink.events.lock().unwrap().clone();
    assert!(events.iter().all(|(conn, _)| conn == "conn-a"));
    let frames: Vec<serde_json::Value> = events
        .iter()
        .map(|(_, e)| serde_json::from_str(&e.to_frame_json().unwrap()).unwrap())
        .collect();
    assert_eq!(
        frames,
        vec![
            json!({ "statusCode": 200, "type": "thinking", "text": "Checking the roster table." }),
            json!({ "statusCode": 200, "type": "delta", "text": "Three people " }),
            json!({ "statusCode": 200, "type": "delta", "text": "were booked." }),
            json!({ "statusCode": 200, "type": "final_text", "text": "Three people were booked." }),
            json!({ "statusCode": 200, "type": "files", "files": [
                { "filename": "bookings.csv", "type": "text/csv", "base64": "YSxiCg==" }
            ]}),
        ]
    );
}

#[tokio::test]
async fn retrieval_failure_aborts_before_invocation() {
    let backend = Arc::new(StreamingBackend::new(Vec::new()));
    let sink = Arc::new(RecordingSink::default());
    let relay = Relay::new(
        Arc::new(FixedRetriever(Err(BackendError::new(
            "resourceNotFoundException",
            "knowledge base not found",
        )))),
        backend.clone(),
        sink.clone(),
    );

    let err = relay.run(&input("conn-b")).await.unwrap_err();
    assert!(matches!(err, RelayError::Retrieval(_)));
    assert!(backend.requests.lock().unwrap().is_empty());
    assert!(sink.events.lock().unwrap().is_empty());

    let outcome = relay.handle(&input("conn-b")).await;
    assert_eq!(outcome.status_code, 500);
    assert!(outcome.body.contains("knowledge base not found"));
}

#[tokio::test]
async fn mid_stream_failure_keeps_pushed_deltas_and_skips_finalize() {
    let backend = Arc::new(StreamingBackend::new(vec![
        Ok(RawStreamItem::chunk("partial ")),
        Ok(RawStreamItem::rationale("still thinking")),
        Err(BackendError::new("throttlingException", "stream interrupted")),
        Ok(RawStreamItem::chunk("never seen")),
    ]));
    let sink = Arc::new(RecordingSink::default());
    let relay = Relay::new(
        Arc::new(FixedRetriever(Ok(RetrievalResult::default()))),
        backend,
        sink.clone(),
    );

    let err = relay.run(&input("conn-c")).await.unwrap_err();
    assert!(matches!(err, RelayError::Stream(ref e) if e.message == "stream interrupted"));

    let kinds: Vec<&str> = sink
        .events
        .lock()
        .unwrap()
        .iter()
        .map(|(_, e)| e.kind().as_str())
        .collect();
    assert_eq!(kinds, vec!["delta", "thinking"]);
}

#[tokio::test(start_paused = true)]
async fn transient_invocation_failures_are_retried_before_streaming() {
    let backend = Arc::new(
        StreamingBackend::new(vec![Ok(RawStreamItem::chunk("ok"))]).failing_first(vec![
            BackendError::new("dependencyFailedException", "action group lambda timed out"),
        ]),
    );
    let sink = Arc::new(RecordingSink::default());
    let relay = Relay::new(
        Arc::new(FixedRetriever(Ok(RetrievalResult::default()))),
        backend.clone(),
        sink.clone(),
    );

    relay.run(&input("conn-d")).await.unwrap();
    assert_eq!(backend.requests.lock().unwrap().len(), 2);
    let kinds: Vec<&str> = sink
        .events
        .lock()
        .unwrap()
        .iter()
        .map(|(_, e)| e.kind().as_str())
        .collect();
    assert_eq!(kinds, vec!["delta", "final_text"]);
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_surface_without_any_push() {
    let failures = vec![
        BackendError::new("internalServerException", "1"),
        BackendError::new("internalServerException", "2"),
    ];
    let backend = Arc::new(
        StreamingBackend::new(vec![Ok(RawStreamItem::chunk("unreachable"))]).failing_first(failures),
    );
    let sink = Arc::new(RecordingSink::default());
    let relay = Relay::new(
        Arc::new(FixedRetriever(Ok(RetrievalResult::default()))),
        backend.clone(),
        sink.clone(),
    )
    .with_retry_policy(RetryPolicy {
        max_attempts: 2,
        base_delay: Duration::from_millis(10),
    });

    let err = relay.run(&input("conn-e")).await.unwrap_err();
    match err {
        RelayError::Invocation(InvocationError::Exhausted { attempts, source }) => {
            assert_eq!(attempts, 2);
            assert_eq!(source.message, "2");
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(sink.events.lock().unwrap().is_empty());
}

#[tokio::test]
async fn concurrent_invocations_keep_separate_accumulators() {
    let backend = Arc::new(StreamingBackend::new(vec![
        Ok(RawStreamItem::chunk("same ")),
        Ok(RawStreamItem::chunk("answer")),
    ]));
    let sink = Arc::new(RecordingSink::default());
    let relay = Relay::new(
        Arc::new(FixedRetriever(Ok(RetrievalResult::default()))),
        backend,
        sink.clone(),
    );

    let handles: Vec<_> = ["conn-1", "conn-2", "conn-3"]
        .into_iter()
        .map(|conn| {
            let relay = relay.clone();
            tokio::spawn(async move { relay.handle(&input(conn)).await })
        })
        .collect();
    for handle in handles {
        assert!(handle.await.unwrap().is_success());
    }

    let events = sink.events.lock().unwrap().clone();
    for conn in ["conn-1", "conn-2", "conn-3"] {
        let finals: Vec<&OutboundEvent> = events
            .iter()
            .filter(|(c, e)| c == conn && e.kind().as_str() == "final_text")
            .map(|(_, e)| e)
            .collect();
        assert_eq!(
            finals,
            vec![&OutboundEvent::FinalText {
                text: "same answer".to_string()
            }]
        );
    }
}

/// Streams `"early"` and then stays open. The prompt "slow" first fails
/// transiently, so that invocation sits in backoff.
#[derive(Default)]
struct OpenEndedBackend {
    slow_calls: Mutex<u32>,
}

#[async_trait]
impl AgentBackend for OpenEndedBackend {
    async fn invoke(&self, request: &InvocationRequest) -> Result<ItemStream, BackendError> {
        if request.prompt() == "slow" {
            let mut calls = self.slow_calls.lock().unwrap();
            *calls += 1;
            if *calls == 1 {
                return Err(BackendError::new("internalServerException", "warming up"));
            }
        }
        let first = futures_util::stream::iter(vec![Ok(RawStreamItem::chunk("early"))]);
        Ok(first.chain(futures_util::stream::pending()).boxed())
    }
}

fn prompt_input(prompt: &str, connection_id: &str) -> InvocationInput {
    InvocationInput {
        prompt: prompt.to_string(),
        connection_id: connection_id.to_string(),
        session_id: None,
    }
}

fn deltas_for(sink: &RecordingSink, connection_id: &str) -> Vec<OutboundEvent> {
    sink.events
        .lock()
        .unwrap()
        .iter()
        .filter(|(conn, _)| conn == connection_id)
        .map(|(_, event)| event.clone())
        .collect()
}

#[tokio::test]
async fn deltas_are_pushed_while_the_stream_is_still_open() {
    let sink = Arc::new(RecordingSink::default());
    let relay = Relay::new(
        Arc::new(FixedRetriever(Ok(RetrievalResult::default()))),
        Arc::new(OpenEndedBackend::default()),
        sink.clone(),
    );

    let result = tokio::time::timeout(
        Duration::from_millis(200),
        relay.run(&prompt_input("now", "conn-open")),
    )
    .await;
    assert!(result.is_err(), "stream never ends, so the run must still be pending");

    assert_eq!(
        deltas_for(&sink, "conn-open"),
        vec![OutboundEvent::Delta {
            text: "early".to_string()
        }]
    );
}

#[tokio::test]
async fn backoff_in_one_invocation_does_not_stall_another() {
    let backend = Arc::new(OpenEndedBackend::default());
    let sink = Arc::new(RecordingSink::default());
    let relay = Relay::new(
        Arc::new(FixedRetriever(Ok(RetrievalResult::default()))),
        backend.clone(),
        sink.clone(),
    )
    .with_retry_policy(RetryPolicy {
        max_attempts: 2,
        base_delay: Duration::from_secs(2),
    });

    let slow = {
        let relay = relay.clone();
        tokio::spawn(async move { relay.run(&prompt_input("slow", "conn-slow")).await })
    };
    while *backend.slow_calls.lock().unwrap() == 0 {
        tokio::task::yield_now().await;
    }

    let fast = tokio::time::timeout(
        Duration::from_millis(200),
        relay.run(&prompt_input("fast", "conn-fast")),
    )
    .await;
    assert!(fast.is_err());

    assert_eq!(
        deltas_for(&sink, "conn-fast"),
        vec![OutboundEvent::Delta {
            text: "early".to_string()
        }]
    );
    assert!(deltas_for(&sink, "conn-slow").is_empty());
    assert_eq!(*backend.slow_calls.lock().unwrap(), 1);

    slow.abort();
}
