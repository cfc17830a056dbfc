use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use courier_relay::{
    classify, classify_failure, AgentBackend, FailureClass, RawStreamItem, Retriever,
    StreamFragment,
};
use courier_server::backend::{HttpAgentBackend, HttpRetriever};
use courier_types::{InvocationRequest, RetrievedPassage, SupportingDocument};
use futures_util::StreamExt;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

type Captured = Arc<Mutex<Vec<Value>>>;

async fn retrieve(State(seen): State<Captured>, Json(body): Json<Value>) -> Json<Value> {
    seen.lock().unwrap().push(body);
    Json(json!({
        "retrievalResults": [
            { "content": { "text": "a,b" }, "metadata": { "sourceUri": "s3://kb/a.csv" } },
            { "content": { "text": "memo" }, "metadata": { "sourceUri": "s3://kb/memo.pdf" } }
        ]
    }))
}

async fn invoke(State(seen): State<Captured>, Json(body): Json<Value>) -> String {
    seen.lock().unwrap().push(body);
    [
        r#"{"chunk":{"bytes":"hi "}}"#,
        "",
        r#"{"trace":{"trace":{"orchestrationTrace":{"rationale":{"text":"why"}}}}}"#,
        "garbage",
        r#"{"chunk":{"bytes":"there"}}"#,
    ]
    .join("\n")
}

async fn throttled() -> (StatusCode, Json<Value>) {
    (
        StatusCode::TOO_MANY_REQUESTS,
        Json(json!({ "__type": "throttlingException", "message": "slow down" })),
    )
}

async fn broken() -> StatusCode {
    StatusCode::INTERNAL_SERVER_ERROR
}

async fn start_backend() -> (SocketAddr, Captured) {
    let seen: Captured = Arc::default();
    let app = Router::new()
        .route("/retrieve", post(retrieve))
        .route("/invoke", post(invoke))
        .route("/throttled", post(throttled))
        .route("/broken", post(broken))
        .with_state(seen.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, seen)
}

#[tokio::test]
async fn retriever_posts_query_and_maps_passages() {
    let (addr, seen) = start_backend().await;
    let retriever = HttpRetriever::new(format!("http://{}/retrieve", addr), 7);

    let result = retriever.retrieve("who was booked?").await.unwrap();
    assert_eq!(
        result.passages,
        vec![
            RetrievedPassage::new("s3://kb/a.csv", "a,b"),
            RetrievedPassage::new("s3://kb/memo.pdf", "memo"),
        ]
    );
    assert_eq!(
        seen.lock().unwrap().as_slice(),
        &[json!({ "text": "who was booked?", "numberOfResults": 7 })]
    );
}

#[tokio::test]
async fn agent_stream_is_split_into_items() {
    let (addr, seen) = start_backend().await;
    let backend = HttpAgentBackend::new(
        format!("http://{}/invoke", addr),
        Duration::from_secs(5),
    );
    let request = InvocationRequest::new(
        "count",
        "s-1",
        vec![SupportingDocument::from_uri("s3://kb/a.csv")],
    );

    let items: Vec<RawStreamItem> = backend
        .invoke(&request)
        .await
        .unwrap()
        .map(|item| item.unwrap())
        .collect()
        .await;
    assert_eq!(items.len(), 4);

    let labels: Vec<&str> = items
        .into_iter()
        .filter_map(classify)
        .map(|fragment| match fragment {
            StreamFragment::Envelope(_) => "envelope",
            StreamFragment::Trace(Some(_)) => "trace",
            StreamFragment::Trace(None) => "empty-trace",
            StreamFragment::Unhandled(_) => "unhandled",
            StreamFragment::FileBundle(_) => "files",
        })
        .collect();
    assert_eq!(labels, vec!["envelope", "trace", "unhandled", "envelope"]);

    let body = seen.lock().unwrap()[0].clone();
    assert_eq!(body["inputText"], "count");
    assert_eq!(body["enableTrace"], true);
    assert_eq!(body["sessionState"]["files"][0]["name"], "a.csv");
}

#[tokio::test]
async fn error_statuses_become_backend_errors() {
    let (addr, _) = start_backend().await;
    let request = InvocationRequest::new("x", "", Vec::new());

    let throttled = HttpAgentBackend::new(
        format!("http://{}/throttled", addr),
        Duration::from_secs(5),
    );
    let err = match throttled.invoke(&request).await {
        Err(e) => e,
        Ok(_) => panic!("expected an error"),
    };
    assert_eq!(err.cause, "throttlingException");
    assert_eq!(err.message, "slow down");
    assert_eq!(classify_failure(&err), FailureClass::Permanent);

    let broken = HttpAgentBackend::new(
        format!("http://{}/broken", addr),
        Duration::from_secs(5),
    );
    let err = match broken.invoke(&request).await {
        Err(e) => e,
        Ok(_) => panic!("expected an error"),
    };
    assert_eq!(err.cause, "internalServerException");
    assert_eq!(classify_failure(&err), FailureClass::Transient);
}

#[tokio::test]
async fn unreachable_backend_is_a_permanent_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let retriever = HttpRetriever::new(format!("http://{}/retrieve", addr), 15);
    let err = retriever.retrieve("x").await.unwrap_err();
    assert_eq!(err.cause, "transport");
    assert_eq!(classify_failure(&err), FailureClass::Permanent);
}
