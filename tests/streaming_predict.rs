//! Streaming prediction tests over a mocked platform API

use serde_json::json;
use vertexai::config::Context;
use vertexai::gcp::auth::Credentials;
use vertexai::resource::endpoint::Endpoint;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ENDPOINT: &str = "projects/demo-project/locations/us-central1/endpoints/9";

fn test_context(server: &MockServer) -> Context {
    Context::builder()
        .project("demo-project")
        .location("us-central1")
        .credentials(Credentials::static_token("test-token"))
        .endpoint_override(server.uri())
        .build()
        .unwrap()
}

async fn mount_stream(server: &MockServer, body: serde_json::Value) {
    Mock::given(method("POST"))
        .and(path(format!("/v1/{}:streamingPredict", ENDPOINT)))
        .respond_with(ResponseTemplate::new(200).set_body_string(body.to_string()))
        .mount(server)
        .await;
}

/// Three chunks yield three records in order; the final one carries the
/// citation metadata
#[tokio::test]
async fn test_three_chunk_stream() {
    let server = MockServer::start().await;
    mount_stream(
        &server,
        json!([
            {"content": "A"},
            {"content": "B"},
            {
                "content": "C",
                "citationMetadata": {"citations": [{"uri": "https://example.com/source"}]},
            },
        ]),
    )
    .await;

    let ctx = test_context(&server);
    let endpoint = Endpoint::new(&ctx, ENDPOINT).await.unwrap();
    let stream = endpoint
        .stream_predict(vec![json!({"prompt": "hi"})], None, None)
        .await
        .unwrap();

    let records = stream.collect_all().await.unwrap();
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].text, "A");
    assert_eq!(records[1].text, "B");
    assert_eq!(records[2].text, "C");

    assert!(records[0].citations.is_none());
    let citations = records[2].citations.as_ref().unwrap();
    assert_eq!(
        citations["citations"][0]["uri"],
        json!("https://example.com/source")
    );
}

/// Tensor-shaped chunks flatten their string values into the text field
#[tokio::test]
async fn test_tensor_shaped_chunks() {
    let server = MockServer::start().await;
    mount_stream(
        &server,
        json!([
            {"outputs": [{"structVal": {"content": {"stringVal": ["hel", "lo"]}}}]},
        ]),
    )
    .await;

    let ctx = test_context(&server);
    let endpoint = Endpoint::new(&ctx, ENDPOINT).await.unwrap();
    let mut stream = endpoint
        .stream_predict(vec![json!({"prompt": "hi"})], None, None)
        .await
        .unwrap();

    let record = stream.next().await.unwrap().unwrap();
    assert_eq!(record.text, "hello");
    assert!(stream.next().await.is_none());
}

/// A zero-record stream completes cleanly
#[tokio::test]
async fn test_empty_stream_completes() {
    let server = MockServer::start().await;
    mount_stream(&server, json!([])).await;

    let ctx = test_context(&server);
    let endpoint = Endpoint::new(&ctx, ENDPOINT).await.unwrap();
    let mut stream = endpoint
        .stream_predict(vec![json!({"prompt": "hi"})], None, None)
        .await
        .unwrap();

    assert!(stream.next().await.is_none());
    // Finished streams stay finished
    assert!(stream.next().await.is_none());
}

/// An error status is mapped before any record is yielded
#[tokio::test]
async fn test_stream_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/v1/{}:streamingPredict", ENDPOINT)))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": {"code": 404, "message": "endpoint gone", "status": "NOT_FOUND"}
        })))
        .mount(&server)
        .await;

    let ctx = test_context(&server);
    let endpoint = Endpoint::new(&ctx, ENDPOINT).await.unwrap();
    let err = endpoint
        .stream_predict(vec![json!({"prompt": "hi"})], None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, vertexai::error::Error::NotFound(_)));
}
