//! Parameter-encoding tests for pipeline submission
//!
//! These check the exact runtime-config bodies that reach the server for
//! the two schema generations, and the one-fetch-per-process caching of
//! remote templates.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use vertexai::config::Context;
use vertexai::gcp::auth::Credentials;
use vertexai::resource::pipeline::{PipelineJob, PipelineOptions};
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PARENT: &str = "projects/demo-project/locations/us-central1";

fn test_context(server: &MockServer) -> Context {
    Context::builder()
        .project("demo-project")
        .location("us-central1")
        .credentials(Credentials::static_token("test-token"))
        .staging_bucket("gs://demo-bucket")
        .endpoint_override(server.uri())
        .build()
        .unwrap()
}

fn write_template(file_name: &str, schema_version: &str, param: &str) -> std::path::PathBuf {
    let template = json!({
        "schemaVersion": schema_version,
        "root": {
            "inputDefinitions": {
                "parameters": {param: {"parameterType": "STRING"}}
            }
        },
    });
    let path = std::env::temp_dir().join(file_name);
    std::fs::write(&path, template.to_string()).unwrap();
    path
}

async fn mount_pipeline_api(server: &MockServer, job_id: &str) {
    let job_name = format!("{}/pipelineJobs/{}", PARENT, job_id);
    Mock::given(method("POST"))
        .and(path(format!("/v1/{}/pipelineJobs", PARENT)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": job_name,
            "state": "PIPELINE_STATE_PENDING",
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/v1/{}", job_name)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": job_name,
            "state": "PIPELINE_STATE_SUCCEEDED",
        })))
        .mount(server)
        .await;
}

async fn submitted_body(server: &MockServer) -> Value {
    let requests = server.received_requests().await.unwrap();
    let create = requests
        .iter()
        .find(|r| r.method.to_string() == "POST" && r.url.path().ends_with("/pipelineJobs"))
        .expect("no pipeline create request was issued");
    serde_json::from_slice(&create.body).unwrap()
}

/// Schema 2.1 parameters go over the wire as raw JSON values
#[tokio::test]
async fn test_new_schema_sends_raw_values() {
    let server = MockServer::start().await;
    mount_pipeline_api(&server, "new-schema").await;

    let template = write_template("vertexai-test-new-schema.json", "2.1.0", "int_param");
    let ctx = test_context(&server);

    let mut parameter_values = HashMap::new();
    parameter_values.insert("int_param".to_string(), json!(5678));
    PipelineJob::run(
        &ctx,
        "encode-new",
        template.to_str().unwrap(),
        PipelineOptions {
            parameter_values,
            poll_interval: Some(Duration::from_millis(10)),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let body = submitted_body(&server).await;
    assert_eq!(
        body["runtimeConfig"]["parameterValues"]["int_param"],
        json!(5678)
    );
    assert!(body["runtimeConfig"].get("parameters").is_none());
    assert_eq!(
        body["runtimeConfig"]["gcsOutputDirectory"],
        json!("gs://demo-bucket")
    );
}

/// Schema 2.0 parameters carry the legacy type tags
#[tokio::test]
async fn test_legacy_schema_sends_tagged_values() {
    let server = MockServer::start().await;
    mount_pipeline_api(&server, "legacy-schema").await;

    let template = write_template("vertexai-test-legacy-schema.json", "2.0.0", "string_param");
    let ctx = test_context(&server);

    let mut parameter_values = HashMap::new();
    parameter_values.insert("string_param".to_string(), json!("hello"));
    PipelineJob::run(
        &ctx,
        "encode-legacy",
        template.to_str().unwrap(),
        PipelineOptions {
            parameter_values,
            poll_interval: Some(Duration::from_millis(10)),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let body = submitted_body(&server).await;
    assert_eq!(
        body["runtimeConfig"]["parameters"]["string_param"],
        json!({"stringValue": "hello"})
    );
    assert!(body["runtimeConfig"].get("parameterValues").is_none());
}

/// A parameter the template does not declare fails locally, before any RPC
#[tokio::test]
async fn test_undeclared_parameter_fails_without_rpc() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path_regex(r"/pipelineJobs$"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let template = write_template("vertexai-test-undeclared.json", "2.1.0", "int_param");
    let ctx = test_context(&server);

    let mut parameter_values = HashMap::new();
    parameter_values.insert("typo_param".to_string(), json!(1));
    let err = PipelineJob::submit(
        &ctx,
        "encode-typo",
        template.to_str().unwrap(),
        PipelineOptions {
            parameter_values,
            ..Default::default()
        },
    )
    .await
    .unwrap_err();

    assert!(matches!(err, vertexai::error::Error::BadArgument(_)));
}

/// A staged template is fetched once and served from the cache afterwards
#[tokio::test]
async fn test_remote_template_fetched_once() {
    let server = MockServer::start().await;
    mount_pipeline_api(&server, "cached").await;

    let template = json!({
        "schemaVersion": "2.1.0",
        "root": {"inputDefinitions": {"parameters": {}}},
    });
    Mock::given(method("GET"))
        .and(path(
            "/storage/v1/b/template-bucket-once/o/spec%2Fpipeline.json",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_string(template.to_string()))
        .expect(1)
        .mount(&server)
        .await;

    let ctx = test_context(&server);
    let reference = "gs://template-bucket-once/spec/pipeline.json";
    for run in 0..2 {
        PipelineJob::run(
            &ctx,
            &format!("cached-{}", run),
            reference,
            PipelineOptions {
                poll_interval: Some(Duration::from_millis(10)),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    }
}
