//! End-to-end lifecycle tests over a mocked platform API
//!
//! These drive whole resource flows (submit, wait, delete, dependency
//! chains) against wiremock, checking both the client-visible outcomes and
//! the exact RPCs that reach the server.

use serde_json::json;
use std::time::Duration;
use vertexai::config::Context;
use vertexai::error::Error;
use vertexai::gcp::auth::Credentials;
use vertexai::resource::endpoint::{CreateOptions, Endpoint};
use vertexai::resource::feature_store::FeatureOnlineStore;
use vertexai::resource::job::{CustomJob, SubmitOptions};
use vertexai::resource::model::Model;
use vertexai::resource::ResourceState;
use wiremock::matchers::{body_partial_json, method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PARENT: &str = "projects/demo-project/locations/us-central1";

fn test_context(server: &MockServer) -> Context {
    Context::builder()
        .project("demo-project")
        .location("us-central1")
        .credentials(Credentials::static_token("test-token"))
        .endpoint_override(server.uri())
        .build()
        .unwrap()
}

fn fast_poll() -> SubmitOptions {
    SubmitOptions {
        poll_interval: Some(Duration::from_millis(10)),
        ..Default::default()
    }
}

fn worker_pool() -> Vec<serde_json::Value> {
    vec![json!({
        "machineSpec": {"machineType": "n1-standard-4"},
        "replicaCount": 1,
    })]
}

/// Submit returns while the job is still pending; the name becomes
/// available at registration and wait() resolves at the terminal state
#[tokio::test]
async fn test_async_job_submit_then_wait() {
    let server = MockServer::start().await;
    let job_name = format!("{}/customJobs/123", PARENT);

    Mock::given(method("POST"))
        .and(path(format!("/v1/{}/customJobs", PARENT)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": job_name,
            "displayName": "j",
            "state": "JOB_STATE_PENDING",
        })))
        .expect(1)
        .mount(&server)
        .await;

    // First reconciliation sees the job running, the next one terminal
    Mock::given(method("GET"))
        .and(path(format!("/v1/{}", job_name)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": job_name,
            "state": "JOB_STATE_RUNNING",
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/v1/{}", job_name)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": job_name,
            "state": "JOB_STATE_SUCCEEDED",
        })))
        .mount(&server)
        .await;

    let ctx = test_context(&server);
    let job = CustomJob::submit(&ctx, "j", worker_pool(), fast_poll())
        .await
        .unwrap();

    let name = job.wait_for_resource_creation().await.unwrap();
    assert_eq!(name, job_name);

    job.wait().await.unwrap();
    assert_eq!(job.state().await.unwrap(), ResourceState::Succeeded);
    assert!(job.done());
}

/// A create RPC failure surfaces as ResourceNotCreated carrying the
/// server's message, from both the wait and the name accessor
#[tokio::test]
async fn test_create_failure_before_name_assignment() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(format!("/v1/{}/customJobs", PARENT)))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {
                "code": 400,
                "message": "Mock fail",
                "status": "INVALID_ARGUMENT",
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let ctx = test_context(&server);
    let job = CustomJob::submit(&ctx, "j", worker_pool(), fast_poll())
        .await
        .unwrap();

    let err = job.wait_for_resource_creation().await.unwrap_err();
    assert!(matches!(err, Error::ResourceNotCreated { .. }));
    assert!(err.to_string().contains("Mock fail"), "got: {}", err);

    let err = job.resource_name().unwrap_err();
    assert!(matches!(err, Error::ResourceNotCreated { .. }));
    assert!(err.to_string().contains("Mock fail"));
}

/// Synchronous endpoint create runs the operation to done and snapshots
/// the final resource
#[tokio::test]
async fn test_sync_endpoint_create() {
    let server = MockServer::start().await;
    let endpoint_name = format!("{}/endpoints/5", PARENT);
    let op_name = format!("{}/endpoints/5/operations/77", PARENT);

    Mock::given(method("POST"))
        .and(path(format!("/v1/{}/endpoints", PARENT)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": op_name,
            "done": false,
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/v1/{}", op_name)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": op_name,
            "done": true,
            "response": {
                "name": endpoint_name,
                "displayName": "serve",
            },
        })))
        .mount(&server)
        .await;

    let ctx = test_context(&server);
    let endpoint = Endpoint::create(
        &ctx,
        "serve",
        CreateOptions {
            sync: true,
            poll_interval: Some(Duration::from_millis(10)),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    assert_eq!(endpoint.resource_name().unwrap(), endpoint_name);
    assert_eq!(endpoint.display_name().as_deref(), Some("serve"));
    assert_eq!(endpoint.state().await.unwrap(), ResourceState::Succeeded);
}

/// Cascade delete is one RPC with force=true; the client never deletes
/// children itself
#[tokio::test]
async fn test_cascade_delete_is_single_rpc() {
    let server = MockServer::start().await;
    let store_name = format!("{}/featureOnlineStores/store", PARENT);
    let op_name = format!("{}/featureOnlineStores/store/operations/3", PARENT);

    Mock::given(method("DELETE"))
        .and(path(format!("/v1/{}", store_name)))
        .and(query_param("force", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": op_name,
            "done": false,
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/v1/{}", op_name)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": op_name,
            "done": true,
            "response": {},
        })))
        .mount(&server)
        .await;
    // The store holds two feature views; none of them may see a delete
    Mock::given(method("DELETE"))
        .and(path_regex(r"/featureViews/"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let ctx = test_context(&server);
    let store = FeatureOnlineStore::new(&ctx, &store_name).await.unwrap();
    store.delete(true, true).await.unwrap();

    // Client-side idempotence: a second delete performs no RPC
    store.delete(true, true).await.unwrap();
}

/// A failed parent short-circuits the child: no create RPC, no polling,
/// and the error names the parent's resource
#[tokio::test]
async fn test_chained_dependency_failure() {
    let server = MockServer::start().await;
    let a_name = format!("{}/customJobs/a1", PARENT);

    Mock::given(method("POST"))
        .and(path(format!("/v1/{}/customJobs", PARENT)))
        .and(body_partial_json(json!({"displayName": "a"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": a_name,
            "state": "JOB_STATE_RUNNING",
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/v1/{}", a_name)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": a_name,
            "state": "JOB_STATE_FAILED",
            "error": {"code": 13, "message": "training crashed"},
        })))
        .mount(&server)
        .await;
    // B's create must never reach the server
    Mock::given(method("POST"))
        .and(path(format!("/v1/{}/customJobs", PARENT)))
        .and(body_partial_json(json!({"displayName": "b"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(0)
        .mount(&server)
        .await;

    let ctx = test_context(&server);
    let a = CustomJob::submit(&ctx, "a", worker_pool(), fast_poll())
        .await
        .unwrap();

    let b = CustomJob::submit(
        &ctx,
        "b",
        worker_pool(),
        SubmitOptions {
            depends_on: vec![a.latest_future().unwrap()],
            poll_interval: Some(Duration::from_millis(10)),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let err = b.wait().await.unwrap_err();
    match err {
        Error::DependencyFailed {
            cause,
            parent_resource,
        } => {
            assert_eq!(parent_resource.as_deref(), Some(a_name.as_str()));
            assert!(cause.to_string().contains("training crashed"));
        }
        other => panic!("expected DependencyFailed, got {:?}", other),
    }

    // The captured failure replays on attribute access, even though B's
    // task body never ran
    let err = b.state().await.unwrap_err();
    assert!(matches!(err, Error::DependencyFailed { .. }), "got {:?}", err);
    let err = b.gca_resource().await.unwrap_err();
    assert!(matches!(err, Error::DependencyFailed { .. }), "got {:?}", err);
}

/// An update with an empty changeset is a no-op and performs zero RPCs
#[tokio::test]
async fn test_empty_update_performs_no_rpc() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(0)
        .mount(&server)
        .await;

    let ctx = test_context(&server);
    let endpoint = Endpoint::new(&ctx, &format!("{}/endpoints/9", PARENT))
        .await
        .unwrap();
    endpoint.update(None, None, None).await.unwrap();
}

/// Reconstructing a proxy from its name yields an equal snapshot
#[tokio::test]
async fn test_snapshot_round_trip_by_name() {
    let server = MockServer::start().await;
    let model_name = format!("{}/models/77", PARENT);
    Mock::given(method("GET"))
        .and(path(format!("/v1/{}", model_name)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": model_name,
            "displayName": "m",
            "labels": {"team": "ml"},
            "artifactUri": "gs://demo-bucket/artifacts",
        })))
        .mount(&server)
        .await;

    let ctx = test_context(&server);
    let first = Model::new(&ctx, &model_name).await.unwrap();
    let snapshot = first.gca_resource().await.unwrap();
    drop(first);

    let second = Model::new(&ctx, &model_name).await.unwrap();
    assert_eq!(second.gca_resource().await.unwrap(), snapshot);
}

/// Timing out a wait surfaces DeadlineExceeded without cancelling the
/// underlying work
#[tokio::test]
async fn test_wait_timeout_leaves_work_running() {
    let server = MockServer::start().await;
    let job_name = format!("{}/customJobs/slow", PARENT);

    Mock::given(method("POST"))
        .and(path(format!("/v1/{}/customJobs", PARENT)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": job_name,
            "state": "JOB_STATE_RUNNING",
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/v1/{}", job_name)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": job_name,
            "state": "JOB_STATE_RUNNING",
        })))
        .up_to_n_times(3)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/v1/{}", job_name)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": job_name,
            "state": "JOB_STATE_SUCCEEDED",
        })))
        .mount(&server)
        .await;

    let ctx = test_context(&server);
    let job = CustomJob::submit(&ctx, "slow", worker_pool(), fast_poll())
        .await
        .unwrap();

    let future = job.latest_future().unwrap();
    let err = future
        .wait_timeout(Duration::from_millis(1))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DeadlineExceeded(_)));

    // The proxy still owns the work and it runs to completion
    job.wait().await.unwrap();
    assert_eq!(job.state().await.unwrap(), ResourceState::Succeeded);
}
