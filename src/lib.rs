//! Client library for the Vertex AI control and data planes.
//!
//! The crate models server-side objects (models, endpoints, jobs,
//! pipelines, feature stores, indexes, monitors, persistent resources) as
//! proxies over a shared lifecycle core. Mutations are scheduled on a
//! process-wide [`pool::TaskPool`] and tracked through the platform's
//! long-running-operation surface by [`lro::LroPoller`]; callers choose
//! between fire-and-forget `submit` and blocking `run`/`create` entry
//! points.
//!
//! ```no_run
//! use vertexai::{config::Context, resource::{CustomJob, SubmitOptions}};
//! use serde_json::json;
//!
//! # async fn demo() -> vertexai::error::Result<()> {
//! let ctx = Context::builder()
//!     .project("my-project")
//!     .location("us-central1")
//!     .build()?;
//!
//! let job = CustomJob::submit(
//!     &ctx,
//!     "train",
//!     vec![json!({"machineSpec": {"machineType": "n1-standard-4"}, "replicaCount": 1})],
//!     SubmitOptions::default(),
//! )
//! .await?;
//!
//! let name = job.wait_for_resource_creation().await?;
//! println!("running as {}", name);
//! job.wait().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod gcp;
pub mod lro;
pub mod pool;
pub mod resource;
pub mod retry;
pub mod streaming;

pub use config::{init, Context};
pub use error::{Error, Result};
pub use pool::{ResourceFuture, TaskPool};
pub use resource::{
    BatchPredictionJob, CustomJob, Endpoint, FeatureOnlineStore, FeatureView, ListParams,
    MatchingEngineIndex, Model, ModelEvaluation, ModelEvaluationJob, ModelMonitor,
    PersistentResource, PipelineJob, ResourceState,
};
pub use streaming::{StreamingPrediction, StreamingPredictionResponse};
