//! Resource lifecycle layer
//!
//! Every server-side object is modelled as a proxy over a shared
//! [`base::ResourceBase`]: a canonical name, the last server snapshot, a
//! lifecycle state, and the in-flight future that will next mutate it.
//! Kind modules wrap the base with their create, submit and mutate
//! semantics.

pub mod base;
pub mod endpoint;
pub mod feature_store;
pub mod index;
pub mod job;
pub mod list;
pub mod model;
pub mod monitor;
pub mod name;
pub mod persistent;
pub mod pipeline;

pub use base::ResourceState;
pub use endpoint::{Endpoint, Prediction};
pub use feature_store::{FeatureOnlineStore, FeatureView};
pub use index::MatchingEngineIndex;
pub use job::{BatchPredictionJob, CustomJob, SubmitOptions};
pub use list::ListParams;
pub use model::{Model, ModelEvaluation};
pub use monitor::ModelMonitor;
pub use name::{ResourceKind, ResourceName};
pub use persistent::PersistentResource;
pub use pipeline::{ModelEvaluationJob, PipelineJob, PipelineOptions};
