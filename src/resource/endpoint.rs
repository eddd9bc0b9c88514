//! Endpoints
//!
//! Endpoint creation goes through the operation poller like every simple
//! create. Predictions deliberately do not: they are direct RPCs on the
//! caller's task with a caller-supplied timeout, since a prediction is a
//! data-plane call with no lifecycle to track.

use crate::config::Context;
use crate::error::{Error, Result};
use crate::pool::ResourceFuture;
use crate::resource::base::{schedule_from, ResourceBase, ResourceState};
use crate::resource::job::delegate_base;
use crate::resource::list::{list_resources, ListParams};
use crate::resource::name::ResourceKind;
use crate::streaming::StreamingPrediction;
use serde_json::{json, Value};
use std::time::Duration;

/// Options for endpoint creation
#[derive(Default)]
pub struct CreateOptions {
    /// Wait for the create operation before returning
    pub sync: bool,
    pub create_request_timeout: Option<Duration>,
    pub depends_on: Vec<ResourceFuture>,
    pub poll_interval: Option<Duration>,
}

/// A unary prediction result
#[derive(Debug, Clone)]
pub struct Prediction {
    /// One entry per returned candidate; the server may return fewer
    /// candidates than requested
    pub predictions: Vec<Value>,
    pub deployed_model_id: Option<String>,
    /// Full response message
    pub raw: Value,
}

impl Prediction {
    fn from_response(raw: Value) -> Self {
        let predictions = raw
            .get("predictions")
            .and_then(|p| p.as_array())
            .cloned()
            .unwrap_or_default();
        let deployed_model_id = raw
            .get("deployedModelId")
            .and_then(|d| d.as_str())
            .map(|d| d.to_string());
        Self {
            predictions,
            deployed_model_id,
            raw,
        }
    }
}

/// A serving endpoint
#[derive(Clone)]
pub struct Endpoint {
    base: ResourceBase,
}

impl Endpoint {
    delegate_base!();

    /// Proxy for an existing endpoint, by full name or bare id
    pub async fn new(ctx: &Context, name_or_id: &str) -> Result<Self> {
        Ok(Self {
            base: ResourceBase::from_name(ctx, ResourceKind::Endpoint, name_or_id, None).await?,
        })
    }

    /// Create an endpoint
    pub async fn create(ctx: &Context, display_name: &str, options: CreateOptions) -> Result<Self> {
        if display_name.is_empty() {
            return Err(Error::BadArgument("display_name must not be empty".into()));
        }

        let base = ResourceBase::detached(ctx, ResourceKind::Endpoint).await?;

        let mut body = json!({"displayName": display_name});
        if let Some(key) = ctx.encryption_spec_key_name() {
            body["encryptionSpec"] = json!({"kmsKeyName": key});
        }
        if let Some(network) = ctx.network() {
            body["network"] = json!(network);
        }

        let create_path = format!("{}/endpoints", base.client.parent_path());
        base.launch_create_lro(
            options.sync,
            options.depends_on,
            create_path,
            body,
            options.create_request_timeout,
            schedule_from(options.poll_interval),
        )
        .await?;

        Ok(Self { base })
    }

    /// Issue a unary prediction
    ///
    /// Runs on the caller's task with `timeout` bounding the RPC; the
    /// future pool is not involved. `candidate_count`, when set in
    /// `parameters`, is a maximum the server may undershoot.
    pub async fn predict(
        &self,
        instances: Vec<Value>,
        parameters: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<Prediction> {
        let name = self.base.resource_name()?;
        let body = Self::prediction_body(instances, parameters)?;
        let raw = self
            .base
            .client
            .post(&format!("{}:predict", name), &body, timeout)
            .await?;
        Ok(Prediction::from_response(raw))
    }

    /// Issue a unary explanation request
    pub async fn explain(
        &self,
        instances: Vec<Value>,
        parameters: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let name = self.base.resource_name()?;
        let body = Self::prediction_body(instances, parameters)?;
        self.base
            .client
            .post(&format!("{}:explain", name), &body, timeout)
            .await
    }

    /// Open a server-streaming prediction
    ///
    /// The returned stream yields records lazily; dropping it closes the
    /// connection.
    pub async fn stream_predict(
        &self,
        inputs: Vec<Value>,
        parameters: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<StreamingPrediction> {
        let name = self.base.resource_name()?;
        let mut body = json!({"inputs": inputs});
        if let Some(parameters) = parameters {
            body["parameters"] = parameters;
        }
        let response = self
            .base
            .client
            .post_stream(&format!("{}:streamingPredict", name), &body, timeout)
            .await?;
        Ok(StreamingPrediction::new(response))
    }

    fn prediction_body(instances: Vec<Value>, parameters: Option<Value>) -> Result<Value> {
        if instances.is_empty() {
            return Err(Error::BadArgument(
                "at least one instance is required".into(),
            ));
        }
        if instances.iter().any(|i| !i.is_object() && !i.is_array()) {
            return Err(Error::BadArgument(
                "instances must be JSON objects or arrays".into(),
            ));
        }
        let mut body = json!({"instances": instances});
        if let Some(parameters) = parameters {
            body["parameters"] = parameters;
        }
        Ok(body)
    }

    /// Update mutable metadata with a field mask derived from the supplied
    /// options
    pub async fn update(
        &self,
        display_name: Option<&str>,
        description: Option<&str>,
        labels: Option<Value>,
    ) -> Result<()> {
        let mut changes = Vec::new();
        if let Some(display_name) = display_name {
            changes.push(("displayName", json!(display_name)));
        }
        if let Some(description) = description {
            changes.push(("description", json!(description)));
        }
        if let Some(labels) = labels {
            changes.push(("labels", labels));
        }
        self.base.update_fields(changes).await
    }

    /// Schedule deletion
    ///
    /// `force` asks the server to undeploy any deployed models first; the
    /// client never undeploys on its own.
    pub async fn delete(&self, sync: bool, force: bool) -> Result<()> {
        self.base.delete(sync, force).await
    }

    pub async fn list(ctx: &Context, params: ListParams) -> Result<Vec<Value>> {
        let base = ResourceBase::detached(ctx, ResourceKind::Endpoint).await?;
        let path = format!("{}/endpoints", base.client.parent_path());
        list_resources(&base.client, &path, "endpoints", &params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prediction_body_rejects_empty() {
        assert!(matches!(
            Endpoint::prediction_body(Vec::new(), None),
            Err(Error::BadArgument(_))
        ));
    }

    #[test]
    fn test_prediction_body_rejects_scalars() {
        assert!(matches!(
            Endpoint::prediction_body(vec![json!(5)], None),
            Err(Error::BadArgument(_))
        ));
    }

    #[test]
    fn test_prediction_from_response() {
        let p = Prediction::from_response(json!({
            "predictions": [{"a": 1}, {"a": 2}],
            "deployedModelId": "42",
        }));
        assert_eq!(p.predictions.len(), 2);
        assert_eq!(p.deployed_model_id.as_deref(), Some("42"));
    }

    #[test]
    fn test_prediction_from_empty_response() {
        let p = Prediction::from_response(json!({}));
        assert!(p.predictions.is_empty());
        assert!(p.deployed_model_id.is_none());
    }
}
