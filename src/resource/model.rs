//! Models
//!
//! Model upload follows the simple-create pattern: one RPC returning an
//! operation, one poll to terminal. Evaluations are read-only nested
//! resources under a model.

use crate::config::Context;
use crate::error::{Error, Result};
use crate::pool::ResourceFuture;
use crate::resource::base::{schedule_from, ResourceBase, ResourceState};
use crate::resource::job::delegate_base;
use crate::resource::list::{list_resources, ListParams};
use crate::resource::name::{ResourceKind, ResourceName};
use serde_json::{json, Value};
use std::time::Duration;

/// Options for model upload
#[derive(Default)]
pub struct UploadOptions {
    /// Wait for the upload operation before returning
    pub sync: bool,
    pub create_request_timeout: Option<Duration>,
    pub depends_on: Vec<ResourceFuture>,
    pub poll_interval: Option<Duration>,
}

/// A registered model
#[derive(Clone)]
pub struct Model {
    base: ResourceBase,
}

impl Model {
    delegate_base!();

    /// Proxy for an existing model, by full name or bare id
    pub async fn new(ctx: &Context, name_or_id: &str) -> Result<Self> {
        Ok(Self {
            base: ResourceBase::from_name(ctx, ResourceKind::Model, name_or_id, None).await?,
        })
    }

    /// Upload model artifacts into the registry
    ///
    /// `artifact_uri` points at the staged artifacts;
    /// `serving_container_image_uri` is the image that serves them.
    pub async fn upload(
        ctx: &Context,
        display_name: &str,
        artifact_uri: &str,
        serving_container_image_uri: &str,
        options: UploadOptions,
    ) -> Result<Self> {
        if artifact_uri.is_empty() {
            return Err(Error::BadArgument("artifact_uri must not be empty".into()));
        }
        if serving_container_image_uri.is_empty() {
            return Err(Error::BadArgument(
                "serving_container_image_uri must not be empty".into(),
            ));
        }

        let base = ResourceBase::detached(ctx, ResourceKind::Model).await?;

        let mut model = json!({
            "displayName": display_name,
            "artifactUri": artifact_uri,
            "containerSpec": {"imageUri": serving_container_image_uri},
        });
        if let Some(key) = ctx.encryption_spec_key_name() {
            model["encryptionSpec"] = json!({"kmsKeyName": key});
        }

        let create_path = format!("{}/models:upload", base.client.parent_path());
        base.launch_create_lro(
            options.sync,
            options.depends_on,
            create_path,
            json!({"model": model}),
            options.create_request_timeout,
            schedule_from(options.poll_interval),
        )
        .await?;

        Ok(Self { base })
    }

    /// Update mutable metadata; the field mask is derived from supplied
    /// options, and an empty changeset performs zero RPCs
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

    /// Schedule deletion; idempotent on an already-deleted proxy
    pub async fn delete(&self, sync: bool) -> Result<()> {
        self.base.delete(sync, false).await
    }

    pub async fn list(ctx: &Context, params: ListParams) -> Result<Vec<Value>> {
        let base = ResourceBase::detached(ctx, ResourceKind::Model).await?;
        let path = format!("{}/models", base.client.parent_path());
        list_resources(&base.client, &path, "models", &params).await
    }

    /// List this model's evaluations
    pub async fn list_evaluations(&self, params: ListParams) -> Result<Vec<ModelEvaluation>> {
        let name = self.base.resource_name()?;
        let path = format!("{}/evaluations", name);
        let items = list_resources(&self.base.client, &path, "modelEvaluations", &params).await?;
        let mut evaluations = Vec::with_capacity(items.len());
        for item in items {
            let eval_name = item
                .get("name")
                .and_then(|n| n.as_str())
                .ok_or_else(|| Error::Internal("evaluation missing name".into()))?;
            evaluations.push(ModelEvaluation::from_snapshot(
                &self.base.context,
                eval_name,
                item.clone(),
            )
            .await?);
        }
        Ok(evaluations)
    }

    /// Fetch one evaluation nested under this model
    pub async fn get_evaluation(&self, evaluation_id: &str) -> Result<ModelEvaluation> {
        let model_name = self.base.resource_name()?;
        let model = ResourceName::parse(ResourceKind::Model, &model_name)?;
        let evaluation = ModelEvaluation::new(
            &self.base.context,
            evaluation_id,
            Some(&model.id),
        )
        .await?;
        evaluation.base.sync_from_server().await?;
        Ok(evaluation)
    }
}

/// A read-only model evaluation nested under a model
#[derive(Clone)]
pub struct ModelEvaluation {
    base: ResourceBase,
}

impl ModelEvaluation {
    /// Proxy by full name, or bare id plus the enclosing model id
    pub async fn new(ctx: &Context, name_or_id: &str, model_id: Option<&str>) -> Result<Self> {
        Ok(Self {
            base: ResourceBase::from_name(ctx, ResourceKind::ModelEvaluation, name_or_id, model_id)
                .await?,
        })
    }

    async fn from_snapshot(ctx: &Context, name: &str, snapshot: Value) -> Result<Self> {
        let evaluation = Self::new(ctx, name, None).await?;
        evaluation
            .base
            .handle()
            .set_snapshot(snapshot, ResourceState::Succeeded);
        Ok(evaluation)
    }

    pub fn resource_name(&self) -> Result<String> {
        self.base.resource_name()
    }

    /// The evaluation message, fetched lazily
    pub async fn gca_resource(&self) -> Result<Value> {
        self.base.gca_resource().await
    }

    /// Metrics payload of the evaluation
    pub async fn metrics(&self) -> Result<Value> {
        let resource = self.gca_resource().await?;
        Ok(resource.get("metrics").cloned().unwrap_or(Value::Null))
    }
}
