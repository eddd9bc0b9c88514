//! Matching engine indexes

use crate::config::Context;
use crate::error::{Error, Result};
use crate::pool::ResourceFuture;
use crate::resource::base::{schedule_from, ResourceBase, ResourceState};
use crate::resource::job::delegate_base;
use crate::resource::list::{list_resources, ListParams};
use crate::resource::name::ResourceKind;
use serde_json::{json, Value};
use std::time::Duration;

/// Options for index creation
#[derive(Default)]
pub struct CreateOptions {
    /// Wait for the create operation before returning
    pub sync: bool,
    pub create_request_timeout: Option<Duration>,
    pub depends_on: Vec<ResourceFuture>,
    pub poll_interval: Option<Duration>,
}

/// An approximate-nearest-neighbour index
#[derive(Clone)]
pub struct MatchingEngineIndex {
    base: ResourceBase,
}

impl MatchingEngineIndex {
    delegate_base!();

    /// Proxy for an existing index, by full name or bare id
    pub async fn new(ctx: &Context, name_or_id: &str) -> Result<Self> {
        Ok(Self {
            base: ResourceBase::from_name(ctx, ResourceKind::Index, name_or_id, None).await?,
        })
    }

    /// Create an index from contents staged under `contents_delta_uri`
    pub async fn create(
        ctx: &Context,
        display_name: &str,
        contents_delta_uri: &str,
        dimensions: u32,
        options: CreateOptions,
    ) -> Result<Self> {
        if display_name.is_empty() {
            return Err(Error::BadArgument("display_name must not be empty".into()));
        }
        if dimensions == 0 {
            return Err(Error::BadArgument("dimensions must be positive".into()));
        }

        let base = ResourceBase::detached(ctx, ResourceKind::Index).await?;

        let mut body = json!({
            "displayName": display_name,
            "metadata": {
                "contentsDeltaUri": contents_delta_uri,
                "config": {
                    "dimensions": dimensions,
                    "approximateNeighborsCount": 150,
                    "distanceMeasureType": "DOT_PRODUCT_DISTANCE",
                    "algorithmConfig": {"treeAhConfig": {}},
                },
            },
            "indexUpdateMethod": "BATCH_UPDATE",
        });
        if let Some(key) = ctx.encryption_spec_key_name() {
            body["encryptionSpec"] = json!({"kmsKeyName": key});
        }

        let create_path = format!("{}/indexes", base.client.parent_path());
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

    /// Update mutable metadata with a field mask derived from the supplied
    /// options; an empty changeset performs zero RPCs
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
    /// `force` asks the server to tear down deployments first.
    pub async fn delete(&self, sync: bool, force: bool) -> Result<()> {
        self.base.delete(sync, force).await
    }

    pub async fn list(ctx: &Context, params: ListParams) -> Result<Vec<Value>> {
        let base = ResourceBase::detached(ctx, ResourceKind::Index).await?;
        let path = format!("{}/indexes", base.client.parent_path());
        list_resources(&base.client, &path, "indexes", &params).await
    }
}
