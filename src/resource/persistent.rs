//! Persistent resources
//!
//! Long-lived compute pools that jobs can target. Creation is id-addressed
//! like feature stores.

use crate::config::Context;
use crate::error::{Error, Result};
use crate::pool::ResourceFuture;
use crate::resource::base::{schedule_from, ResourceBase, ResourceState};
use crate::resource::job::delegate_base;
use crate::resource::list::{list_resources, ListParams};
use crate::resource::name::ResourceKind;
use serde_json::{json, Value};
use std::time::Duration;

/// Options for persistent resource creation
#[derive(Default)]
pub struct CreateOptions {
    /// Wait for the create operation before returning
    pub sync: bool,
    pub create_request_timeout: Option<Duration>,
    pub depends_on: Vec<ResourceFuture>,
    pub poll_interval: Option<Duration>,
}

/// A long-lived compute pool
#[derive(Clone)]
pub struct PersistentResource {
    base: ResourceBase,
}

impl PersistentResource {
    delegate_base!();

    /// Proxy for an existing pool, by full name or bare id
    pub async fn new(ctx: &Context, name_or_id: &str) -> Result<Self> {
        Ok(Self {
            base: ResourceBase::from_name(ctx, ResourceKind::PersistentResource, name_or_id, None)
                .await?,
        })
    }

    /// Create a pool with the given resource pool specs
    pub async fn create(
        ctx: &Context,
        resource_id: &str,
        resource_pools: Vec<Value>,
        options: CreateOptions,
    ) -> Result<Self> {
        if resource_id.is_empty() {
            return Err(Error::BadArgument("resource_id must not be empty".into()));
        }
        if resource_pools.is_empty() {
            return Err(Error::BadArgument(
                "at least one resource pool is required".into(),
            ));
        }

        let base = ResourceBase::detached(ctx, ResourceKind::PersistentResource).await?;

        let mut body = json!({"resourcePools": resource_pools});
        if let Some(network) = ctx.network() {
            body["network"] = json!(network);
        }
        if let Some(key) = ctx.encryption_spec_key_name() {
            body["encryptionSpec"] = json!({"kmsKeyName": key});
        }

        let create_path = format!(
            "{}/persistentResources?persistentResourceId={}",
            base.client.parent_path(),
            urlencoding::encode(resource_id)
        );
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

    /// Schedule deletion; idempotent on an already-deleted proxy
    pub async fn delete(&self, sync: bool) -> Result<()> {
        self.base.delete(sync, false).await
    }

    pub async fn list(ctx: &Context, params: ListParams) -> Result<Vec<Value>> {
        let base = ResourceBase::detached(ctx, ResourceKind::PersistentResource).await?;
        let path = format!("{}/persistentResources", base.client.parent_path());
        list_resources(&base.client, &path, "persistentResources", &params).await
    }
}
