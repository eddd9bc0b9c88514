//! Feature stores
//!
//! A feature online store owns feature views. Creation is id-addressed, so
//! the caller names the resource and the create RPC carries the id as a
//! query parameter. Cascade deletion of a store with views is a single
//! delete RPC with `force=true`; the server fans out, the client never does.

use crate::config::Context;
use crate::error::{Error, Result};
use crate::pool::ResourceFuture;
use crate::resource::base::{schedule_from, ResourceBase, ResourceState};
use crate::resource::job::delegate_base;
use crate::resource::list::{list_resources, ListParams};
use crate::resource::name::{ResourceKind, ResourceName};
use serde_json::{json, Value};
use std::time::Duration;

/// Options shared by the id-addressed creators in this module
#[derive(Default)]
pub struct CreateOptions {
    /// Wait for the create operation before returning
    pub sync: bool,
    pub create_request_timeout: Option<Duration>,
    pub depends_on: Vec<ResourceFuture>,
    pub poll_interval: Option<Duration>,
}

/// A feature online store
#[derive(Clone)]
pub struct FeatureOnlineStore {
    base: ResourceBase,
}

impl FeatureOnlineStore {
    delegate_base!();

    /// Proxy for an existing store, by full name or bare id
    pub async fn new(ctx: &Context, name_or_id: &str) -> Result<Self> {
        Ok(Self {
            base: ResourceBase::from_name(ctx, ResourceKind::FeatureOnlineStore, name_or_id, None)
                .await?,
        })
    }

    /// Create a store with Bigtable-backed serving
    pub async fn create(
        ctx: &Context,
        store_id: &str,
        options: CreateOptions,
    ) -> Result<Self> {
        if store_id.is_empty() {
            return Err(Error::BadArgument("store_id must not be empty".into()));
        }

        let base = ResourceBase::detached(ctx, ResourceKind::FeatureOnlineStore).await?;

        let mut body = json!({
            "bigtable": {
                "autoScaling": {"minNodeCount": 1, "maxNodeCount": 1},
            },
        });
        if let Some(key) = ctx.encryption_spec_key_name() {
            body["encryptionSpec"] = json!({"kmsKeyName": key});
        }

        let create_path = format!(
            "{}/featureOnlineStores?featureOnlineStoreId={}",
            base.client.parent_path(),
            urlencoding::encode(store_id)
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

    /// Create a feature view inside this store
    pub async fn create_feature_view(
        &self,
        view_id: &str,
        big_query_source_uri: &str,
        entity_id_columns: Vec<String>,
        options: CreateOptions,
    ) -> Result<FeatureView> {
        let store_name = self.base.resource_name()?;
        FeatureView::create(
            &self.base.context,
            &store_name,
            view_id,
            big_query_source_uri,
            entity_id_columns,
            options,
        )
        .await
    }

    /// List feature views under this store
    pub async fn list_feature_views(&self, params: ListParams) -> Result<Vec<Value>> {
        let store_name = self.base.resource_name()?;
        let path = format!("{}/featureViews", store_name);
        list_resources(&self.base.client, &path, "featureViews", &params).await
    }

    /// Schedule deletion
    ///
    /// `force` cascades over contained feature views server-side in the
    /// same single RPC.
    pub async fn delete(&self, sync: bool, force: bool) -> Result<()> {
        self.base.delete(sync, force).await
    }

    pub async fn list(ctx: &Context, params: ListParams) -> Result<Vec<Value>> {
        let base = ResourceBase::detached(ctx, ResourceKind::FeatureOnlineStore).await?;
        let path = format!("{}/featureOnlineStores", base.client.parent_path());
        list_resources(&base.client, &path, "featureOnlineStores", &params).await
    }
}

/// A feature view nested under a feature online store
#[derive(Clone)]
pub struct FeatureView {
    base: ResourceBase,
}

impl FeatureView {
    delegate_base!();

    /// Proxy by full name, or bare id plus the enclosing store id
    pub async fn new(ctx: &Context, name_or_id: &str, store_id: Option<&str>) -> Result<Self> {
        Ok(Self {
            base: ResourceBase::from_name(ctx, ResourceKind::FeatureView, name_or_id, store_id)
                .await?,
        })
    }

    /// Create a view backed by a BigQuery source
    pub async fn create(
        ctx: &Context,
        store_name: &str,
        view_id: &str,
        big_query_source_uri: &str,
        entity_id_columns: Vec<String>,
        options: CreateOptions,
    ) -> Result<Self> {
        if view_id.is_empty() {
            return Err(Error::BadArgument("view_id must not be empty".into()));
        }
        if entity_id_columns.is_empty() {
            return Err(Error::BadArgument(
                "at least one entity id column is required".into(),
            ));
        }
        let store = ResourceName::resolve(ResourceKind::FeatureOnlineStore, store_name, ctx, None)?;

        let base = ResourceBase::detached(ctx, ResourceKind::FeatureView).await?;

        let body = json!({
            "bigQuerySource": {
                "uri": big_query_source_uri,
                "entityIdColumns": entity_id_columns,
            },
        });

        let create_path = format!(
            "{}/featureViews?featureViewId={}",
            store,
            urlencoding::encode(view_id)
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

    /// Trigger an on-demand sync from the source
    pub async fn sync(&self) -> Result<Value> {
        let name = self.base.resource_name()?;
        self.base
            .client
            .post(&format!("{}:sync", name), &Value::Null, None)
            .await
    }

    /// Schedule deletion; idempotent on an already-deleted proxy
    pub async fn delete(&self, sync: bool) -> Result<()> {
        self.base.delete(sync, false).await
    }
}
