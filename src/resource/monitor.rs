//! Model monitors
//!
//! Monitors are the one kind whose running state is externally driven:
//! pause and resume flip it between running and paused, and updates are
//! legal while running.

use crate::config::Context;
use crate::error::{Error, Result};
use crate::pool::ResourceFuture;
use crate::resource::base::{schedule_from, ResourceBase, ResourceState};
use crate::resource::job::delegate_base;
use crate::resource::list::{list_resources, ListParams};
use crate::resource::name::ResourceKind;
use serde_json::{json, Value};
use std::time::Duration;

/// Options for monitor creation
#[derive(Default)]
pub struct CreateOptions {
    /// Wait for the create operation before returning
    pub sync: bool,
    pub create_request_timeout: Option<Duration>,
    pub depends_on: Vec<ResourceFuture>,
    pub poll_interval: Option<Duration>,
}

/// A deployment monitoring job
#[derive(Clone)]
pub struct ModelMonitor {
    base: ResourceBase,
}

impl ModelMonitor {
    delegate_base!();

    /// Proxy for an existing monitor, by full name or bare id
    pub async fn new(ctx: &Context, name_or_id: &str) -> Result<Self> {
        Ok(Self {
            base: ResourceBase::from_name(ctx, ResourceKind::ModelMonitor, name_or_id, None)
                .await?,
        })
    }

    /// Create a monitor over `endpoint` with the given objective config
    pub async fn create(
        ctx: &Context,
        display_name: &str,
        endpoint: &str,
        objective_configs: Vec<Value>,
        options: CreateOptions,
    ) -> Result<Self> {
        if display_name.is_empty() {
            return Err(Error::BadArgument("display_name must not be empty".into()));
        }
        if objective_configs.is_empty() {
            return Err(Error::BadArgument(
                "at least one objective config is required".into(),
            ));
        }

        let base = ResourceBase::detached(ctx, ResourceKind::ModelMonitor).await?;

        let mut body = json!({
            "displayName": display_name,
            "endpoint": endpoint,
            "modelDeploymentMonitoringObjectiveConfigs": objective_configs,
            "modelDeploymentMonitoringScheduleConfig": {
                "monitorInterval": "3600s",
            },
            "loggingSamplingStrategy": {
                "randomSampleConfig": {"sampleRate": 0.8},
            },
        });
        if let Some(key) = ctx.encryption_spec_key_name() {
            body["encryptionSpec"] = json!({"kmsKeyName": key});
        }

        let create_path = format!("{}/modelMonitors", base.client.parent_path());
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

    /// Pause a running monitor
    pub async fn pause(&self) -> Result<()> {
        let name = self.base.resource_name()?;
        self.base
            .client
            .post(&format!("{}:pause", name), &Value::Null, None)
            .await?;
        Ok(())
    }

    /// Resume a paused monitor
    pub async fn resume(&self) -> Result<()> {
        let name = self.base.resource_name()?;
        self.base
            .client
            .post(&format!("{}:resume", name), &Value::Null, None)
            .await?;
        Ok(())
    }

    /// Update the monitor, legal while it is running
    ///
    /// The field mask is derived from the supplied options; an empty
    /// changeset performs zero RPCs.
    pub async fn update(
        &self,
        display_name: Option<&str>,
        objective_configs: Option<Vec<Value>>,
        monitor_interval: Option<Duration>,
    ) -> Result<()> {
        let mut changes = Vec::new();
        if let Some(display_name) = display_name {
            changes.push(("displayName", json!(display_name)));
        }
        if let Some(configs) = objective_configs {
            changes.push((
                "modelDeploymentMonitoringObjectiveConfigs",
                Value::Array(configs),
            ));
        }
        if let Some(interval) = monitor_interval {
            changes.push((
                "modelDeploymentMonitoringScheduleConfig",
                json!({"monitorInterval": format!("{}s", interval.as_secs())}),
            ));
        }
        self.base.update_fields(changes).await
    }

    /// Schedule deletion; idempotent on an already-deleted proxy
    pub async fn delete(&self, sync: bool) -> Result<()> {
        self.base.delete(sync, false).await
    }

    pub async fn list(ctx: &Context, params: ListParams) -> Result<Vec<Value>> {
        let base = ResourceBase::detached(ctx, ResourceKind::ModelMonitor).await?;
        let path = format!("{}/modelMonitors", base.client.parent_path());
        list_resources(&base.client, &path, "modelMonitors", &params).await
    }
}
