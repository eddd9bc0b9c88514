//! Jobs
//!
//! Custom training jobs and batch prediction jobs. Both distinguish
//! `submit` (returns immediately; the scheduled task registers the job and
//! drives it to a terminal state) from `run` (submit plus wait). Both
//! expose a server-side `cancel`.

use crate::config::Context;
use crate::error::{Error, Result};
use crate::pool::ResourceFuture;
use crate::resource::base::{schedule_from, ResourceBase, ResourceState};
use crate::resource::list::{list_resources, ListParams};
use crate::resource::name::ResourceKind;
use serde_json::{json, Value};
use std::time::Duration;

/// Options shared by job creators
#[derive(Default)]
pub struct SubmitOptions {
    /// Bounds the create RPC only; `None` uses the adapter default
    pub create_request_timeout: Option<Duration>,
    /// Futures this job must not start before
    pub depends_on: Vec<ResourceFuture>,
    /// Override for the state-poll interval, mainly for tests
    pub poll_interval: Option<Duration>,
}

macro_rules! delegate_base {
    () => {
        /// Canonical resource path; non-blocking
        pub fn resource_name(&self) -> Result<String> {
            self.base.resource_name()
        }

        /// Current state, blocking on any pending mutation
        pub async fn state(&self) -> Result<ResourceState> {
            self.base.state().await
        }

        /// The last server snapshot, fetched lazily
        pub async fn gca_resource(&self) -> Result<Value> {
            self.base.gca_resource().await
        }

        /// Force a GET and refresh the snapshot
        pub async fn sync_from_server(&self) -> Result<Value> {
            self.base.sync_from_server().await
        }

        /// Whether the server has assigned a resource name yet; non-blocking
        pub fn resource_is_available(&self) -> bool {
            self.base.resource_is_available()
        }

        /// Block until the server has assigned a resource name
        pub async fn wait_for_resource_creation(&self) -> Result<String> {
            self.base.wait_for_resource_creation().await
        }

        /// Block until the pending mutation resolves
        pub async fn wait(&self) -> Result<()> {
            self.base.wait().await
        }

        /// Non-blocking terminal check
        pub fn done(&self) -> bool {
            self.base.done()
        }

        /// Cached display name, when the snapshot carries one
        pub fn display_name(&self) -> Option<String> {
            self.base.display_name()
        }

        /// The in-flight future that will next mutate this proxy
        pub fn latest_future(&self) -> Option<ResourceFuture> {
            self.base.latest_future()
        }
    };
}
pub(crate) use delegate_base;

/// A custom training job
#[derive(Clone)]
pub struct CustomJob {
    base: ResourceBase,
}

impl CustomJob {
    delegate_base!();

    /// Proxy for an existing job, by full name or bare id
    pub async fn new(ctx: &Context, name_or_id: &str) -> Result<Self> {
        Ok(Self {
            base: ResourceBase::from_name(ctx, ResourceKind::CustomJob, name_or_id, None).await?,
        })
    }

    /// Register the job and return immediately
    ///
    /// The scheduled task issues the create RPC, publishes the assigned
    /// name, and polls the job to a terminal state. `wait_for_resource_creation`
    /// resolves at name assignment; `wait` resolves at the terminal state.
    pub async fn submit(
        ctx: &Context,
        display_name: &str,
        worker_pool_specs: Vec<Value>,
        options: SubmitOptions,
    ) -> Result<Self> {
        if display_name.is_empty() {
            return Err(Error::BadArgument("display_name must not be empty".into()));
        }
        if worker_pool_specs.is_empty() {
            return Err(Error::BadArgument(
                "worker_pool_specs must not be empty".into(),
            ));
        }

        let base = ResourceBase::detached(ctx, ResourceKind::CustomJob).await?;

        let mut job_spec = serde_json::Map::new();
        job_spec.insert("workerPoolSpecs".into(), Value::Array(worker_pool_specs));
        if let Some(network) = ctx.network() {
            job_spec.insert("network".into(), json!(network));
        }
        if let Some(account) = ctx.service_account() {
            job_spec.insert("serviceAccount".into(), json!(account));
        }
        if let Some(bucket) = ctx.staging_bucket() {
            job_spec.insert(
                "baseOutputDirectory".into(),
                json!({"outputUriPrefix": format!("{}/custom-job/{}", bucket, display_name)}),
            );
        }

        let mut body = json!({
            "displayName": display_name,
            "jobSpec": Value::Object(job_spec),
        });
        if let Some(key) = ctx.encryption_spec_key_name() {
            body["encryptionSpec"] = json!({"kmsKeyName": key});
        }
        if let Some(experiment) = ctx.experiment() {
            let mut labels = json!({"experiment": experiment});
            if let Some(run) = ctx.experiment_run() {
                labels["experiment-run"] = json!(run);
            }
            body["labels"] = labels;
        }

        let create_path = format!("{}/customJobs", base.client.parent_path());
        base.launch_job_submit(
            false,
            options.depends_on,
            create_path,
            body,
            options.create_request_timeout,
            schedule_from(options.poll_interval),
        )
        .await?;

        Ok(Self { base })
    }

    /// Submit and block until the job reaches a terminal state
    pub async fn run(
        ctx: &Context,
        display_name: &str,
        worker_pool_specs: Vec<Value>,
        options: SubmitOptions,
    ) -> Result<Self> {
        let job = Self::submit(ctx, display_name, worker_pool_specs, options).await?;
        job.wait().await?;
        Ok(job)
    }

    /// Request server-side cancellation
    ///
    /// The job transitions running -> cancelling -> cancelled on the server;
    /// this does not wait for the transition.
    pub async fn cancel(&self) -> Result<()> {
        let name = self.base.resource_name()?;
        self.base
            .client
            .post(&format!("{}:cancel", name), &Value::Null, None)
            .await?;
        Ok(())
    }

    /// Web-access URIs for running replicas, from the last snapshot
    pub async fn web_access_uris(&self) -> Result<Value> {
        let resource = self.gca_resource().await?;
        Ok(resource.get("webAccessUris").cloned().unwrap_or(json!({})))
    }


    /// Schedule deletion; idempotent on an already-deleted proxy
    pub async fn delete(&self, sync: bool) -> Result<()> {
        self.base.delete(sync, false).await
    }

    /// List custom jobs in the context's project and location
    pub async fn list(ctx: &Context, params: ListParams) -> Result<Vec<Value>> {
        let base = ResourceBase::detached(ctx, ResourceKind::CustomJob).await?;
        let path = format!("{}/customJobs", base.client.parent_path());
        list_resources(&base.client, &path, "customJobs", &params).await
    }
}

/// A batch prediction job
#[derive(Clone)]
pub struct BatchPredictionJob {
    base: ResourceBase,
}

impl BatchPredictionJob {
    delegate_base!();

    pub async fn new(ctx: &Context, name_or_id: &str) -> Result<Self> {
        Ok(Self {
            base: ResourceBase::from_name(ctx, ResourceKind::BatchPredictionJob, name_or_id, None)
                .await?,
        })
    }

    /// Register a batch prediction over GCS sources and return immediately
    pub async fn submit(
        ctx: &Context,
        display_name: &str,
        model: &str,
        gcs_source_uris: Vec<String>,
        gcs_destination_prefix: &str,
        options: SubmitOptions,
    ) -> Result<Self> {
        if gcs_source_uris.is_empty() {
            return Err(Error::BadArgument(
                "at least one source URI is required".into(),
            ));
        }
        if gcs_destination_prefix.is_empty() {
            return Err(Error::BadArgument(
                "a destination prefix is required".into(),
            ));
        }

        let base = ResourceBase::detached(ctx, ResourceKind::BatchPredictionJob).await?;

        let mut body = json!({
            "displayName": display_name,
            "model": model,
            "inputConfig": {
                "instancesFormat": "jsonl",
                "gcsSource": {"uris": gcs_source_uris},
            },
            "outputConfig": {
                "predictionsFormat": "jsonl",
                "gcsDestination": {"outputUriPrefix": gcs_destination_prefix},
            },
        });
        if let Some(key) = ctx.encryption_spec_key_name() {
            body["encryptionSpec"] = json!({"kmsKeyName": key});
        }

        let create_path = format!("{}/batchPredictionJobs", base.client.parent_path());
        base.launch_job_submit(
            false,
            options.depends_on,
            create_path,
            body,
            options.create_request_timeout,
            schedule_from(options.poll_interval),
        )
        .await?;

        Ok(Self { base })
    }

    /// Submit and block until terminal
    pub async fn run(
        ctx: &Context,
        display_name: &str,
        model: &str,
        gcs_source_uris: Vec<String>,
        gcs_destination_prefix: &str,
        options: SubmitOptions,
    ) -> Result<Self> {
        let job = Self::submit(
            ctx,
            display_name,
            model,
            gcs_source_uris,
            gcs_destination_prefix,
            options,
        )
        .await?;
        job.wait().await?;
        Ok(job)
    }

    /// Request server-side cancellation
    pub async fn cancel(&self) -> Result<()> {
        let name = self.base.resource_name()?;
        self.base
            .client
            .post(&format!("{}:cancel", name), &Value::Null, None)
            .await?;
        Ok(())
    }


    /// Schedule deletion; idempotent on an already-deleted proxy
    pub async fn delete(&self, sync: bool) -> Result<()> {
        self.base.delete(sync, false).await
    }

    pub async fn list(ctx: &Context, params: ListParams) -> Result<Vec<Value>> {
        let base = ResourceBase::detached(ctx, ResourceKind::BatchPredictionJob).await?;
        let path = format!("{}/batchPredictionJobs", base.client.parent_path());
        list_resources(&base.client, &path, "batchPredictionJobs", &params).await
    }
}
