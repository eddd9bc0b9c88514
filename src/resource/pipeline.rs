//! Pipelines
//!
//! A pipeline run starts from a template reference: a local file, an
//! object-store URI or an HTTPS URI, in JSON or YAML. Remote templates are
//! fetched once per run and cached in-process. Parameters are validated
//! against the template's input definitions and encoded per the template's
//! schema version: 2.1 and later take raw JSON values, 2.0 takes the
//! type-tagged legacy form.

use crate::config::Context;
use crate::error::{Error, Result};
use crate::gcp::client::PlatformClient;
use crate::pool::ResourceFuture;
use crate::resource::base::{schedule_from, ResourceBase, ResourceState};
use crate::resource::job::delegate_base;
use crate::resource::list::{list_resources, ListParams};
use crate::resource::name::ResourceKind;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

/// Options for pipeline submission
#[derive(Default)]
pub struct PipelineOptions {
    /// Root output directory; defaults to the context's staging bucket
    pub pipeline_root: Option<String>,
    /// Parameter name to value, validated against the template
    pub parameter_values: HashMap<String, Value>,
    pub enable_caching: Option<bool>,
    pub create_request_timeout: Option<Duration>,
    pub depends_on: Vec<ResourceFuture>,
    pub poll_interval: Option<Duration>,
}

/// A pipeline run
#[derive(Clone)]
pub struct PipelineJob {
    base: ResourceBase,
}

impl std::fmt::Debug for PipelineJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineJob").finish_non_exhaustive()
    }
}

impl PipelineJob {
    delegate_base!();

    /// Proxy for an existing pipeline run, by full name or bare id
    pub async fn new(ctx: &Context, name_or_id: &str) -> Result<Self> {
        Ok(Self {
            base: ResourceBase::from_name(ctx, ResourceKind::PipelineJob, name_or_id, None).await?,
        })
    }

    /// Register a pipeline run and return immediately
    pub async fn submit(
        ctx: &Context,
        display_name: &str,
        template_ref: &str,
        options: PipelineOptions,
    ) -> Result<Self> {
        if display_name.is_empty() {
            return Err(Error::BadArgument("display_name must not be empty".into()));
        }

        let base = ResourceBase::detached(ctx, ResourceKind::PipelineJob).await?;

        let template = load_template(&base.client, template_ref).await?;
        let mut pipeline_spec = pipeline_spec_of(&template)?;
        if let Some(enable) = options.enable_caching {
            set_caching(&mut pipeline_spec, enable);
        }
        let runtime_config = build_runtime_config(ctx, &pipeline_spec, &options)?;

        let mut body = json!({
            "displayName": display_name,
            "pipelineSpec": pipeline_spec,
            "runtimeConfig": runtime_config,
        });
        if let Some(key) = ctx.encryption_spec_key_name() {
            body["encryptionSpec"] = json!({"kmsKeyName": key});
        }
        if let Some(account) = ctx.service_account() {
            body["serviceAccount"] = json!(account);
        }
        if let Some(network) = ctx.network() {
            body["network"] = json!(network);
        }

        let create_path = format!("{}/pipelineJobs", base.client.parent_path());
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

    /// Submit and block until the run reaches a terminal state
    pub async fn run(
        ctx: &Context,
        display_name: &str,
        template_ref: &str,
        options: PipelineOptions,
    ) -> Result<Self> {
        let job = Self::submit(ctx, display_name, template_ref, options).await?;
        job.wait().await?;
        Ok(job)
    }

    /// Request server-side cancellation; does not wait for the transition
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
        let base = ResourceBase::detached(ctx, ResourceKind::PipelineJob).await?;
        let path = format!("{}/pipelineJobs", base.client.parent_path());
        list_resources(&base.client, &path, "pipelineJobs", &params).await
    }
}

/// A model evaluation run, expressed as a pipeline over a staged template
#[derive(Clone)]
pub struct ModelEvaluationJob {
    inner: PipelineJob,
}

impl ModelEvaluationJob {
    /// Submit an evaluation of `model` over the template at `template_ref`
    ///
    /// The model name is injected as a pipeline parameter alongside any the
    /// caller supplied.
    pub async fn submit(
        ctx: &Context,
        display_name: &str,
        model: &str,
        template_ref: &str,
        mut options: PipelineOptions,
    ) -> Result<Self> {
        options
            .parameter_values
            .insert("model_name".to_string(), json!(model));
        let inner = PipelineJob::submit(ctx, display_name, template_ref, options).await?;
        Ok(Self { inner })
    }

    pub async fn run(
        ctx: &Context,
        display_name: &str,
        model: &str,
        template_ref: &str,
        options: PipelineOptions,
    ) -> Result<Self> {
        let job = Self::submit(ctx, display_name, model, template_ref, options).await?;
        job.inner.wait().await?;
        Ok(job)
    }

    pub fn pipeline_job(&self) -> &PipelineJob {
        &self.inner
    }

    pub fn resource_name(&self) -> Result<String> {
        self.inner.resource_name()
    }

    pub async fn state(&self) -> Result<ResourceState> {
        self.inner.state().await
    }

    pub async fn wait(&self) -> Result<()> {
        self.inner.wait().await
    }

    pub async fn cancel(&self) -> Result<()> {
        self.inner.cancel().await
    }
}

// ============================================================================
// Template loading
// ============================================================================

fn template_cache() -> &'static Mutex<HashMap<String, Value>> {
    static CACHE: OnceLock<Mutex<HashMap<String, Value>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Resolve a template reference into its decoded document
///
/// Local paths are read from disk; `gs://` and HTTP(S) references are
/// fetched once and cached for the life of the process.
async fn load_template(client: &PlatformClient, template_ref: &str) -> Result<Value> {
    let remote = template_ref.starts_with("gs://")
        || template_ref.starts_with("https://")
        || template_ref.starts_with("http://");

    if remote {
        if let Some(cached) = template_cache()
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(template_ref)
        {
            return Ok(cached.clone());
        }
    }

    let text = if let Some(rest) = template_ref.strip_prefix("gs://") {
        let (bucket, object) = rest.split_once('/').ok_or_else(|| {
            Error::BadArgument(format!("malformed template URI: {}", template_ref))
        })?;
        client.read_storage_object(bucket, object).await?
    } else if remote {
        url::Url::parse(template_ref).map_err(|e| {
            Error::BadArgument(format!("malformed template URL {}: {}", template_ref, e))
        })?;
        client.read_http_document(template_ref).await?
    } else {
        tokio::fs::read_to_string(template_ref).await.map_err(|e| {
            Error::BadArgument(format!("cannot read template {}: {}", template_ref, e))
        })?
    };

    let document = parse_template(&text, template_ref)?;

    if remote {
        template_cache()
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(template_ref.to_string(), document.clone());
    }
    Ok(document)
}

/// Decode a template document, trying JSON first then YAML
fn parse_template(text: &str, origin: &str) -> Result<Value> {
    if let Ok(value) = serde_json::from_str::<Value>(text) {
        return Ok(value);
    }
    serde_yaml::from_str::<Value>(text)
        .map_err(|e| Error::BadArgument(format!("template {} is not JSON or YAML: {}", origin, e)))
}

/// Extract the pipeline spec from a template document
///
/// Compiled templates either are the spec, or wrap it under `pipelineSpec`.
fn pipeline_spec_of(template: &Value) -> Result<Value> {
    let spec = match template.get("pipelineSpec") {
        Some(inner) => inner.clone(),
        None => template.clone(),
    };
    if spec.get("schemaVersion").is_none() {
        return Err(Error::BadArgument(
            "template has no schemaVersion; not a compiled pipeline spec".into(),
        ));
    }
    Ok(spec)
}

/// Override caching on every task in the spec's DAG
fn set_caching(pipeline_spec: &mut Value, enable: bool) {
    let tasks = pipeline_spec
        .get_mut("root")
        .and_then(|r| r.get_mut("dag"))
        .and_then(|d| d.get_mut("tasks"))
        .and_then(|t| t.as_object_mut());
    if let Some(tasks) = tasks {
        for task in tasks.values_mut() {
            task["cachingOptions"] = json!({"enableCache": enable});
        }
    }
}

// ============================================================================
// Parameter encoding
// ============================================================================

/// Validate parameters against the spec's input definitions and build the
/// runtime config
fn build_runtime_config(
    ctx: &Context,
    pipeline_spec: &Value,
    options: &PipelineOptions,
) -> Result<Value> {
    let output_directory = match &options.pipeline_root {
        Some(root) => root.clone(),
        None => ctx.staging_bucket().ok_or_else(|| {
            Error::BadArgument(
                "pipeline_root is required when no staging bucket is configured".into(),
            )
        })?,
    };

    validate_parameters(pipeline_spec, &options.parameter_values)?;

    let schema_version = pipeline_spec
        .get("schemaVersion")
        .and_then(|v| v.as_str())
        .unwrap_or_default();

    let mut config = serde_json::Map::new();
    config.insert("gcsOutputDirectory".into(), json!(output_directory));

    if !options.parameter_values.is_empty() {
        if uses_legacy_encoding(schema_version) {
            let mut encoded = serde_json::Map::new();
            for (name, value) in &options.parameter_values {
                encoded.insert(name.clone(), encode_legacy_value(name, value)?);
            }
            config.insert("parameters".into(), Value::Object(encoded));
        } else {
            let mut encoded = serde_json::Map::new();
            for (name, value) in &options.parameter_values {
                encoded.insert(name.clone(), value.clone());
            }
            config.insert("parameterValues".into(), Value::Object(encoded));
        }
    }

    Ok(Value::Object(config))
}

/// Reject parameters the template does not declare
fn validate_parameters(pipeline_spec: &Value, values: &HashMap<String, Value>) -> Result<()> {
    if values.is_empty() {
        return Ok(());
    }
    let declared = pipeline_spec
        .get("root")
        .and_then(|r| r.get("inputDefinitions"))
        .and_then(|d| d.get("parameters"))
        .and_then(|p| p.as_object());
    match declared {
        Some(declared) => {
            for name in values.keys() {
                if !declared.contains_key(name) {
                    return Err(Error::BadArgument(format!(
                        "pipeline template does not declare parameter '{}'",
                        name
                    )));
                }
            }
            Ok(())
        }
        None => Err(Error::BadArgument(
            "pipeline template declares no parameters".into(),
        )),
    }
}

fn uses_legacy_encoding(schema_version: &str) -> bool {
    schema_version.starts_with("2.0")
}

/// Legacy schema 2.0 value encoding with explicit type tags
///
/// Only scalar parameters exist in 2.0; anything else is a local error
/// rather than a server round trip.
fn encode_legacy_value(name: &str, value: &Value) -> Result<Value> {
    match value {
        Value::String(s) => Ok(json!({"stringValue": s})),
        Value::Number(n) if n.is_i64() || n.is_u64() => Ok(json!({"intValue": n})),
        Value::Number(n) => Ok(json!({"doubleValue": n})),
        _ => Err(Error::BadArgument(format!(
            "parameter '{}' has type unsupported by schema 2.0; use a string or number",
            name
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> Context {
        Context::builder()
            .project("demo-project")
            .location("us-central1")
            .staging_bucket("gs://demo-bucket")
            .build()
            .unwrap()
    }

    fn spec_with(schema_version: &str, params: &[&str]) -> Value {
        let mut declared = serde_json::Map::new();
        for p in params {
            declared.insert(p.to_string(), json!({"parameterType": "STRING"}));
        }
        json!({
            "schemaVersion": schema_version,
            "root": {"inputDefinitions": {"parameters": declared}},
        })
    }

    #[test]
    fn test_new_schema_raw_values() {
        let mut options = PipelineOptions::default();
        options
            .parameter_values
            .insert("int_param".into(), json!(5678));
        let spec = spec_with("2.1.0", &["int_param"]);
        let config = build_runtime_config(&ctx(), &spec, &options).unwrap();
        assert_eq!(config["parameterValues"]["int_param"], json!(5678));
        assert!(config.get("parameters").is_none());
    }

    #[test]
    fn test_legacy_schema_tagged_values() {
        let mut options = PipelineOptions::default();
        options
            .parameter_values
            .insert("string_param".into(), json!("hello"));
        let spec = spec_with("2.0.0", &["string_param"]);
        let config = build_runtime_config(&ctx(), &spec, &options).unwrap();
        assert_eq!(
            config["parameters"]["string_param"],
            json!({"stringValue": "hello"})
        );
        assert!(config.get("parameterValues").is_none());
    }

    #[test]
    fn test_legacy_schema_rejects_bool() {
        let mut options = PipelineOptions::default();
        options.parameter_values.insert("flag".into(), json!(true));
        let spec = spec_with("2.0.0", &["flag"]);
        let err = build_runtime_config(&ctx(), &spec, &options).unwrap_err();
        assert!(matches!(err, Error::BadArgument(_)));
    }

    #[test]
    fn test_undeclared_parameter_rejected() {
        let mut options = PipelineOptions::default();
        options.parameter_values.insert("typo".into(), json!(1));
        let spec = spec_with("2.1.0", &["int_param"]);
        let err = build_runtime_config(&ctx(), &spec, &options).unwrap_err();
        assert!(matches!(err, Error::BadArgument(_)));
    }

    #[test]
    fn test_output_directory_prefers_pipeline_root() {
        let options = PipelineOptions {
            pipeline_root: Some("gs://explicit-root".into()),
            ..Default::default()
        };
        let spec = spec_with("2.1.0", &[]);
        let config = build_runtime_config(&ctx(), &spec, &options).unwrap();
        assert_eq!(config["gcsOutputDirectory"], json!("gs://explicit-root"));
    }

    #[test]
    fn test_missing_root_and_bucket_rejected() {
        let bare = Context::builder()
            .project("demo-project")
            .location("us-central1")
            .build()
            .unwrap();
        let spec = spec_with("2.1.0", &[]);
        let err = build_runtime_config(&bare, &spec, &PipelineOptions::default()).unwrap_err();
        assert!(matches!(err, Error::BadArgument(_)));
    }

    #[test]
    fn test_parse_template_yaml_fallback() {
        let yaml = "schemaVersion: 2.1.0\nroot:\n  inputDefinitions:\n    parameters: {}\n";
        let value = parse_template(yaml, "template.yaml").unwrap();
        assert_eq!(value["schemaVersion"], json!("2.1.0"));
    }

    #[test]
    fn test_pipeline_spec_unwraps_wrapper() {
        let wrapped = json!({"pipelineSpec": {"schemaVersion": "2.1.0"}});
        let spec = pipeline_spec_of(&wrapped).unwrap();
        assert_eq!(spec["schemaVersion"], json!("2.1.0"));

        let bare = json!({"schemaVersion": "2.0.0"});
        assert_eq!(pipeline_spec_of(&bare).unwrap(), bare);
    }

    #[test]
    fn test_set_caching_touches_every_task() {
        let mut spec = json!({
            "schemaVersion": "2.1.0",
            "root": {"dag": {"tasks": {
                "train": {"taskInfo": {"name": "train"}},
                "eval": {"taskInfo": {"name": "eval"}},
            }}},
        });
        set_caching(&mut spec, false);
        for task in spec["root"]["dag"]["tasks"].as_object().unwrap().values() {
            assert_eq!(task["cachingOptions"], json!({"enableCache": false}));
        }
    }

    #[test]
    fn test_template_without_schema_rejected() {
        assert!(pipeline_spec_of(&json!({"whatever": 1})).is_err());
    }
}
