//! Ambient configuration
//!
//! A [`Context`] carries the defaults every resource constructor consumes:
//! project, location, credentials, staging bucket, CMEK key, network,
//! service account and experiment binding. Resolution order is explicit
//! builder fields, then process defaults set by [`init`], then ambient
//! discovery (environment variables, gcloud configuration) performed once
//! and cached.

use crate::error::{Error, Result};
use crate::gcp::auth::Credentials;
use std::path::PathBuf;
use std::sync::{OnceLock, RwLock};

/// Locations the client accepts for the `location` option
///
/// Kept as a fixed table; an unknown location is rejected locally rather
/// than round-tripping to the server.
pub const SUPPORTED_LOCATIONS: &[&str] = &[
    "us-central1",
    "us-east1",
    "us-east4",
    "us-west1",
    "us-west2",
    "us-west3",
    "us-west4",
    "northamerica-northeast1",
    "southamerica-east1",
    "europe-west1",
    "europe-west2",
    "europe-west3",
    "europe-west4",
    "europe-west6",
    "europe-north1",
    "asia-east1",
    "asia-east2",
    "asia-northeast1",
    "asia-northeast3",
    "asia-south1",
    "asia-southeast1",
    "australia-southeast1",
];

/// Default location when neither the caller nor the environment supplies one
pub const DEFAULT_LOCATION: &str = "us-central1";

/// Ambient defaults for resource construction
#[derive(Clone, Default)]
pub struct Context {
    pub(crate) project: Option<String>,
    pub(crate) location: Option<String>,
    pub(crate) credentials: Option<Credentials>,
    pub(crate) staging_bucket: Option<String>,
    pub(crate) encryption_spec_key_name: Option<String>,
    pub(crate) network: Option<String>,
    pub(crate) service_account: Option<String>,
    pub(crate) experiment: Option<String>,
    pub(crate) experiment_run: Option<String>,
    /// Base URL override for the transport, used by tests to point the
    /// client at a local server
    pub(crate) endpoint_override: Option<String>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("project", &self.project)
            .field("location", &self.location)
            .field("staging_bucket", &self.staging_bucket)
            .field("encryption_spec_key_name", &self.encryption_spec_key_name)
            .field("network", &self.network)
            .field("service_account", &self.service_account)
            .field("experiment", &self.experiment)
            .field("experiment_run", &self.experiment_run)
            .field("endpoint_override", &self.endpoint_override)
            .finish_non_exhaustive()
    }
}

impl Context {
    pub fn builder() -> ContextBuilder {
        ContextBuilder::default()
    }

    /// Derive a context with `overlay`'s set fields taking precedence
    ///
    /// This is the nested-scope mechanism: instead of a thread-local stack,
    /// a scoped override is an explicit derived value.
    pub fn scoped(&self, overlay: Context) -> Context {
        Context {
            project: overlay.project.or_else(|| self.project.clone()),
            location: overlay.location.or_else(|| self.location.clone()),
            credentials: overlay.credentials.or_else(|| self.credentials.clone()),
            staging_bucket: overlay
                .staging_bucket
                .or_else(|| self.staging_bucket.clone()),
            encryption_spec_key_name: overlay
                .encryption_spec_key_name
                .or_else(|| self.encryption_spec_key_name.clone()),
            network: overlay.network.or_else(|| self.network.clone()),
            service_account: overlay
                .service_account
                .or_else(|| self.service_account.clone()),
            experiment: overlay.experiment.or_else(|| self.experiment.clone()),
            experiment_run: overlay
                .experiment_run
                .or_else(|| self.experiment_run.clone()),
            endpoint_override: overlay
                .endpoint_override
                .or_else(|| self.endpoint_override.clone()),
        }
    }

    /// Effective project: builder field > process default > ambient discovery
    pub fn project(&self) -> Result<String> {
        if let Some(p) = &self.project {
            return Ok(p.clone());
        }
        if let Some(p) = process_defaults().project {
            return Ok(p);
        }
        if let Some(p) = ambient().project.clone() {
            return Ok(p);
        }
        Err(Error::BadArgument(
            "no project set; pass one explicitly or call init()".to_string(),
        ))
    }

    /// Effective location, validated against the known location table
    pub fn location(&self) -> Result<String> {
        let location = self
            .location
            .clone()
            .or_else(|| process_defaults().location)
            .or_else(|| ambient().location.clone())
            .unwrap_or_else(|| DEFAULT_LOCATION.to_string());
        validate_location(&location)?;
        Ok(location)
    }

    pub fn credentials(&self) -> Option<Credentials> {
        self.credentials
            .clone()
            .or_else(|| process_defaults().credentials)
    }

    pub fn staging_bucket(&self) -> Option<String> {
        self.staging_bucket
            .clone()
            .or_else(|| process_defaults().staging_bucket)
            .or_else(|| std::env::var("VERTEX_STAGING_BUCKET").ok())
    }

    pub fn encryption_spec_key_name(&self) -> Option<String> {
        self.encryption_spec_key_name
            .clone()
            .or_else(|| process_defaults().encryption_spec_key_name)
    }

    pub fn network(&self) -> Option<String> {
        self.network.clone().or_else(|| process_defaults().network)
    }

    pub fn service_account(&self) -> Option<String> {
        self.service_account
            .clone()
            .or_else(|| process_defaults().service_account)
    }

    pub fn experiment(&self) -> Option<String> {
        self.experiment
            .clone()
            .or_else(|| process_defaults().experiment)
    }

    pub fn experiment_run(&self) -> Option<String> {
        self.experiment_run
            .clone()
            .or_else(|| process_defaults().experiment_run)
    }

    pub fn endpoint_override(&self) -> Option<String> {
        self.endpoint_override
            .clone()
            .or_else(|| process_defaults().endpoint_override)
    }
}

/// Builder for [`Context`]
#[derive(Default)]
pub struct ContextBuilder {
    ctx: Context,
}

impl ContextBuilder {
    pub fn project(mut self, project: impl Into<String>) -> Self {
        self.ctx.project = Some(project.into());
        self
    }

    pub fn location(mut self, location: impl Into<String>) -> Self {
        self.ctx.location = Some(location.into());
        self
    }

    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.ctx.credentials = Some(credentials);
        self
    }

    pub fn staging_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.ctx.staging_bucket = Some(bucket.into());
        self
    }

    pub fn encryption_spec_key_name(mut self, key: impl Into<String>) -> Self {
        self.ctx.encryption_spec_key_name = Some(key.into());
        self
    }

    pub fn network(mut self, network: impl Into<String>) -> Self {
        self.ctx.network = Some(network.into());
        self
    }

    pub fn service_account(mut self, account: impl Into<String>) -> Self {
        self.ctx.service_account = Some(account.into());
        self
    }

    pub fn experiment(mut self, experiment: impl Into<String>) -> Self {
        self.ctx.experiment = Some(experiment.into());
        self
    }

    pub fn experiment_run(mut self, run: impl Into<String>) -> Self {
        self.ctx.experiment_run = Some(run.into());
        self
    }

    pub fn endpoint_override(mut self, endpoint: impl Into<String>) -> Self {
        self.ctx.endpoint_override = Some(endpoint.into());
        self
    }

    pub fn build(self) -> Result<Context> {
        if let Some(location) = &self.ctx.location {
            validate_location(location)?;
        }
        Ok(self.ctx)
    }
}

/// Replace the process-wide defaults
///
/// Expected to be called once during application startup; later calls
/// replace the defaults wholesale.
pub fn init(ctx: Context) -> Result<()> {
    if let Some(location) = &ctx.location {
        validate_location(location)?;
    }
    let mut guard = global_defaults()
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    *guard = ctx;
    Ok(())
}

fn global_defaults() -> &'static RwLock<Context> {
    static DEFAULTS: OnceLock<RwLock<Context>> = OnceLock::new();
    DEFAULTS.get_or_init(|| RwLock::new(Context::default()))
}

fn process_defaults() -> Context {
    global_defaults()
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone()
}

pub(crate) fn validate_location(location: &str) -> Result<()> {
    if SUPPORTED_LOCATIONS.contains(&location) {
        Ok(())
    } else {
        Err(Error::BadArgument(format!(
            "unsupported location '{}'; known locations: {}",
            location,
            SUPPORTED_LOCATIONS.join(", ")
        )))
    }
}

// ============================================================================
// Ambient discovery
// ============================================================================

/// Defaults discovered from the environment, computed once per process
struct Ambient {
    project: Option<String>,
    location: Option<String>,
}

fn ambient() -> &'static Ambient {
    static AMBIENT: OnceLock<Ambient> = OnceLock::new();
    AMBIENT.get_or_init(|| Ambient {
        project: discover_project(),
        location: discover_location(),
    })
}

/// Get the gcloud configuration directory
fn gcloud_config_dir() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("CLOUDSDK_CONFIG") {
        return Some(PathBuf::from(path));
    }
    dirs::config_dir().map(|p| p.join("gcloud"))
}

/// Validate a GCP project ID format
/// Project IDs must be 6-30 characters, lowercase letters, digits, and hyphens
/// Must start with a letter and cannot end with a hyphen
fn validate_project_id(project: &str) -> bool {
    if project.len() < 6 || project.len() > 30 {
        return false;
    }
    match project.chars().next() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => return false,
    }
    if project.ends_with('-') {
        return false;
    }
    project
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

/// Read the default project from the environment or gcloud configuration
fn discover_project() -> Option<String> {
    for var in [
        "GOOGLE_CLOUD_PROJECT",
        "CLOUDSDK_CORE_PROJECT",
        "GCLOUD_PROJECT",
    ] {
        if let Ok(project) = std::env::var(var) {
            if validate_project_id(&project) {
                return Some(project);
            }
            tracing::warn!("Invalid project ID format in {}", var);
        }
    }

    let config_dir = gcloud_config_dir()?;
    let active_config_path = config_dir.join("active_config");
    let active_config = std::fs::read_to_string(&active_config_path).ok()?;
    let config_name = active_config.trim();

    // Reject config names that could traverse outside the config dir
    if !config_name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        tracing::warn!("Invalid characters in active_config name");
        return None;
    }

    let config_path = config_dir
        .join("configurations")
        .join(format!("config_{}", config_name));
    let content = std::fs::read_to_string(&config_path).ok()?;

    read_ini_value(&content, "core", "project").filter(|p| validate_project_id(p))
}

/// Read the default region from the environment or gcloud configuration
fn discover_location() -> Option<String> {
    if let Ok(region) = std::env::var("CLOUDSDK_COMPUTE_REGION") {
        return Some(region);
    }

    let config_dir = gcloud_config_dir()?;
    let active_config_path = config_dir.join("active_config");
    let active_config = std::fs::read_to_string(&active_config_path).ok()?;
    let config_name = active_config.trim();
    let config_path = config_dir
        .join("configurations")
        .join(format!("config_{}", config_name));
    let content = std::fs::read_to_string(&config_path).ok()?;

    read_ini_value(&content, "compute", "region")
}

/// Minimal gcloud-properties reader: `[section]` headers, `key = value` lines
fn read_ini_value(content: &str, section: &str, key: &str) -> Option<String> {
    let header = format!("[{}]", section);
    let mut in_section = false;
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if line == header {
            in_section = true;
        } else if line.starts_with('[') {
            in_section = false;
        } else if in_section && line.starts_with(key) && line.contains('=') {
            if let Some(value) = line.split('=').nth(1) {
                return Some(value.trim().to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_location() {
        assert!(validate_location("us-central1").is_ok());
        assert!(validate_location("europe-west4").is_ok());
        assert!(validate_location("us-central1-a").is_err());
        assert!(validate_location("moon-base1").is_err());
    }

    #[test]
    fn test_builder_rejects_bad_location() {
        let result = Context::builder().location("nowhere").build();
        assert!(result.is_err());
    }

    #[test]
    fn test_scoped_overlay_precedence() {
        let base = Context::builder()
            .project("base-project")
            .location("us-central1")
            .staging_bucket("gs://base-bucket")
            .build()
            .unwrap();
        let scoped = base.scoped(
            Context::builder()
                .project("scoped-project")
                .build()
                .unwrap(),
        );
        assert_eq!(scoped.project.as_deref(), Some("scoped-project"));
        assert_eq!(scoped.location.as_deref(), Some("us-central1"));
        assert_eq!(scoped.staging_bucket.as_deref(), Some("gs://base-bucket"));
    }

    #[test]
    fn test_validate_project_id() {
        assert!(validate_project_id("my-project-123"));
        assert!(!validate_project_id("short"));
        assert!(!validate_project_id("Uppercase-project"));
        assert!(!validate_project_id("trailing-hyphen-"));
    }

    #[test]
    fn test_read_ini_value() {
        let content = "# comment\n[core]\nproject = demo-project\n[compute]\nregion = us-east1\n";
        assert_eq!(
            read_ini_value(content, "core", "project").as_deref(),
            Some("demo-project")
        );
        assert_eq!(
            read_ini_value(content, "compute", "region").as_deref(),
            Some("us-east1")
        );
        assert_eq!(read_ini_value(content, "core", "region"), None);
    }
}
