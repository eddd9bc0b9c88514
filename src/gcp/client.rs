//! Platform client
//!
//! Regional client for the Vertex AI REST surface, combining authentication
//! and HTTP functionality. Owns URL construction for the versioned API, the
//! long-running-operations sub-surface, and object-store reads used for
//! staged pipeline templates.

use crate::config::Context;
use crate::error::{Error, Result};
use crate::gcp::auth::Credentials;
use crate::gcp::http::HttpClient;
use crate::retry::RetryPolicy;
use reqwest::Method;
use serde_json::Value;
use std::time::Duration;

/// Main client for the platform API
#[derive(Clone)]
pub struct PlatformClient {
    credentials: Credentials,
    http: HttpClient,
    /// API base, e.g. `https://us-central1-aiplatform.googleapis.com`
    base_url: String,
    /// Object-store base, e.g. `https://storage.googleapis.com`
    storage_url: String,
    pub project: String,
    pub location: String,
}

impl PlatformClient {
    /// Create a client for the context's project and location
    pub async fn new(ctx: &Context) -> Result<Self> {
        let project = ctx.project()?;
        let location = ctx.location()?;

        let credentials = match ctx.credentials() {
            Some(c) => c,
            None => Credentials::adc().await?,
        };

        let http = HttpClient::new()?;

        let (base_url, storage_url) = match ctx.endpoint_override() {
            Some(endpoint) => {
                let endpoint = endpoint.trim_end_matches('/').to_string();
                (endpoint.clone(), endpoint)
            }
            None => (
                format!("https://{}-aiplatform.googleapis.com", location),
                "https://storage.googleapis.com".to_string(),
            ),
        };

        Ok(Self {
            credentials,
            http,
            base_url,
            storage_url,
            project,
            location,
        })
    }

    /// Get the current access token
    pub async fn token(&self) -> Result<String> {
        self.credentials.token().await
    }

    /// The `projects/{p}/locations/{l}` prefix for this client
    pub fn parent_path(&self) -> String {
        format!("projects/{}/locations/{}", self.project, self.location)
    }

    /// Build a versioned API URL from a resource path
    pub fn api_url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn with_query(url: String, query: &[(&str, String)]) -> String {
        if query.is_empty() {
            return url;
        }
        let qs = query
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        format!("{}?{}", url, qs)
    }

    /// GET a resource path; reads carry the default retry policy
    pub async fn get(
        &self,
        path: &str,
        query: &[(&str, String)],
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let token = self.token().await?;
        let url = Self::with_query(self.api_url(path), query);
        self.http
            .request_json(
                Method::GET,
                &url,
                &token,
                None,
                timeout,
                &RetryPolicy::default(),
                &format!("GET {}", path),
            )
            .await
    }

    /// POST to a resource path; never retried at this layer
    pub async fn post(
        &self,
        path: &str,
        body: &Value,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let token = self.token().await?;
        let url = self.api_url(path);
        self.http
            .request_json(
                Method::POST,
                &url,
                &token,
                Some(body),
                timeout,
                &RetryPolicy::none(),
                &format!("POST {}", path),
            )
            .await
    }

    /// PATCH a resource with an explicit field mask
    pub async fn patch(
        &self,
        path: &str,
        body: &Value,
        update_mask: &str,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let token = self.token().await?;
        let url = Self::with_query(
            self.api_url(path),
            &[("updateMask", update_mask.to_string())],
        );
        self.http
            .request_json(
                Method::PATCH,
                &url,
                &token,
                Some(body),
                timeout,
                &RetryPolicy::none(),
                &format!("PATCH {}", path),
            )
            .await
    }

    /// DELETE a resource path, returning the delete operation
    pub async fn delete(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let token = self.token().await?;
        let url = Self::with_query(self.api_url(path), query);
        self.http
            .request_json(
                Method::DELETE,
                &url,
                &token,
                None,
                None,
                &RetryPolicy::none(),
                &format!("DELETE {}", path),
            )
            .await
    }

    /// POST returning a server-streaming response body
    pub async fn post_stream(
        &self,
        path: &str,
        body: &Value,
        timeout: Option<Duration>,
    ) -> Result<reqwest::Response> {
        let token = self.token().await?;
        let url = self.api_url(path);
        self.http
            .request_stream(&url, &token, body, timeout, &format!("POST {}", path))
            .await
    }

    // =========================================================================
    // Long-running operations
    // =========================================================================

    /// Normalize an operation name: accept the bare versioned form and the
    /// UI-prefixed variant embedded in console URIs
    pub fn normalize_operation_name(name: &str) -> Result<String> {
        let trimmed = name
            .trim_start_matches("/ui/")
            .trim_start_matches("/v1/")
            .trim_start_matches('/');
        if !trimmed.starts_with("projects/") || !trimmed.contains("/operations/") {
            return Err(Error::BadArgument(format!(
                "malformed operation name: {}",
                name
            )));
        }
        Ok(trimmed.to_string())
    }

    /// GET an operation by name
    pub async fn get_operation(&self, name: &str) -> Result<Value> {
        let name = Self::normalize_operation_name(name)?;
        self.get(&name, &[], None).await
    }

    /// Best-effort cancel of an operation
    pub async fn cancel_operation(&self, name: &str) -> Result<()> {
        let name = Self::normalize_operation_name(name)?;
        self.post(&format!("{}:cancel", name), &Value::Null, None)
            .await?;
        Ok(())
    }

    /// Server-side wait on an operation, bounded by `timeout`
    pub async fn wait_operation(&self, name: &str, timeout: Duration) -> Result<Value> {
        let name = Self::normalize_operation_name(name)?;
        let body = serde_json::json!({
            "timeout": format!("{}s", timeout.as_secs()),
        });
        self.post(&format!("{}:wait", name), &body, None).await
    }

    // =========================================================================
    // Object store (staged pipeline templates)
    // =========================================================================

    /// Read an object's content from the object store
    pub async fn read_storage_object(&self, bucket: &str, object: &str) -> Result<String> {
        let token = self.token().await?;
        let url = format!(
            "{}/storage/v1/b/{}/o/{}?alt=media",
            self.storage_url,
            bucket,
            urlencoding::encode(object)
        );
        self.http
            .request_text(
                &url,
                Some(&token),
                &RetryPolicy::default(),
                &format!("GET gs://{}/{}", bucket, object),
            )
            .await
    }

    /// Fetch a remote document over plain HTTP(S), without auth
    pub async fn read_http_document(&self, url: &str) -> Result<String> {
        self.http
            .request_text(url, None, &RetryPolicy::default(), &format!("GET {}", url))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_operation_name() {
        let versioned = "projects/p/locations/l/operations/123";
        assert_eq!(
            PlatformClient::normalize_operation_name(versioned).unwrap(),
            versioned
        );

        let ui = "/ui/projects/p/locations/l/endpoints/9/operations/123";
        assert_eq!(
            PlatformClient::normalize_operation_name(ui).unwrap(),
            "projects/p/locations/l/endpoints/9/operations/123"
        );

        assert!(PlatformClient::normalize_operation_name("operations/123").is_err());
        assert!(PlatformClient::normalize_operation_name("projects/p/locations/l").is_err());
    }

    #[test]
    fn test_with_query_encoding() {
        let url = PlatformClient::with_query(
            "https://example.com/v1/things".to_string(),
            &[("filter", "display_name=\"a b\"".to_string())],
        );
        assert_eq!(
            url,
            "https://example.com/v1/things?filter=display_name%3D%22a%20b%22"
        );
    }
}
