//! HTTP utilities for GCP REST API calls
//!
//! Thin wrapper over reqwest: bearer auth, optional per-call timeouts,
//! transient-error retries for read calls, and mapping of error responses
//! into structured [`Error`] kinds.

use crate::error::{Error, Result};
use crate::retry::RetryPolicy;
use reqwest::{Client, Method};
use serde_json::Value;
use std::time::Duration;

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

/// Sanitize response body for logging
/// Truncates long responses and strips non-printable characters
fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.len() > MAX_LOG_BODY_LENGTH {
        // The cut must land on a char boundary or the slice panics
        let mut end = MAX_LOG_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!(
            "{}... [truncated, {} bytes total]",
            &body[..end],
            body.len()
        )
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| !c.is_ascii_graphic() && c != ' ', "")
}

/// HTTP client wrapper for GCP API calls
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Create a new HTTP client
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("vertexai-rs/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Internal(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    /// Issue a JSON request and parse the JSON response
    ///
    /// Retries transient failures according to `retry`; mutating callers
    /// pass [`RetryPolicy::none`]. An empty success body parses to `Null`.
    pub async fn request_json(
        &self,
        method: Method,
        url: &str,
        token: &str,
        body: Option<&Value>,
        timeout: Option<Duration>,
        retry: &RetryPolicy,
        context: &str,
    ) -> Result<Value> {
        let mut attempt = 0u32;
        loop {
            tracing::debug!("{} {}", method, url);

            let mut request = self.client.request(method.clone(), url).bearer_auth(token);
            if let Some(body) = body {
                request = request.json(body);
            }
            if let Some(timeout) = timeout {
                request = request.timeout(timeout);
            }

            let response = match request.send().await {
                Ok(r) => r,
                Err(e) if e.is_timeout() => {
                    return Err(Error::DeadlineExceeded(format!("{}: {}", context, e)));
                }
                Err(e) => {
                    if attempt + 1 < retry.max_attempts && e.is_connect() {
                        tracing::warn!("Transient connect error, retrying: {}", e);
                        tokio::time::sleep(retry.backoff(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(Error::Internal(format!("{}: {}", context, e)));
                }
            };

            let status = response.status();
            let response_body = response
                .text()
                .await
                .map_err(|e| Error::Internal(format!("{}: failed to read body: {}", context, e)))?;

            if !status.is_success() {
                if attempt + 1 < retry.max_attempts
                    && retry.is_transient(status.as_u16(), &response_body)
                {
                    tracing::warn!("Transient API error {} on {}, retrying", status, context);
                    tokio::time::sleep(retry.backoff(attempt)).await;
                    attempt += 1;
                    continue;
                }
                // Only log sanitized/truncated error body to avoid leaking sensitive data
                tracing::error!("API error: {} - {}", status, sanitize_for_log(&response_body));
                return Err(Error::from_response(status.as_u16(), &response_body, context));
            }

            if response_body.is_empty() {
                return Ok(Value::Null);
            }

            return serde_json::from_str(&response_body).map_err(|e| {
                Error::Internal(format!("{}: failed to parse response JSON: {}", context, e))
            });
        }
    }

    /// GET a URL and return the raw body text
    ///
    /// Used for media downloads (pipeline templates) whose format is not
    /// known up front.
    pub async fn request_text(
        &self,
        url: &str,
        token: Option<&str>,
        retry: &RetryPolicy,
        context: &str,
    ) -> Result<String> {
        let mut attempt = 0u32;
        loop {
            tracing::debug!("GET {}", url);

            let mut request = self.client.get(url);
            if let Some(token) = token {
                request = request.bearer_auth(token);
            }

            let response = request
                .send()
                .await
                .map_err(|e| Error::Internal(format!("{}: {}", context, e)))?;

            let status = response.status();
            let body = response
                .text()
                .await
                .map_err(|e| Error::Internal(format!("{}: failed to read body: {}", context, e)))?;

            if !status.is_success() {
                if attempt + 1 < retry.max_attempts && retry.is_transient(status.as_u16(), &body) {
                    tokio::time::sleep(retry.backoff(attempt)).await;
                    attempt += 1;
                    continue;
                }
                tracing::error!("API error: {} - {}", status, sanitize_for_log(&body));
                return Err(Error::from_response(status.as_u16(), &body, context));
            }

            return Ok(body);
        }
    }

    /// Issue a POST whose response body is consumed as a stream
    ///
    /// Error statuses are mapped before the stream is handed back; the
    /// caller owns the connection and closes it by dropping the response.
    pub async fn request_stream(
        &self,
        url: &str,
        token: &str,
        body: &Value,
        timeout: Option<Duration>,
        context: &str,
    ) -> Result<reqwest::Response> {
        tracing::debug!("POST (streaming) {}", url);

        let mut request = self.client.post(url).bearer_auth(token).json(body);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::DeadlineExceeded(format!("{}: {}", context, e))
            } else {
                Error::Internal(format!("{}: {}", context, e))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!("API error: {} - {}", status, sanitize_for_log(&body));
            return Err(Error::from_response(status.as_u16(), &body, context));
        }

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_truncates_long_bodies() {
        let body = "x".repeat(500);
        let sanitized = sanitize_for_log(&body);
        assert!(sanitized.contains("[truncated, 500 bytes total]"));
    }

    #[test]
    fn test_sanitize_strips_control_chars() {
        assert_eq!(sanitize_for_log("ab\x07c\nd"), "abcd");
    }

    #[test]
    fn test_sanitize_truncates_at_char_boundary() {
        // A multibyte char straddling the truncation point must not panic
        let mut body = "x".repeat(MAX_LOG_BODY_LENGTH - 1);
        body.push('é');
        body.push_str(&"y".repeat(100));
        let sanitized = sanitize_for_log(&body);
        assert!(sanitized.contains(&format!("[truncated, {} bytes total]", body.len())));
    }
}
