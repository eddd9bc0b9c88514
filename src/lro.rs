//! Long-running operations
//!
//! An [`Operation`] is a poll-only handle to in-progress server work. The
//! [`LroPoller`] reconciles one to a terminal state: it publishes the target
//! resource name to the owning proxy as soon as the server assigns it,
//! emits progress events, and converts a terminal operation error into a
//! structured `ResourceFailed`.

use crate::error::{Error, Result};
use crate::gcp::client::PlatformClient;
use crate::pool::{CancelToken, SharedName};
use serde_json::Value;
use std::collections::HashSet;
use std::time::{Duration, Instant};

/// Error proto carried by a failed operation
#[derive(Debug, Clone)]
pub struct OperationError {
    pub code: i64,
    pub message: String,
}

/// Parsed operation handle
#[derive(Debug, Clone)]
pub struct Operation {
    pub name: String,
    pub done: bool,
    pub metadata: Option<Value>,
    pub response: Option<Value>,
    pub error: Option<OperationError>,
}

impl Operation {
    /// Parse the REST operation shape
    pub fn parse(value: &Value) -> Result<Self> {
        let name = value
            .get("name")
            .and_then(|n| n.as_str())
            .ok_or_else(|| Error::Internal("operation response missing name".into()))?
            .to_string();

        let error = value.get("error").map(|e| OperationError {
            code: e.get("code").and_then(|c| c.as_i64()).unwrap_or(0),
            message: e
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("operation failed without a message")
                .to_string(),
        });

        Ok(Self {
            name,
            done: value.get("done").and_then(|d| d.as_bool()).unwrap_or(false),
            metadata: value.get("metadata").cloned(),
            response: value.get("response").cloned(),
            error,
        })
    }

    /// The resource this operation is creating or mutating, derived from the
    /// operation name. Location-scoped operations have no target.
    pub fn target_resource_name(&self) -> Option<String> {
        let prefix = self.name.split("/operations/").next()?;
        // projects/{p}/locations/{l} alone carries no resource segment
        if prefix.split('/').count() <= 4 {
            return None;
        }
        Some(prefix.to_string())
    }
}

/// Exponential backoff schedule for polling
#[derive(Debug, Clone)]
pub struct PollingSchedule {
    /// Delay before the second GET (the first happens immediately)
    pub initial: Duration,
    /// Ceiling the doubling delay saturates at
    pub cap: Duration,
}

impl Default for PollingSchedule {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            cap: Duration::from_secs(60),
        }
    }
}

/// Drives one operation to a terminal state
pub struct LroPoller {
    client: PlatformClient,
    schedule: PollingSchedule,
    cancel: CancelToken,
    /// Overall bound on polling; unbounded when absent
    deadline: Option<Duration>,
    /// Web-access URIs already logged by this poller
    seen_uris: HashSet<String>,
}

impl LroPoller {
    pub fn new(client: PlatformClient, cancel: CancelToken) -> Self {
        Self {
            client,
            schedule: PollingSchedule::default(),
            cancel,
            deadline: None,
            seen_uris: HashSet::new(),
        }
    }

    pub fn with_schedule(mut self, schedule: PollingSchedule) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Poll `operation_name` until terminal
    ///
    /// Publishes the target resource name to `owner` as soon as it appears.
    /// Returns the final response message, or the structured failure.
    pub async fn poll_until_done(
        mut self,
        operation_name: &str,
        owner: &SharedName,
    ) -> Result<Value> {
        let started = Instant::now();
        let mut delay = self.schedule.initial;

        // First GET happens immediately; an already-done operation resolves
        // without sleeping
        let mut raw = self.client.get_operation(operation_name).await?;

        loop {
            let op = Operation::parse(&raw)?;

            if let Some(target) = op.target_resource_name() {
                if owner.set(&target) {
                    tracing::info!("Operation {} targets resource {}", op.name, target);
                }
            }

            self.emit_progress(&op);

            if op.done {
                if let Some(op_error) = op.error {
                    return Err(Error::ResourceFailed {
                        message: op_error.message,
                        operation_name: op.name,
                        resource_name: owner.get(),
                    });
                }
                return Ok(op.response.unwrap_or(Value::Null));
            }

            if let Some(deadline) = self.deadline {
                if started.elapsed() >= deadline {
                    return Err(Error::DeadlineExceeded(format!(
                        "operation {} still running after {:?}",
                        op.name, deadline
                    )));
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.cancel.fired() => {
                    // Best-effort server cancel; do not wait for acknowledgement
                    if let Err(e) = self.client.cancel_operation(&op.name).await {
                        tracing::warn!("Cancel of operation {} failed: {}", op.name, e);
                    }
                    return Err(Error::Cancelled(format!(
                        "operation {} cancelled",
                        op.name
                    )));
                }
            }

            delay = (delay * 2).min(self.schedule.cap);
            raw = self.client.get_operation(operation_name).await?;
        }
    }

    /// Log progress fields carried in operation metadata
    ///
    /// Web-access URIs are logged at most once each.
    fn emit_progress(&mut self, op: &Operation) {
        let Some(metadata) = &op.metadata else {
            return;
        };
        // Progress fields live either at the top level or under the
        // generic metadata envelope
        let generic = metadata.get("genericMetadata").unwrap_or(metadata);

        if let Some(percent) = generic
            .get("progressPercentage")
            .and_then(|p| p.as_i64())
        {
            tracing::info!("Operation {}: {}% complete", op.name, percent);
        }
        if let Some(stage) = generic.get("state").and_then(|s| s.as_str()) {
            tracing::info!("Operation {}: stage {}", op.name, stage);
        }
        if let Some(uris) = metadata.get("webAccessUris").and_then(|u| u.as_object()) {
            for (name, uri) in uris {
                if let Some(uri) = uri.as_str() {
                    if self.seen_uris.insert(uri.to_string()) {
                        tracing::info!("Web access for {}: {}", name, uri);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_running_operation() {
        let raw = json!({
            "name": "projects/p/locations/us-central1/endpoints/5/operations/77",
            "metadata": {"genericMetadata": {"progressPercentage": 40}}
        });
        let op = Operation::parse(&raw).unwrap();
        assert!(!op.done);
        assert!(op.error.is_none());
        assert_eq!(
            op.target_resource_name().as_deref(),
            Some("projects/p/locations/us-central1/endpoints/5")
        );
    }

    #[test]
    fn test_parse_failed_operation() {
        let raw = json!({
            "name": "projects/p/locations/us-central1/operations/9",
            "done": true,
            "error": {"code": 3, "message": "spec was invalid"}
        });
        let op = Operation::parse(&raw).unwrap();
        assert!(op.done);
        let err = op.error.as_ref().unwrap();
        assert_eq!(err.code, 3);
        assert_eq!(err.message, "spec was invalid");
        // Location-scoped: no target resource
        assert_eq!(op.target_resource_name(), None);
    }

    #[test]
    fn test_parse_rejects_missing_name() {
        assert!(Operation::parse(&json!({"done": true})).is_err());
    }
}
