//! Error types
//!
//! Structured error kinds surfaced by the client. Every failure carries a
//! short machine tag (the enum variant), a human message, and - when known -
//! the resource name and operation name involved.

use serde_json::Value;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to callers
///
/// Variants carry owned strings so a captured failure can be cloned into a
/// resource proxy and replayed on later accesses.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Locally detected misuse: malformed resource name, missing required
    /// field, conflicting project/location, invalid instance format
    #[error("invalid argument: {0}")]
    BadArgument(String),

    /// Server says the resource does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Create conflicted on an idempotency-sensitive id
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// IAM rejection, surfaced verbatim
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Credential rejection, surfaced verbatim
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// State-machine violation, e.g. cancel on a terminal job
    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),

    #[error("cancelled: {0}")]
    Cancelled(String),

    /// Server-side terminal failure: a job, pipeline or operation ended in
    /// a failed state
    #[error("resource failed: {message} (operation: {operation_name})")]
    ResourceFailed {
        message: String,
        operation_name: String,
        resource_name: Option<String>,
    },

    /// An ancestor future failed before this task could start
    #[error("dependency failed{}: {cause}", fmt_parent(.parent_resource))]
    DependencyFailed {
        cause: Box<Error>,
        parent_resource: Option<String>,
    },

    /// Access on a proxy whose create never completed
    #[error("resource has not been created; failed with: {cause}")]
    ResourceNotCreated { cause: Box<Error> },

    /// Transport exhaustion or unexpected decode error
    #[error("internal: {0}")]
    Internal(String),
}

fn fmt_parent(parent: &Option<String>) -> String {
    match parent {
        Some(name) => format!(" (parent: {})", name),
        None => String::new(),
    }
}

impl Error {
    /// Short machine tag for the error kind
    pub fn tag(&self) -> &'static str {
        match self {
            Error::BadArgument(_) => "BAD_ARGUMENT",
            Error::NotFound(_) => "NOT_FOUND",
            Error::AlreadyExists(_) => "ALREADY_EXISTS",
            Error::PermissionDenied(_) => "PERMISSION_DENIED",
            Error::Unauthenticated(_) => "UNAUTHENTICATED",
            Error::FailedPrecondition(_) => "FAILED_PRECONDITION",
            Error::DeadlineExceeded(_) => "DEADLINE_EXCEEDED",
            Error::Cancelled(_) => "CANCELLED",
            Error::ResourceFailed { .. } => "RESOURCE_FAILED",
            Error::DependencyFailed { .. } => "DEPENDENCY_FAILED",
            Error::ResourceNotCreated { .. } => "RESOURCE_NOT_CREATED",
            Error::Internal(_) => "INTERNAL",
        }
    }

    /// Unwrap dependency/creation wrappers down to the original failure
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::DependencyFailed { cause, .. } => cause.root_cause(),
            Error::ResourceNotCreated { cause } => cause.root_cause(),
            _ => self,
        }
    }

    /// Map an HTTP error response to a structured error
    ///
    /// Prefers the canonical `error.status` string in the body; falls back
    /// to the HTTP status code. `context` names the call for the message.
    pub fn from_response(status: u16, body: &str, context: &str) -> Error {
        let parsed: Option<Value> = serde_json::from_str(body).ok();
        let detail = parsed
            .as_ref()
            .and_then(|v| v.get("error"))
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
            .unwrap_or("")
            .to_string();
        let rpc_status = parsed
            .as_ref()
            .and_then(|v| v.get("error"))
            .and_then(|e| e.get("status"))
            .and_then(|s| s.as_str())
            .unwrap_or("");

        let message = if detail.is_empty() {
            format!("{} returned HTTP {}", context, status)
        } else {
            format!("{}: {}", context, detail)
        };

        match rpc_status {
            "INVALID_ARGUMENT" => return Error::BadArgument(message),
            "NOT_FOUND" => return Error::NotFound(message),
            "ALREADY_EXISTS" => return Error::AlreadyExists(message),
            "PERMISSION_DENIED" => return Error::PermissionDenied(message),
            "UNAUTHENTICATED" => return Error::Unauthenticated(message),
            "FAILED_PRECONDITION" => return Error::FailedPrecondition(message),
            "DEADLINE_EXCEEDED" => return Error::DeadlineExceeded(message),
            "CANCELLED" => return Error::Cancelled(message),
            _ => {}
        }

        match status {
            400 => Error::BadArgument(message),
            401 => Error::Unauthenticated(message),
            403 => Error::PermissionDenied(message),
            404 => Error::NotFound(message),
            409 => Error::AlreadyExists(message),
            412 => Error::FailedPrecondition(message),
            499 => Error::Cancelled(message),
            504 => Error::DeadlineExceeded(message),
            _ => Error::Internal(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_string_wins_over_http_code() {
        let body = r#"{"error":{"code":400,"message":"job is terminal","status":"FAILED_PRECONDITION"}}"#;
        let err = Error::from_response(400, body, "cancel customJob");
        assert!(matches!(err, Error::FailedPrecondition(_)));
        assert!(err.to_string().contains("job is terminal"));
    }

    #[test]
    fn test_http_code_fallback() {
        let err = Error::from_response(404, "not json", "get model");
        assert!(matches!(err, Error::NotFound(_)));
        assert_eq!(err.tag(), "NOT_FOUND");
    }

    #[test]
    fn test_root_cause_unwraps_wrappers() {
        let root = Error::ResourceFailed {
            message: "exit code 1".into(),
            operation_name: "projects/p/locations/l/operations/1".into(),
            resource_name: None,
        };
        let wrapped = Error::DependencyFailed {
            cause: Box::new(Error::ResourceNotCreated {
                cause: Box::new(root.clone()),
            }),
            parent_resource: Some("projects/p/locations/l/customJobs/1".into()),
        };
        assert_eq!(wrapped.root_cause().tag(), "RESOURCE_FAILED");
    }
}
