//! Resource proxy core
//!
//! A [`ResourceBase`] is the client-side stand-in for one server resource:
//! it carries the canonical name, the last server snapshot, the lifecycle
//! state, the in-flight future that will next mutate it, and any captured
//! failure replayed on later access. Concrete kinds wrap this and add their
//! create/submit/run semantics.

use crate::config::Context;
use crate::error::{Error, Result};
use crate::gcp::client::PlatformClient;
use crate::lro::{LroPoller, PollingSchedule};
use crate::pool::{CancelToken, ResourceFuture, SharedName, TaskPool};
use crate::resource::name::{ResourceKind, ResourceName};
use serde_json::Value;
use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Client-side lifecycle state of a proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    /// Constructed from a name; nothing fetched yet
    Unmaterialized,
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    Deleted,
}

impl ResourceState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ResourceState::Succeeded
                | ResourceState::Failed
                | ResourceState::Cancelled
                | ResourceState::Deleted
        )
    }
}

/// Map a server resource message to the proxy state
///
/// Job-shaped kinds carry a `state` enum string; `PAUSED` and `CANCELLING`
/// count as running for wait purposes. Kinds without a run state are
/// `Succeeded` once they exist.
pub fn map_server_state(resource: &Value) -> ResourceState {
    let Some(state) = resource.get("state").and_then(|s| s.as_str()) else {
        return ResourceState::Succeeded;
    };
    let suffix = state
        .trim_start_matches("JOB_STATE_")
        .trim_start_matches("PIPELINE_STATE_");
    match suffix {
        "PENDING" | "QUEUED" | "PROVISIONING" | "CREATING" => ResourceState::Pending,
        "RUNNING" | "PAUSED" | "CANCELLING" | "UPDATING" | "STOPPING" | "STABLE" => {
            ResourceState::Running
        }
        "SUCCEEDED" => ResourceState::Succeeded,
        "FAILED" | "EXPIRED" | "ERROR" => ResourceState::Failed,
        "CANCELLED" => ResourceState::Cancelled,
        _ => ResourceState::Running,
    }
}

struct Cell {
    state: ResourceState,
    snapshot: Option<Value>,
    exception: Option<Error>,
    latest_future: Option<ResourceFuture>,
}

/// Cloneable handle used by pool tasks to update their owning proxy
#[derive(Clone)]
pub(crate) struct ProxyHandle {
    name: SharedName,
    cell: Arc<Mutex<Cell>>,
}

impl ProxyHandle {
    fn lock(&self) -> std::sync::MutexGuard<'_, Cell> {
        self.cell.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn set_snapshot(&self, snapshot: Value, state: ResourceState) {
        if let Some(name) = snapshot.get("name").and_then(|n| n.as_str()) {
            self.name.set(name);
        }
        let mut cell = self.lock();
        cell.snapshot = Some(snapshot);
        cell.state = state;
    }

    pub(crate) fn mark_deleted(&self) {
        let mut cell = self.lock();
        cell.state = ResourceState::Deleted;
        cell.snapshot = None;
    }

    pub(crate) fn record_failure(&self, error: &Error) {
        let mut cell = self.lock();
        cell.state = match error {
            Error::Cancelled(_) => ResourceState::Cancelled,
            _ => ResourceState::Failed,
        };
        cell.exception = Some(error.clone());
    }

    pub(crate) fn name(&self) -> SharedName {
        self.name.clone()
    }
}

/// Shared proxy core wrapped by every concrete resource kind
#[derive(Clone)]
pub struct ResourceBase {
    pub(crate) client: PlatformClient,
    pub(crate) context: Context,
    pub(crate) kind: ResourceKind,
    pub(crate) name: SharedName,
    cell: Arc<Mutex<Cell>>,
}

impl ResourceBase {
    /// Proxy for an existing resource, identified by name or bare id
    pub(crate) async fn from_name(
        ctx: &Context,
        kind: ResourceKind,
        name_or_id: &str,
        parent_id: Option<&str>,
    ) -> Result<Self> {
        let resolved = ResourceName::resolve(kind, name_or_id, ctx, parent_id)?;
        let base = Self::detached(ctx, kind).await?;
        base.name.set(&resolved.to_string());
        Ok(base)
    }

    /// Proxy with no server-side identity yet; a creator will populate it
    pub(crate) async fn detached(ctx: &Context, kind: ResourceKind) -> Result<Self> {
        let client = PlatformClient::new(ctx).await?;
        Ok(Self {
            client,
            context: ctx.clone(),
            kind,
            name: SharedName::new(),
            cell: Arc::new(Mutex::new(Cell {
                state: ResourceState::Unmaterialized,
                snapshot: None,
                exception: None,
                latest_future: None,
            })),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Cell> {
        self.cell.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn handle(&self) -> ProxyHandle {
        ProxyHandle {
            name: self.name.clone(),
            cell: Arc::clone(&self.cell),
        }
    }

    /// Canonical resource path
    ///
    /// Non-blocking even while a mutation is pending. Errors carry the
    /// captured create failure when there is one.
    pub fn resource_name(&self) -> Result<String> {
        if let Some(name) = self.name.get() {
            return Ok(name);
        }
        let cell = self.lock();
        match &cell.exception {
            Some(cause) => Err(Error::ResourceNotCreated {
                cause: Box::new(cause.clone()),
            }),
            None => Err(Error::FailedPrecondition(
                "resource has not been created".into(),
            )),
        }
    }

    /// Whether the server has assigned this resource a name yet
    pub fn resource_is_available(&self) -> bool {
        self.name.is_available()
    }

    /// Cached display name, if the snapshot carries one. Non-blocking.
    pub fn display_name(&self) -> Option<String> {
        self.lock()
            .snapshot
            .as_ref()
            .and_then(|s| s.get("displayName"))
            .and_then(|d| d.as_str())
            .map(|d| d.to_string())
    }

    /// Cached state without blocking on a pending mutation
    pub fn state_nonblocking(&self) -> ResourceState {
        self.lock().state
    }

    /// The in-flight future that will next mutate this proxy, if any
    pub fn latest_future(&self) -> Option<ResourceFuture> {
        self.lock().latest_future.clone()
    }

    /// Capture a failure from a future whose task body never ran
    ///
    /// A task that fails records its own outcome, but a short-circuited
    /// future (failed parent, cancel before start, pool shutdown) skips
    /// the body entirely, so the failure is captured at first access.
    fn record_short_circuit(&self, error: &Error) {
        let mut cell = self.lock();
        if cell.exception.is_none() {
            cell.state = match error {
                Error::Cancelled(_) => ResourceState::Cancelled,
                _ => ResourceState::Failed,
            };
            cell.exception = Some(error.clone());
        }
    }

    /// Current state, blocking on the pending mutation first
    pub async fn state(&self) -> Result<ResourceState> {
        if let Some(future) = self.latest_future() {
            if let Err(e) = future.wait().await {
                self.record_short_circuit(&e);
            }
        }
        {
            let cell = self.lock();
            if let Some(exception) = &cell.exception {
                return Err(exception.clone());
            }
            if cell.state != ResourceState::Unmaterialized {
                return Ok(cell.state);
            }
        }
        if self.name.is_available() {
            self.sync_from_server().await?;
            return Ok(self.lock().state);
        }
        Err(Error::FailedPrecondition(
            "resource has not been run; create it or construct it by name".into(),
        ))
    }

    /// The last server snapshot, fetching it lazily if needed
    pub async fn gca_resource(&self) -> Result<Value> {
        if let Some(future) = self.latest_future() {
            if let Err(e) = future.wait().await {
                self.record_short_circuit(&e);
            }
        }
        {
            let cell = self.lock();
            if let Some(exception) = &cell.exception {
                return Err(exception.clone());
            }
            if let Some(snapshot) = &cell.snapshot {
                return Ok(snapshot.clone());
            }
        }
        self.sync_from_server().await
    }

    /// Force a GET and refresh the snapshot
    pub async fn sync_from_server(&self) -> Result<Value> {
        let name = self.resource_name()?;
        let value = self.client.get(&name, &[], None).await?;
        let state = map_server_state(&value);
        let mut cell = self.lock();
        cell.snapshot = Some(value.clone());
        cell.state = state;
        Ok(value)
    }

    /// Block until the server has assigned this resource a name, or the
    /// create failed first. Does not wait for work completion.
    pub async fn wait_for_resource_creation(&self) -> Result<String> {
        if let Some(name) = self.name.get() {
            return Ok(name);
        }
        let future = self.latest_future();
        match future {
            Some(future) => {
                tokio::select! {
                    _ = self.name.wait_available() => {}
                    result = future.wait() => {
                        if let Err(e) = result {
                            if self.name.get().is_none() {
                                return Err(Error::ResourceNotCreated {
                                    cause: Box::new(e.root_cause().clone()),
                                });
                            }
                        }
                    }
                }
                self.name.get().ok_or_else(|| Error::ResourceNotCreated {
                    cause: Box::new(Error::Internal(
                        "create resolved without assigning a resource name".into(),
                    )),
                })
            }
            None => {
                let cell = self.lock();
                match &cell.exception {
                    Some(cause) => Err(Error::ResourceNotCreated {
                        cause: Box::new(cause.clone()),
                    }),
                    None => Err(Error::FailedPrecondition(
                        "resource has not been created and no create is pending".into(),
                    )),
                }
            }
        }
    }

    /// Block until the pending mutation resolves
    pub async fn wait(&self) -> Result<()> {
        if let Some(future) = self.latest_future() {
            future.wait().await?;
        }
        Ok(())
    }

    /// Non-blocking terminal check
    pub fn done(&self) -> bool {
        self.state_nonblocking().is_terminal()
    }

    /// Cancel the pending mutation, if any
    pub fn cancel_future(&self) {
        if let Some(future) = self.latest_future() {
            future.cancel();
        }
    }

    /// Schedule `task` on the process pool as this proxy's next mutation
    ///
    /// The proxy's current future is always an implicit parent, preserving
    /// program order within one resource's mutation chain. `sync` waits for
    /// the result before returning.
    pub(crate) async fn launch<F, Fut>(
        &self,
        sync: bool,
        extra_parents: Vec<ResourceFuture>,
        task: F,
    ) -> Result<()>
    where
        F: FnOnce(CancelToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let mut parents = Vec::new();
        if let Some(previous) = self.latest_future() {
            parents.push(previous);
        }
        parents.extend(extra_parents);

        let handle = self.handle();
        let future = TaskPool::global().submit(self.name.clone(), parents, move |cancel| {
            let fut = task(cancel);
            async move {
                match fut.await {
                    Ok(value) => Ok(value),
                    Err(e) => {
                        handle.record_failure(&e);
                        Err(e)
                    }
                }
            }
        });

        self.lock().latest_future = Some(future.clone());

        if sync {
            future.wait().await?;
        }
        Ok(())
    }

    /// Schedule deletion via the delete operation
    ///
    /// Idempotent from the client side: deleting a deleted proxy returns
    /// immediately. `force` asks the server to cascade over children; the
    /// client never emulates the cascade.
    pub async fn delete(&self, sync: bool, force: bool) -> Result<()> {
        if self.state_nonblocking() == ResourceState::Deleted {
            return Ok(());
        }
        let name = self.resource_name()?;
        let client = self.client.clone();
        let handle = self.handle();
        self.launch(sync, Vec::new(), move |cancel| async move {
            let mut query: Vec<(&str, String)> = Vec::new();
            if force {
                query.push(("force", "true".to_string()));
            }
            let response = client.delete(&name, &query).await?;
            let operation = crate::lro::Operation::parse(&response)?;
            let scratch = SharedName::new();
            LroPoller::new(client, cancel)
                .poll_until_done(&operation.name, &scratch)
                .await?;
            handle.mark_deleted();
            Ok(Value::Null)
        })
        .await
    }

    /// Schedule a create that returns an operation and runs it to terminal
    ///
    /// The poller publishes the server-assigned name as soon as the
    /// operation carries it; the final response (or a follow-up GET when the
    /// response is not the resource itself) becomes the snapshot.
    pub(crate) async fn launch_create_lro(
        &self,
        sync: bool,
        parents: Vec<ResourceFuture>,
        create_path: String,
        body: Value,
        create_request_timeout: Option<Duration>,
        schedule: PollingSchedule,
    ) -> Result<()> {
        let client = self.client.clone();
        let handle = self.handle();
        let name_slot = self.name.clone();
        self.launch(sync, parents, move |cancel| async move {
            let response = client.post(&create_path, &body, create_request_timeout).await?;
            let operation = crate::lro::Operation::parse(&response)?;
            let result = LroPoller::new(client.clone(), cancel)
                .with_schedule(schedule)
                .poll_until_done(&operation.name, &name_slot)
                .await?;

            let has_name = result.get("name").and_then(|n| n.as_str()).is_some();
            let resource = if has_name {
                result
            } else {
                // Responses like model-upload carry a reference, not the
                // resource; materialize it
                match name_slot.get() {
                    Some(name) => client.get(&name, &[], None).await?,
                    None => result,
                }
            };
            handle.set_snapshot(resource.clone(), map_server_state(&resource));
            Ok(resource)
        })
        .await
    }

    /// Schedule a job-style create: a direct registration RPC followed by
    /// polling the job resource itself to a terminal state
    pub(crate) async fn launch_job_submit(
        &self,
        sync: bool,
        parents: Vec<ResourceFuture>,
        create_path: String,
        body: Value,
        create_request_timeout: Option<Duration>,
        schedule: PollingSchedule,
    ) -> Result<()> {
        let client = self.client.clone();
        let handle = self.handle();
        self.launch(sync, parents, move |cancel| async move {
            let registered = client.post(&create_path, &body, create_request_timeout).await?;
            let name = registered
                .get("name")
                .and_then(|n| n.as_str())
                .ok_or_else(|| Error::Internal("create response missing job name".into()))?
                .to_string();
            handle.set_snapshot(registered.clone(), map_server_state(&registered));
            poll_job_until_terminal(client, name, schedule, cancel, handle).await
        })
        .await
    }

    /// PATCH this resource with a field mask derived from `changes`
    ///
    /// The mask is the source of truth: omitted fields stay untouched on
    /// the server even if the local snapshot differs. An empty changeset is
    /// a no-op and performs zero RPCs. Re-reading after update is lazy.
    pub(crate) async fn update_fields(&self, changes: Vec<(&'static str, Value)>) -> Result<()> {
        if changes.is_empty() {
            return Ok(());
        }
        let name = self.resource_name()?;
        let mask = changes
            .iter()
            .map(|(field, _)| *field)
            .collect::<Vec<_>>()
            .join(",");
        let mut body = serde_json::Map::new();
        for (field, value) in changes {
            body.insert(field.to_string(), value);
        }

        let response = self.client.patch(&name, &Value::Object(body), &mask, None).await?;

        // Some kinds answer with an update operation rather than the
        // resource; drive it to terminal before invalidating the snapshot
        if response
            .get("name")
            .and_then(|n| n.as_str())
            .is_some_and(|n| n.contains("/operations/"))
        {
            let operation = crate::lro::Operation::parse(&response)?;
            let scratch = SharedName::new();
            LroPoller::new(self.client.clone(), CancelToken::new())
                .poll_until_done(&operation.name, &scratch)
                .await?;
        }

        let mut cell = self.lock();
        cell.snapshot = None;
        Ok(())
    }
}

// ============================================================================
// Job-state polling
// ============================================================================

/// Poll a job-shaped resource until its state is terminal
///
/// Jobs are registered by a direct create RPC and then progress through
/// `JOB_STATE_*`; there is no operation to poll, so reconciliation GETs the
/// resource itself. Web-access URIs are logged once each. The cancel token
/// issues a best-effort `:cancel` and resolves locally.
pub(crate) async fn poll_job_until_terminal(
    client: PlatformClient,
    name: String,
    schedule: PollingSchedule,
    cancel: CancelToken,
    handle: ProxyHandle,
) -> Result<Value> {
    let mut delay = schedule.initial;
    let mut seen_uris: HashSet<String> = HashSet::new();

    loop {
        let resource = client.get(&name, &[], None).await?;
        let state = map_server_state(&resource);
        handle.set_snapshot(resource.clone(), state);

        if let Some(uris) = resource.get("webAccessUris").and_then(|u| u.as_object()) {
            for (replica, uri) in uris {
                if let Some(uri) = uri.as_str() {
                    if seen_uris.insert(uri.to_string()) {
                        tracing::info!("Web access for {}: {}", replica, uri);
                    }
                }
            }
        }

        match state {
            ResourceState::Succeeded => return Ok(resource),
            ResourceState::Failed => {
                let message = resource
                    .get("error")
                    .and_then(|e| e.get("message"))
                    .and_then(|m| m.as_str())
                    .unwrap_or("job ended in a failed state")
                    .to_string();
                return Err(Error::ResourceFailed {
                    message,
                    operation_name: name.clone(),
                    resource_name: Some(name),
                });
            }
            ResourceState::Cancelled => {
                return Err(Error::Cancelled(format!("{} was cancelled", name)));
            }
            _ => {}
        }

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.fired() => {
                if let Err(e) = client.post(&format!("{}:cancel", name), &Value::Null, None).await {
                    tracing::warn!("Cancel of {} failed: {}", name, e);
                }
                return Err(Error::Cancelled(format!("{} cancelled", name)));
            }
        }
        delay = (delay * 2).min(schedule.cap);
    }
}

/// Polling schedule override threaded through creators, mainly for tests
pub(crate) fn schedule_from(poll_interval: Option<Duration>) -> PollingSchedule {
    match poll_interval {
        Some(initial) => PollingSchedule {
            initial,
            cap: initial * 8,
        },
        None => PollingSchedule::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_map_server_state_jobs() {
        assert_eq!(
            map_server_state(&json!({"state": "JOB_STATE_PENDING"})),
            ResourceState::Pending
        );
        assert_eq!(
            map_server_state(&json!({"state": "JOB_STATE_PAUSED"})),
            ResourceState::Running
        );
        assert_eq!(
            map_server_state(&json!({"state": "JOB_STATE_CANCELLING"})),
            ResourceState::Running
        );
        assert_eq!(
            map_server_state(&json!({"state": "JOB_STATE_SUCCEEDED"})),
            ResourceState::Succeeded
        );
        assert_eq!(
            map_server_state(&json!({"state": "JOB_STATE_CANCELLED"})),
            ResourceState::Cancelled
        );
    }

    #[test]
    fn test_map_server_state_pipelines_and_plain() {
        assert_eq!(
            map_server_state(&json!({"state": "PIPELINE_STATE_QUEUED"})),
            ResourceState::Pending
        );
        assert_eq!(
            map_server_state(&json!({"state": "PIPELINE_STATE_FAILED"})),
            ResourceState::Failed
        );
        // Kinds without a run state are succeeded once they exist
        assert_eq!(
            map_server_state(&json!({"displayName": "endpoint"})),
            ResourceState::Succeeded
        );
    }

    #[test]
    fn test_terminal_states() {
        assert!(ResourceState::Succeeded.is_terminal());
        assert!(ResourceState::Deleted.is_terminal());
        assert!(!ResourceState::Running.is_terminal());
        assert!(!ResourceState::Unmaterialized.is_terminal());
    }
}
