//! Task pool with dependency tracking
//!
//! A single process-wide pool executes every asynchronous mutation. A
//! submitted task does not start until all of its parent futures have
//! resolved successfully; a failed parent taints the child with a
//! `DependencyFailed` error naming the root cause and the parent's resource.
//!
//! Futures are awaitable values: the same future backs both the fire-and-
//! forget path (`submit` and return) and the synchronous-looking path
//! (`submit` then `wait`).

use crate::error::{Error, Result};
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;

/// Worker slots in the default process-wide pool
pub const DEFAULT_POOL_SIZE: usize = 16;

// ============================================================================
// Shared resource name
// ============================================================================

/// Write-once resource name shared between a proxy and the tasks mutating it
///
/// The poller publishes the server-assigned name here as soon as it appears,
/// which is what makes a resource "available" before its work completes.
#[derive(Clone)]
pub struct SharedName {
    inner: Arc<SharedNameInner>,
}

struct SharedNameInner {
    name: OnceLock<String>,
    available_tx: watch::Sender<bool>,
}

impl Default for SharedName {
    fn default() -> Self {
        let (available_tx, _rx) = watch::channel(false);
        Self {
            inner: Arc::new(SharedNameInner {
                name: OnceLock::new(),
                available_tx,
            }),
        }
    }
}

impl SharedName {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish the name; returns true the first time, false on repeats.
    /// The name is immutable once set.
    pub fn set(&self, name: &str) -> bool {
        let newly_set = self.inner.name.set(name.to_string()).is_ok();
        if newly_set {
            let _ = self.inner.available_tx.send(true);
        }
        newly_set
    }

    pub fn get(&self) -> Option<String> {
        self.inner.name.get().cloned()
    }

    pub fn is_available(&self) -> bool {
        self.inner.name.get().is_some()
    }

    /// Resolve when the name has been published
    pub async fn wait_available(&self) {
        let mut rx = self.inner.available_tx.subscribe();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

// ============================================================================
// Cancellation
// ============================================================================

/// Cooperative cancellation token
///
/// Firing the token requests a stop; the running task decides how to honour
/// it (typically by cancelling an operation poll). In-flight RPCs are not
/// interrupted.
#[derive(Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fire(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_fired(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve when the token fires
    pub async fn fired(&self) {
        let mut rx = self.tx.subscribe();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

// ============================================================================
// Futures
// ============================================================================

struct FutureShared {
    done_tx: watch::Sender<bool>,
    result: Mutex<Option<Result<Value>>>,
    cancel: CancelToken,
    started: AtomicBool,
    owner: SharedName,
}

/// Handle to an eventual result produced by the pool
#[derive(Clone)]
pub struct ResourceFuture {
    shared: Arc<FutureShared>,
}

impl ResourceFuture {
    fn new(owner: SharedName) -> Self {
        let (done_tx, _rx) = watch::channel(false);
        Self {
            shared: Arc::new(FutureShared {
                done_tx,
                result: Mutex::new(None),
                cancel: CancelToken::new(),
                started: AtomicBool::new(false),
                owner,
            }),
        }
    }

    /// Construct a future already resolved with `result`
    pub fn ready(owner: SharedName, result: Result<Value>) -> Self {
        let future = Self::new(owner);
        future.complete(result);
        future
    }

    /// Store the result if none is set yet; first writer wins
    fn complete(&self, result: Result<Value>) -> bool {
        let mut slot = self
            .shared
            .result
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if slot.is_some() {
            return false;
        }
        *slot = Some(result);
        drop(slot);
        let _ = self.shared.done_tx.send(true);
        true
    }

    pub fn is_done(&self) -> bool {
        self.shared
            .result
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_some()
    }

    /// Non-blocking peek at the outcome
    pub fn peek(&self) -> Option<Result<Value>> {
        self.shared
            .result
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Block until resolved, replaying the stored outcome
    pub async fn wait(&self) -> Result<Value> {
        let mut rx = self.shared.done_tx.subscribe();
        loop {
            if let Some(result) = self.peek() {
                return result;
            }
            if rx.changed().await.is_err() {
                // Completion always lands before the sender can drop
                if let Some(result) = self.peek() {
                    return result;
                }
                return Err(Error::Internal("task abandoned without a result".into()));
            }
        }
    }

    /// Bounded wait. Timing out does not cancel the underlying work.
    pub async fn wait_timeout(&self, timeout: std::time::Duration) -> Result<Value> {
        match tokio::time::timeout(timeout, self.wait()).await {
            Ok(result) => result,
            Err(_) => Err(Error::DeadlineExceeded(format!(
                "timed out after {:?} waiting for task; the work continues",
                timeout
            ))),
        }
    }

    /// Cancel the future
    ///
    /// Not yet started: resolves immediately as cancelled and the task body
    /// never runs. Already running: fires the cooperative token.
    pub fn cancel(&self) {
        self.shared.cancel.fire();
        // Claim the start slot; winning it means the task body never runs
        if self
            .shared
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.complete(Err(Error::Cancelled(
                "task cancelled before it started".into(),
            )));
        }
    }

    /// Resource name of the proxy this future mutates, if assigned yet
    pub fn owner_resource(&self) -> Option<String> {
        self.shared.owner.get()
    }
}

// ============================================================================
// Pool
// ============================================================================

struct PoolInner {
    semaphore: Arc<Semaphore>,
    shutdown: AtomicBool,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

/// Bounded task pool
#[derive(Clone)]
pub struct TaskPool {
    inner: Arc<PoolInner>,
}

impl TaskPool {
    pub fn new(workers: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                semaphore: Arc::new(Semaphore::new(workers.max(1))),
                shutdown: AtomicBool::new(false),
                handles: Mutex::new(Vec::new()),
            }),
        }
    }

    /// The process-wide pool shared by every resource proxy
    pub fn global() -> &'static TaskPool {
        static POOL: OnceLock<TaskPool> = OnceLock::new();
        POOL.get_or_init(|| TaskPool::new(DEFAULT_POOL_SIZE))
    }

    /// Enqueue `task` to run once every parent has resolved successfully
    ///
    /// `owner` is the shared name of the proxy that holds the result. The
    /// returned future is also recorded by the caller as the proxy's
    /// `latest_future`.
    pub fn submit<F, Fut>(
        &self,
        owner: SharedName,
        parents: Vec<ResourceFuture>,
        task: F,
    ) -> ResourceFuture
    where
        F: FnOnce(CancelToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let future = ResourceFuture::new(owner);

        if self.inner.shutdown.load(Ordering::Acquire) {
            future.complete(Err(Error::FailedPrecondition(
                "task pool is shut down".into(),
            )));
            return future;
        }

        let handle_future = future.clone();
        let semaphore = Arc::clone(&self.inner.semaphore);
        let handle = tokio::spawn(async move {
            // Parents resolve in submission order within a chain
            for parent in &parents {
                if let Err(parent_err) = parent.wait().await {
                    let resolved = match parent_err {
                        // Cancellation propagates as cancellation
                        Error::Cancelled(msg) => Error::Cancelled(msg),
                        other => Error::DependencyFailed {
                            cause: Box::new(other.root_cause().clone()),
                            parent_resource: parent.owner_resource(),
                        },
                    };
                    handle_future.complete(Err(resolved));
                    return;
                }
            }

            if handle_future.is_done() || handle_future.shared.cancel.is_fired() {
                handle_future.complete(Err(Error::Cancelled(
                    "task cancelled before it started".into(),
                )));
                return;
            }

            let permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    handle_future.complete(Err(Error::FailedPrecondition(
                        "task pool is shut down".into(),
                    )));
                    return;
                }
            };

            // Claim the start slot; losing it means a cancel got there first
            if handle_future
                .shared
                .started
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return;
            }

            let cancel = handle_future.shared.cancel.clone();
            let result = task(cancel).await;
            handle_future.complete(result);
            drop(permit);
        });

        let mut handles = self
            .inner
            .handles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // The global pool lives for the whole process; reap finished
        // handles here so the vector stays bounded by in-flight work
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
        drop(handles);

        future
    }

    /// Stop accepting tasks; optionally drain the ones in flight
    pub async fn shutdown(&self, wait: bool) {
        self.inner.shutdown.store(true, Ordering::Release);
        let handles: Vec<JoinHandle<()>> = {
            let mut guard = self
                .inner
                .handles
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            std::mem::take(&mut *guard)
        };
        if wait {
            for handle in handles {
                let _ = handle.await;
            }
        }
        self.inner.semaphore.close();
    }
}
