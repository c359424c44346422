//! ---
//! ptf_section: "01-core-functionality"
//! ptf_subsection: "module"
//! ptf_type: "source"
//! ptf_scope: "code"
//! ptf_description: "Runtime helpers supporting the orchestrator."
//! ptf_version: "v0.0.0-prealpha"
//! ptf_owner: "tbd"
//! ---
//! FIFO work queue drained by at most `N` concurrently active workers.
//!
//! Items are queued under a single lock. Enqueueing dispatches a new worker
//! onto the tokio runtime while fewer than `N` are active; each worker pops
//! items until the queue is empty and then retires. Item bodies always run
//! outside the lock, and a panicking body only fails its own [`ScheduledTask`].

use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::FutureExt;
use parking_lot::Mutex;
use ptf_common::{FrameworkError, Result};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{error, trace};

static NEXT_SCHEDULER_ID: AtomicU64 = AtomicU64::new(1);

tokio::task_local! {
    static ACTIVE_SCHEDULER: u64;
}

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Identifier of a queued work item, unique within its scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkId(u64);

impl WorkId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for WorkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "work-{}", self.0)
    }
}

/// Failures observed by the awaiter of a single work item.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("{id} panicked: {message}")]
    Panicked { id: WorkId, message: String },
    #[error("{id} was removed from the queue before it ran")]
    Abandoned { id: WorkId },
    #[error("scheduler permits are closed")]
    Closed,
    /// A task spawned through [`crate::HostExecutor`] panicked. `index` is
    /// its spawn position, unrelated to scheduler work ids.
    #[error("host task #{index} panicked: {message}")]
    HostPanicked { index: usize, message: String },
    #[error("host task #{index} was cancelled before completing")]
    HostCancelled { index: usize },
}

impl From<SchedulerError> for FrameworkError {
    fn from(err: SchedulerError) -> Self {
        match &err {
            SchedulerError::Panicked { id, message } => {
                FrameworkError::execution(id.to_string(), message.clone())
            }
            SchedulerError::Abandoned { id } => {
                FrameworkError::execution(id.to_string(), err.to_string())
            }
            SchedulerError::HostPanicked { index, message } => {
                FrameworkError::execution(format!("host task #{index}"), message.clone())
            }
            SchedulerError::HostCancelled { index } => {
                FrameworkError::execution(format!("host task #{index}"), err.to_string())
            }
            SchedulerError::Closed => FrameworkError::configuration(err.to_string()),
        }
    }
}

/// Render a caught panic payload for diagnostics.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

struct QueuedItem {
    id: WorkId,
    job: Job,
}

#[derive(Default)]
struct QueueState {
    queue: VecDeque<QueuedItem>,
    active_workers: usize,
}

struct Shared {
    id: u64,
    max_concurrency: usize,
    next_work_id: AtomicU64,
    state: Mutex<QueueState>,
    handle: Option<Handle>,
}

/// Handle to a queued item's eventual result.
#[derive(Debug)]
pub struct ScheduledTask<T> {
    id: WorkId,
    receiver: oneshot::Receiver<std::result::Result<T, SchedulerError>>,
}

impl<T> ScheduledTask<T> {
    pub fn id(&self) -> WorkId {
        self.id
    }
}

impl<T> Future for ScheduledTask<T> {
    type Output = std::result::Result<T, SchedulerError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let id = self.id;
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(SchedulerError::Abandoned { id })))
    }
}

/// Scheduler capping the number of concurrently running work items.
#[derive(Clone)]
pub struct BoundedScheduler {
    shared: Arc<Shared>,
}

impl BoundedScheduler {
    /// Create a scheduler running at most `max_concurrency` items at once.
    ///
    /// Workers are dispatched on the runtime that is current at construction
    /// time, falling back to the caller's runtime at enqueue time.
    pub fn new(max_concurrency: usize) -> Result<Self> {
        Self::build(max_concurrency, Handle::try_current().ok())
    }

    /// Create a scheduler whose workers run on `handle`.
    pub fn with_handle(max_concurrency: usize, handle: Handle) -> Result<Self> {
        Self::build(max_concurrency, Some(handle))
    }

    fn build(max_concurrency: usize, handle: Option<Handle>) -> Result<Self> {
        if max_concurrency == 0 {
            return Err(FrameworkError::configuration(
                "maximum concurrency level must be at least 1",
            ));
        }
        Ok(Self {
            shared: Arc::new(Shared {
                id: NEXT_SCHEDULER_ID.fetch_add(1, Ordering::Relaxed),
                max_concurrency,
                next_work_id: AtomicU64::new(0),
                state: Mutex::new(QueueState::default()),
                handle,
            }),
        })
    }

    pub fn max_concurrency(&self) -> usize {
        self.shared.max_concurrency
    }

    /// Workers currently draining the queue.
    pub fn active_workers(&self) -> usize {
        self.shared.state.lock().active_workers
    }

    /// Queue `work` and dispatch a worker if the concurrency cap allows it.
    pub fn enqueue<F, T>(&self, work: F) -> ScheduledTask<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let id = WorkId(self.shared.next_work_id.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = oneshot::channel();
        let job: Job = Box::pin(async move {
            let outcome = AssertUnwindSafe(work)
                .catch_unwind()
                .await
                .map_err(|payload| SchedulerError::Panicked {
                    id,
                    message: panic_message(payload.as_ref()),
                });
            // The awaiter may have been dropped; the result is then discarded.
            let _ = sender.send(outcome);
        });

        let dispatch = {
            let mut state = self.shared.state.lock();
            state.queue.push_back(QueuedItem { id, job });
            if state.active_workers < self.shared.max_concurrency {
                state.active_workers += 1;
                true
            } else {
                false
            }
        };
        trace!(scheduler = self.shared.id, work = %id, dispatch, "work item queued");
        if dispatch {
            self.dispatch_worker();
        }
        ScheduledTask { id, receiver }
    }

    /// Run a still-queued item on the calling task.
    ///
    /// Only succeeds when called from inside one of this scheduler's workers
    /// and the item could be removed from the queue first.
    pub async fn try_execute_inline(&self, id: WorkId) -> bool {
        let on_worker = ACTIVE_SCHEDULER
            .try_with(|active| *active == self.shared.id)
            .unwrap_or(false);
        if !on_worker {
            return false;
        }
        match self.take(id) {
            Some(item) => {
                trace!(scheduler = self.shared.id, work = %id, "executing inline");
                item.job.await;
                true
            }
            None => false,
        }
    }

    /// Remove an item that has not started yet. Its awaiter observes
    /// [`SchedulerError::Abandoned`].
    pub fn dequeue_if_present(&self, id: WorkId) -> bool {
        self.take(id).is_some()
    }

    /// Snapshot of the ids still waiting in the queue.
    pub fn scheduled_items(&self) -> Vec<WorkId> {
        self.shared
            .state
            .lock()
            .queue
            .iter()
            .map(|item| item.id)
            .collect()
    }

    fn take(&self, id: WorkId) -> Option<QueuedItem> {
        let mut state = self.shared.state.lock();
        let position = state.queue.iter().position(|item| item.id == id)?;
        state.queue.remove(position)
    }

    fn dispatch_worker(&self) {
        let shared = self.shared.clone();
        let handle = match shared.handle.clone().or_else(|| Handle::try_current().ok()) {
            Some(handle) => handle,
            None => {
                error!(
                    scheduler = shared.id,
                    "no tokio runtime available, abandoning queued work"
                );
                let mut state = shared.state.lock();
                state.queue.clear();
                state.active_workers = state.active_workers.saturating_sub(1);
                return;
            }
        };
        let scheduler_id = shared.id;
        handle.spawn(ACTIVE_SCHEDULER.scope(scheduler_id, drain(shared)));
    }
}

impl fmt::Debug for BoundedScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("BoundedScheduler")
            .field("id", &self.shared.id)
            .field("max_concurrency", &self.shared.max_concurrency)
            .field("active_workers", &state.active_workers)
            .field("queued", &state.queue.len())
            .finish()
    }
}

/// Releases the worker slot if the worker task is torn down mid-drain.
struct WorkerSlot {
    shared: Arc<Shared>,
    released: bool,
}

impl Drop for WorkerSlot {
    fn drop(&mut self) {
        if !self.released {
            let mut state = self.shared.state.lock();
            state.active_workers = state.active_workers.saturating_sub(1);
        }
    }
}

async fn drain(shared: Arc<Shared>) {
    let mut slot = WorkerSlot {
        shared,
        released: false,
    };
    loop {
        let next = {
            let mut state = slot.shared.state.lock();
            match state.queue.pop_front() {
                Some(item) => item,
                None => {
                    // Retire under the same lock hold that observed the empty
                    // queue so a concurrent enqueue dispatches a fresh worker.
                    state.active_workers -= 1;
                    slot.released = true;
                    break;
                }
            }
        };
        trace!(scheduler = slot.shared.id, work = %next.id, "work item started");
        next.job.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn zero_concurrency_is_rejected() {
        let err = BoundedScheduler::new(0).expect_err("zero rejected");
        assert!(matches!(err, FrameworkError::Configuration(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn runs_items_and_returns_results() {
        let scheduler = BoundedScheduler::new(2).expect("scheduler");
        let tasks: Vec<_> = (0..4u32)
            .map(|i| scheduler.enqueue(async move { i * 10 }))
            .collect();
        let mut results = Vec::new();
        for task in tasks {
            results.push(task.await.expect("item completes"));
        }
        assert_eq!(results, vec![0, 10, 20, 30]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn panic_only_fails_its_own_item() {
        let scheduler = BoundedScheduler::new(1).expect("scheduler");
        let bad = scheduler.enqueue(async { panic!("boom") });
        let good = scheduler.enqueue(async { 7 });
        match bad.await {
            Err(SchedulerError::Panicked { message, .. }) => assert_eq!(message, "boom"),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(good.await.expect("second item still runs"), 7);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn dequeued_item_never_runs() {
        let scheduler = BoundedScheduler::new(1).expect("scheduler");
        let (started_tx, started_rx) = oneshot::channel::<()>();
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let blocker = scheduler.enqueue(async move {
            let _ = started_tx.send(());
            let _ = release_rx.await;
        });
        started_rx.await.expect("blocker started");
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = ran.clone();
        let queued = scheduler.enqueue(async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let id = queued.id();

        assert_eq!(scheduler.scheduled_items(), vec![id]);
        assert!(scheduler.dequeue_if_present(id));
        assert!(!scheduler.dequeue_if_present(id));
        assert!(scheduler.scheduled_items().is_empty());

        release_tx.send(()).expect("release blocker");
        blocker.await.expect("blocker finishes");
        assert_eq!(queued.await, Err(SchedulerError::Abandoned { id }));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn inline_execution_requires_worker_context() {
        let scheduler = BoundedScheduler::new(1).expect("scheduler");
        let (started_tx, started_rx) = oneshot::channel::<()>();
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let blocker = scheduler.enqueue(async move {
            let _ = started_tx.send(());
            let _ = release_rx.await;
        });
        started_rx.await.expect("blocker started");
        let queued = scheduler.enqueue(async { "inline" });
        let id = queued.id();

        // Outside a worker the request is refused and the item stays queued.
        assert!(!scheduler.try_execute_inline(id).await);
        assert_eq!(scheduler.scheduled_items(), vec![id]);
        release_tx.send(()).expect("release blocker");
        blocker.await.expect("blocker finishes");
        assert_eq!(queued.await.expect("item ran"), "inline");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn worker_can_run_queued_item_inline() {
        let scheduler = BoundedScheduler::new(1).expect("scheduler");
        let (id_tx, id_rx) = oneshot::channel::<WorkId>();
        let inner = scheduler.clone();
        let outer = scheduler.enqueue(async move {
            let id = id_rx.await.expect("id delivered");
            let first = inner.try_execute_inline(id).await;
            let second = inner.try_execute_inline(id).await;
            (first, second)
        });
        let queued = scheduler.enqueue(async { 42 });
        id_tx.send(queued.id()).expect("send id");

        assert_eq!(outer.await.expect("outer finishes"), (true, false));
        assert_eq!(queued.await.expect("inline result delivered"), 42);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn workers_retire_when_queue_drains() {
        let scheduler = BoundedScheduler::new(3).expect("scheduler");
        let tasks: Vec<_> = (0..6)
            .map(|_| scheduler.enqueue(tokio::time::sleep(Duration::from_millis(5))))
            .collect();
        for task in tasks {
            task.await.expect("sleep completes");
        }
        // Workers release their slot after the last send; give them a moment.
        for _ in 0..50 {
            if scheduler.active_workers() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        assert_eq!(scheduler.active_workers(), 0);
    }
}
