//! Schedulers for fire-and-forget reconciliation
//!
//! The controller never awaits a scheduled reconciliation and never sees its
//! outcome. [`TokioScheduler`] runs them on the runtime; [`ManualScheduler`]
//! queues them until a test drives them.

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio_util::task::TaskTracker;
use tracing::debug;

use crate::model::{AppId, Application};

/// Identifies the record a scheduled reconciliation refreshes
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconcileRequest {
    /// Record to update
    pub app_id: AppId,
    /// Workload name
    pub name: String,
    /// Workload namespace
    pub namespace: String,
}

impl ReconcileRequest {
    /// Request refreshing `app`
    pub fn for_app(app: &Application) -> Self {
        Self {
            app_id: app.id,
            name: app.name.clone(),
            namespace: app.namespace.clone(),
        }
    }
}

/// Accepts detached reconciliation tasks
pub trait ReconcileScheduler: Send + Sync {
    /// Run `task` at some later point, detached from the caller
    fn schedule(&self, request: ReconcileRequest, task: BoxFuture<'static, ()>);
}

/// Spawns every task on the current tokio runtime
///
/// Unbounded; one task per request. Tasks are not cancelled when the
/// submitting request finishes.
#[derive(Clone, Default)]
pub struct TokioScheduler {
    tracker: TaskTracker,
}

impl TokioScheduler {
    /// Scheduler with no tasks
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tasks still running
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Wait until every task spawned so far has finished
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}

impl ReconcileScheduler for TokioScheduler {
    fn schedule(&self, request: ReconcileRequest, task: BoxFuture<'static, ()>) {
        debug!(app_id = %request.app_id, "spawning reconciliation");
        self.tracker.spawn(task);
    }
}

/// Queues tasks until [`ManualScheduler::run_pending`] is called
#[derive(Default)]
pub struct ManualScheduler {
    queue: Mutex<Vec<(ReconcileRequest, BoxFuture<'static, ()>)>>,
}

impl ManualScheduler {
    /// Scheduler with an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests queued and not yet run, in submission order
    pub fn pending(&self) -> Vec<ReconcileRequest> {
        self.queue.lock().iter().map(|(r, _)| r.clone()).collect()
    }

    /// Drop every queued task without running it
    pub fn discard(&self) -> usize {
        let mut queue = self.queue.lock();
        let count = queue.len();
        queue.clear();
        count
    }

    /// Run every queued task to completion, in submission order; returns how
    /// many ran. Tasks queued while draining run in the next call.
    pub async fn run_pending(&self) -> usize {
        let tasks: Vec<_> = std::mem::take(&mut *self.queue.lock());
        let count = tasks.len();
        for (_, task) in tasks {
            task.await;
        }
        count
    }
}

impl ReconcileScheduler for ManualScheduler {
    fn schedule(&self, request: ReconcileRequest, task: BoxFuture<'static, ()>) {
        self.queue.lock().push((request, task));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn request(id: u64) -> ReconcileRequest {
        ReconcileRequest {
            app_id: AppId(id),
            name: format!("app-{id}"),
            namespace: "astro-user-1".to_string(),
        }
    }

    fn counting_task(counter: &Arc<AtomicUsize>) -> BoxFuture<'static, ()> {
        let counter = Arc::clone(counter);
        Box::pin(async move {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test]
    async fn manual_scheduler_runs_only_when_driven() {
        let scheduler = ManualScheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));

        scheduler.schedule(request(1), counting_task(&counter));
        scheduler.schedule(request(2), counting_task(&counter));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.pending(), vec![request(1), request(2)]);

        assert_eq!(scheduler.run_pending().await, 2);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert!(scheduler.pending().is_empty());
        assert_eq!(scheduler.run_pending().await, 0);
    }

    #[tokio::test]
    async fn manual_scheduler_discard_drops_tasks() {
        let scheduler = ManualScheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));
        scheduler.schedule(request(1), counting_task(&counter));
        assert_eq!(scheduler.discard(), 1);
        assert_eq!(scheduler.run_pending().await, 0);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn tokio_scheduler_wait_idle_drains_tasks() {
        let scheduler = TokioScheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));
        for id in 0..5 {
            scheduler.schedule(request(id), counting_task(&counter));
        }
        scheduler.wait_idle().await;
        assert_eq!(counter.load(Ordering::SeqCst), 5);
        assert_eq!(scheduler.in_flight(), 0);

        // still usable after draining
        scheduler.schedule(request(9), counting_task(&counter));
        scheduler.wait_idle().await;
        assert_eq!(counter.load(Ordering::SeqCst), 6);
    }
}
