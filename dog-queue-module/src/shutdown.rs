use std::sync::Arc;

use dog_queue::{EventsHandle, QueueError, QueueResult, WorkerHandle};
use futures::future::join_all;
use parking_lot::Mutex;
use tracing::{debug, error, info};

/// A native handle created during registration.
#[derive(Clone)]
pub enum TrackedResource {
    Worker(Arc<dyn WorkerHandle>),
    Events(Arc<dyn EventsHandle>),
}

impl TrackedResource {
    /// Kind label used in logs and reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Worker(_) => "worker",
            Self::Events(_) => "queue events",
        }
    }

    /// Native name of the queue the handle belongs to.
    pub fn name(&self) -> &str {
        match self {
            Self::Worker(worker) => worker.name(),
            Self::Events(events) => events.name(),
        }
    }

    async fn close(&self) -> QueueResult<()> {
        match self {
            Self::Worker(worker) => worker.close().await,
            Self::Events(events) => events.close().await,
        }
    }
}

/// Outcome of [`ShutdownCoordinator::close_all`].
#[derive(Debug, Default)]
pub struct ShutdownReport {
    pub closed: usize,
    /// `"{kind} {queue}"` and the close error, per failed resource.
    pub failures: Vec<(String, QueueError)>,
}

impl ShutdownReport {
    /// Closes tried, failed or not.
    pub fn attempted(&self) -> usize {
        self.closed + self.failures.len()
    }

    /// Whether every close succeeded.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Every handle the explorer created, closed together at shutdown.
#[derive(Default)]
pub struct ShutdownCoordinator {
    resources: Mutex<Vec<TrackedResource>>,
}

impl ShutdownCoordinator {
    /// Create an empty coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a handle for [`close_all`](Self::close_all).
    pub fn track(&self, resource: TrackedResource) {
        debug!(kind = resource.kind(), queue = %resource.name(), "tracking resource");
        self.resources.lock().push(resource);
    }

    /// Handles still waiting to be closed.
    pub fn tracked(&self) -> usize {
        self.resources.lock().len()
    }

    /// Close every tracked resource concurrently and wait for all of them.
    ///
    /// A failed close is logged and reported; it never stops the others.
    /// Resources are drained, so a second call closes nothing.
    pub async fn close_all(&self) -> ShutdownReport {
        let resources = std::mem::take(&mut *self.resources.lock());
        if resources.is_empty() {
            return ShutdownReport::default();
        }

        let results = join_all(resources.iter().map(|resource| resource.close())).await;

        let mut report = ShutdownReport::default();
        for (resource, result) in resources.iter().zip(results) {
            match result {
                Ok(()) => report.closed += 1,
                Err(err) => {
                    error!(kind = resource.kind(), queue = %resource.name(), error = %err, "failed to close resource");
                    report
                        .failures
                        .push((format!("{} {}", resource.kind(), resource.name()), err));
                }
            }
        }
        info!(closed = report.closed, failed = report.failures.len(), "queue resources closed");
        report
    }
}
