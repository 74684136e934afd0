use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::{oneshot, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::Channel;
use crate::driver::WorkerHandle;
use crate::{EventEmitter, EventListener, Job, JobError, Processor, QueueError, QueueEvent, QueueResult, WorkerOptions};

enum WorkerState {
    Idle,
    Running {
        shutdown_tx: oneshot::Sender<()>,
        join_handle: JoinHandle<()>,
    },
    Closed,
}

struct WorkerInner {
    name: String,
    processor: Processor,
    channel: Arc<Channel>,
    emitter: EventEmitter,
    active: AtomicUsize,
}

/// Consumer handle of the memory driver.
///
/// Runs up to `concurrency` jobs at once. Processor panics fail the job
/// instead of the worker.
pub struct MemoryWorker {
    inner: Arc<WorkerInner>,
    opts: WorkerOptions,
    state: Mutex<WorkerState>,
}

impl MemoryWorker {
    pub(crate) fn new(name: &str, processor: Processor, opts: WorkerOptions, channel: Arc<Channel>) -> Self {
        Self {
            inner: Arc::new(WorkerInner {
                name: name.to_string(),
                processor,
                channel,
                emitter: EventEmitter::new(),
                active: AtomicUsize::new(0),
            }),
            opts,
            state: Mutex::new(WorkerState::Idle),
        }
    }
}

#[async_trait]
impl WorkerHandle for MemoryWorker {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn opts(&self) -> &WorkerOptions {
        &self.opts
    }

    fn on(&self, event: &str, listener: EventListener) {
        self.inner.emitter.on(event, listener);
    }

    fn run(&self) -> QueueResult<()> {
        let mut state = self.state.lock();
        match *state {
            WorkerState::Running { .. } => Ok(()),
            WorkerState::Closed => Err(QueueError::WorkerClosed(self.inner.name.clone())),
            WorkerState::Idle => {
                let (shutdown_tx, shutdown_rx) = oneshot::channel();
                let concurrency = self.opts.concurrency();
                let join_handle = tokio::spawn(run_loop(self.inner.clone(), concurrency, shutdown_rx));
                info!(queue = %self.inner.name, concurrency, "worker started");
                *state = WorkerState::Running {
                    shutdown_tx,
                    join_handle,
                };
                Ok(())
            }
        }
    }

    fn is_running(&self) -> bool {
        matches!(*self.state.lock(), WorkerState::Running { .. })
    }

    async fn close(&self) -> QueueResult<()> {
        let previous = std::mem::replace(&mut *self.state.lock(), WorkerState::Closed);
        match previous {
            WorkerState::Closed => return Ok(()),
            WorkerState::Idle => {}
            WorkerState::Running {
                shutdown_tx,
                join_handle,
            } => {
                let _ = shutdown_tx.send(());
                join_handle.await?;
            }
        }
        self.inner.emitter.emit(&QueueEvent::Closed);
        info!(queue = %self.inner.name, "worker closed");
        Ok(())
    }
}

async fn run_loop(inner: Arc<WorkerInner>, concurrency: usize, mut shutdown_rx: oneshot::Receiver<()>) {
    let permits = Arc::new(Semaphore::new(concurrency));

    loop {
        let permit = tokio::select! {
            _ = &mut shutdown_rx => break,
            permit = permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let job = tokio::select! {
            _ = &mut shutdown_rx => break,
            job = inner.channel.next() => job,
        };

        inner.active.fetch_add(1, Ordering::SeqCst);
        let inner = inner.clone();
        tokio::spawn(async move {
            inner.process(job).await;
            drop(permit);
        });
    }

    // wait for in-flight jobs
    let all = u32::try_from(concurrency).unwrap_or(u32::MAX);
    if permits.acquire_many(all).await.is_err() {
        warn!(queue = %inner.name, "worker semaphore closed while draining");
    }
    debug!(queue = %inner.name, "worker loop stopped");
}

impl WorkerInner {
    async fn process(&self, mut job: Job) {
        job.attempts_made += 1;
        self.emit(QueueEvent::Active { job: job.clone() });

        let outcome = match &self.processor {
            Processor::Inline(process) => {
                let process = process.clone();
                let input = job.clone();
                std::panic::AssertUnwindSafe(async move { process(input).await })
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| Err(JobError::permanent(panic_message(panic.as_ref()))))
            }
            Processor::Sandboxed(path) => run_sandboxed(path, &job).await,
        };

        match outcome {
            Ok(return_value) => {
                debug!(queue = %self.name, job_id = %job.id, "job completed");
                self.emit(QueueEvent::Completed { job, return_value });
            }
            Err(err) => {
                error!(queue = %self.name, job_id = %job.id, error = %err, "job failed");
                self.emit(QueueEvent::Failed {
                    job,
                    error: err.to_string(),
                });
            }
        }

        let remaining = self.active.fetch_sub(1, Ordering::SeqCst) - 1;
        if remaining == 0 && self.channel.is_empty() {
            self.emit(QueueEvent::Drained);
        }
    }

    fn emit(&self, event: QueueEvent) {
        self.emitter.emit(&event);
        self.channel.publish(event);
    }
}

#[cfg(feature = "sandbox")]
async fn run_sandboxed(path: &std::path::Path, job: &Job) -> Result<serde_json::Value, JobError> {
    crate::backend::sandbox::run(path, job).await
}

#[cfg(not(feature = "sandbox"))]
async fn run_sandboxed(path: &std::path::Path, _job: &Job) -> Result<serde_json::Value, JobError> {
    Err(JobError::permanent(format!(
        "cannot run {}: built without the `sandbox` feature",
        path.display()
    )))
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        format!("processor panicked: {msg}")
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        format!("processor panicked: {msg}")
    } else {
        "processor panicked".to_string()
    }
}
