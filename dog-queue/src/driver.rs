//! Handle contract every queue backend implements.
//!
//! A driver builds three kinds of handle over a named queue: the queue
//! itself (producer side), workers (consumer side) and event streams
//! (observer side). Every handle is closed explicitly; closing twice is a
//! no-op.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::{EventListener, Job, JobOptions, Processor, QueueOptions, QueueResult, WorkerOptions};

/// Producer handle over a named queue.
#[async_trait]
pub trait QueueHandle: Send + Sync {
    fn name(&self) -> &str;

    /// Options the queue was built with.
    fn opts(&self) -> &QueueOptions;

    async fn add(&self, name: &str, data: Value, opts: JobOptions) -> QueueResult<Job>;

    /// Jobs waiting for a worker.
    async fn count(&self) -> QueueResult<usize>;

    fn on(&self, event: &str, listener: EventListener);

    fn is_closed(&self) -> bool;

    async fn close(&self) -> QueueResult<()>;
}

/// Consumer handle: runs a processor for the jobs of one queue.
#[async_trait]
pub trait WorkerHandle: Send + Sync {
    fn name(&self) -> &str;

    fn opts(&self) -> &WorkerOptions;

    fn on(&self, event: &str, listener: EventListener);

    /// Start consuming when built with `autorun: false`. No-op when running.
    fn run(&self) -> QueueResult<()>;

    fn is_running(&self) -> bool;

    /// Stop taking jobs, wait for in-flight jobs, then release the worker.
    async fn close(&self) -> QueueResult<()>;
}

/// Observer handle: every event of one queue, from any worker.
#[async_trait]
pub trait EventsHandle: Send + Sync {
    fn name(&self) -> &str;

    fn opts(&self) -> &QueueOptions;

    fn on(&self, event: &str, listener: EventListener);

    async fn close(&self) -> QueueResult<()>;
}

/// Factory for the three handle kinds.
#[async_trait]
pub trait QueueDriver: Send + Sync {
    async fn queue(&self, name: &str, opts: QueueOptions) -> QueueResult<Arc<dyn QueueHandle>>;

    async fn worker(&self, name: &str, processor: Processor, opts: WorkerOptions) -> QueueResult<Arc<dyn WorkerHandle>>;

    async fn events(&self, name: &str, opts: QueueOptions) -> QueueResult<Arc<dyn EventsHandle>>;
}
