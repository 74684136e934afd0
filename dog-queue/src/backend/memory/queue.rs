use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, instrument};

use super::Channel;
use crate::driver::QueueHandle;
use crate::{EventListener, Job, JobOptions, QueueError, QueueEvent, QueueOptions, QueueResult};

/// Producer handle of the memory driver.
pub struct MemoryQueue {
    name: String,
    opts: QueueOptions,
    channel: Arc<Channel>,
    closed: AtomicBool,
}

impl MemoryQueue {
    pub(crate) fn new(name: &str, opts: QueueOptions, channel: Arc<Channel>) -> Self {
        Self {
            name: name.to_string(),
            opts,
            channel,
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl QueueHandle for MemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    fn opts(&self) -> &QueueOptions {
        &self.opts
    }

    #[instrument(skip(self, data, opts), fields(queue = %self.name))]
    async fn add(&self, name: &str, data: Value, opts: JobOptions) -> QueueResult<Job> {
        if self.is_closed() {
            return Err(QueueError::QueueClosed(self.name.clone()));
        }
        let job = Job::new(&self.name, name, data, &opts);
        debug!(job_id = %job.id, channel = self.channel.key(), "job added");
        self.channel.push(job.clone());
        Ok(job)
    }

    async fn count(&self) -> QueueResult<usize> {
        Ok(self.channel.len())
    }

    fn on(&self, event: &str, listener: EventListener) {
        self.channel.queue_events.on(event, listener);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) -> QueueResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.channel.queue_events.emit(&QueueEvent::Closed);
        debug!(queue = %self.name, "queue closed");
        Ok(())
    }
}
