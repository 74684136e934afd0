//! In-process driver.
//!
//! Jobs live in per-queue channels keyed by `{connection}/{prefix}:{name}`,
//! so two handles built with the same connection, prefix and name see the
//! same jobs. Nothing survives the process.

mod channel;
mod events;
mod queue;
mod worker;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::driver::{EventsHandle, QueueDriver, QueueHandle, WorkerHandle};
use crate::{Processor, QueueError, QueueOptions, QueueResult, WorkerOptions};

pub(crate) use channel::Channel;
pub use events::MemoryQueueEvents;
pub use queue::MemoryQueue;
pub use worker::MemoryWorker;

/// In-memory [`QueueDriver`] for tests, development and single-process apps.
#[derive(Default, Clone)]
pub struct MemoryDriver {
    channels: Arc<Mutex<HashMap<String, Arc<Channel>>>>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn channel(&self, name: &str, opts: &QueueOptions) -> Arc<Channel> {
        let key = format!("{}/{}:{}", opts.connection_key(), opts.prefix(), name);
        self.channels
            .lock()
            .entry(key.clone())
            .or_insert_with(|| {
                debug!(channel = %key, "opened memory channel");
                Arc::new(Channel::new(key))
            })
            .clone()
    }

    /// Waiting jobs of a queue, without building a handle.
    pub fn waiting(&self, name: &str, opts: &QueueOptions) -> usize {
        self.channel(name, opts).len()
    }
}

#[async_trait]
impl QueueDriver for MemoryDriver {
    async fn queue(&self, name: &str, opts: QueueOptions) -> QueueResult<Arc<dyn QueueHandle>> {
        let channel = self.channel(name, &opts);
        Ok(Arc::new(MemoryQueue::new(name, opts, channel)))
    }

    async fn worker(&self, name: &str, processor: Processor, opts: WorkerOptions) -> QueueResult<Arc<dyn WorkerHandle>> {
        if let Processor::Sandboxed(path) = &processor {
            check_script(path)?;
        }
        let channel = self.channel(name, &opts);
        let worker = MemoryWorker::new(name, processor, opts, channel);
        if worker.opts().autorun() {
            worker.run()?;
        }
        Ok(Arc::new(worker))
    }

    async fn events(&self, name: &str, opts: QueueOptions) -> QueueResult<Arc<dyn EventsHandle>> {
        let channel = self.channel(name, &opts);
        Ok(Arc::new(MemoryQueueEvents::new(name, opts, &channel)))
    }
}

#[cfg(feature = "sandbox")]
fn check_script(path: &std::path::Path) -> QueueResult<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(QueueError::Sandbox(format!("processor script {} does not exist", path.display())))
    }
}

#[cfg(not(feature = "sandbox"))]
fn check_script(path: &std::path::Path) -> QueueResult<()> {
    Err(QueueError::Sandbox(format!(
        "cannot run {}: built without the `sandbox` feature",
        path.display()
    )))
}
