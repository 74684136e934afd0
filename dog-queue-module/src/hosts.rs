//! Capabilities a processor or listener type implements, plus the slots
//! that hand it its native handle once registration created it.

use std::any::type_name;
use std::sync::Arc;

use async_trait::async_trait;
use dog_core::Instance;
use dog_queue::{EventsHandle, Job, JobError, WorkerHandle};
use once_cell::sync::OnceCell;
use serde_json::Value;

use crate::error::QueueModuleError;

/// A processor: handles the jobs of the queue named in its metadata.
#[async_trait]
pub trait WorkerHost: Send + Sync + 'static {
    async fn process(&self, job: Job) -> Result<Value, JobError>;

    fn worker_slot(&self) -> &HostedWorker;

    /// The worker created for this processor.
    fn worker(&self) -> Result<Arc<dyn WorkerHandle>, QueueModuleError> {
        self.worker_slot()
            .get()
            .ok_or_else(|| QueueModuleError::WorkerNotInitialized {
                class: short_name(type_name::<Self>()).to_string(),
            })
    }
}

/// An event-stream listener: observes every event of one queue.
pub trait QueueEventsHost: Send + Sync + 'static {
    fn events_slot(&self) -> &HostedQueueEvents;

    /// The event stream opened for this listener.
    fn queue_events(&self) -> Result<Arc<dyn EventsHandle>, QueueModuleError> {
        self.events_slot()
            .get()
            .ok_or_else(|| QueueModuleError::EventsNotInitialized {
                class: short_name(type_name::<Self>()).to_string(),
            })
    }
}

/// Write-once holder for the worker of a [`WorkerHost`].
#[derive(Default)]
pub struct HostedWorker {
    slot: OnceCell<Arc<dyn WorkerHandle>>,
}

impl HostedWorker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<Arc<dyn WorkerHandle>> {
        self.slot.get().cloned()
    }

    pub fn is_set(&self) -> bool {
        self.slot.get().is_some()
    }

    /// False when a worker was already stored.
    pub(crate) fn set(&self, worker: Arc<dyn WorkerHandle>) -> bool {
        self.slot.set(worker).is_ok()
    }
}

/// Write-once holder for the event stream of a [`QueueEventsHost`].
#[derive(Default)]
pub struct HostedQueueEvents {
    slot: OnceCell<Arc<dyn EventsHandle>>,
}

impl HostedQueueEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<Arc<dyn EventsHandle>> {
        self.slot.get().cloned()
    }

    pub fn is_set(&self) -> bool {
        self.slot.get().is_some()
    }

    pub(crate) fn set(&self, events: Arc<dyn EventsHandle>) -> bool {
        self.slot.set(events).is_ok()
    }
}

/// Views a type-erased instance as a [`WorkerHost`]. Recorded per type by
/// `Annotate::worker_host`.
pub type WorkerHostCaster = Arc<dyn Fn(Instance) -> Option<Arc<dyn WorkerHost>> + Send + Sync>;

/// Views a type-erased instance as a [`QueueEventsHost`].
pub type EventsHostCaster = Arc<dyn Fn(Instance) -> Option<Arc<dyn QueueEventsHost>> + Send + Sync>;

pub(crate) fn worker_host_caster<T: WorkerHost>() -> WorkerHostCaster {
    Arc::new(|instance: Instance| {
        instance
            .downcast::<T>()
            .ok()
            .map(|host| host as Arc<dyn WorkerHost>)
    })
}

pub(crate) fn events_host_caster<T: QueueEventsHost>() -> EventsHostCaster {
    Arc::new(|instance: Instance| {
        instance
            .downcast::<T>()
            .ok()
            .map(|host| host as Arc<dyn QueueEventsHost>)
    })
}

fn short_name(name: &'static str) -> &'static str {
    let base = name.split('<').next().unwrap_or(name);
    match base.rfind("::") {
        Some(idx) => &name[idx + 2..],
        None => name,
    }
}
