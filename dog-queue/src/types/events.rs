use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::error;

use super::Job;

/// Lifecycle events emitted by queues, workers and event streams.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum QueueEvent {
    /// Job was added and waits for a worker
    Waiting { job: Job },
    /// A worker started processing the job
    Active { job: Job },
    Completed { job: Job, return_value: Value },
    Failed { job: Job, error: String },
    /// The queue has no more waiting jobs
    Drained,
    /// The emitting handle was closed
    Closed,
    Error { message: String },
}

impl QueueEvent {
    /// Event name listeners subscribe to.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Waiting { .. } => "waiting",
            Self::Active { .. } => "active",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
            Self::Drained => "drained",
            Self::Closed => "closed",
            Self::Error { .. } => "error",
        }
    }

    pub fn job(&self) -> Option<&Job> {
        match self {
            Self::Waiting { job } | Self::Active { job } | Self::Completed { job, .. } | Self::Failed { job, .. } => {
                Some(job)
            }
            _ => None,
        }
    }
}

/// Callback attached with `on(event, listener)`.
pub type EventListener = Arc<dyn Fn(&QueueEvent) + Send + Sync>;

/// Named listener table shared by every handle kind.
#[derive(Default)]
pub struct EventEmitter {
    listeners: RwLock<Vec<(String, EventListener)>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events called `event` (`"*"` for all of them).
    pub fn on(&self, event: impl Into<String>, listener: EventListener) {
        self.listeners.write().push((event.into(), listener));
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners.read().iter().filter(|(name, _)| name == event).count()
    }

    /// Call every matching listener. A panicking listener is logged and
    /// does not stop the others.
    pub fn emit(&self, event: &QueueEvent) {
        // snapshot so listeners may subscribe more listeners
        let matching: Vec<EventListener> = self
            .listeners
            .read()
            .iter()
            .filter(|(name, _)| name == event.name() || name == "*")
            .map(|(_, listener)| listener.clone())
            .collect();

        for listener in matching {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                error!(event = event.name(), "event listener panicked");
            }
        }
    }
}
