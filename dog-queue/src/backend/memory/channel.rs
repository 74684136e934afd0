use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::{broadcast, Notify};

use crate::{EventEmitter, Job, QueueEvent};

const BUS_CAPACITY: usize = 1024;

/// Shared state of one named queue.
pub(crate) struct Channel {
    key: String,
    jobs: Mutex<VecDeque<Job>>,
    notify: Notify,
    /// Listeners attached through queue handles.
    pub(crate) queue_events: EventEmitter,
    bus: broadcast::Sender<QueueEvent>,
}

impl Channel {
    pub(crate) fn new(key: String) -> Self {
        let (bus, _) = broadcast::channel(BUS_CAPACITY);
        Self {
            key,
            jobs: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            queue_events: EventEmitter::new(),
            bus,
        }
    }

    pub(crate) fn key(&self) -> &str {
        &self.key
    }

    pub(crate) fn push(&self, job: Job) {
        self.jobs.lock().push_back(job.clone());
        self.notify.notify_one();
        let event = QueueEvent::Waiting { job };
        self.queue_events.emit(&event);
        self.publish(event);
    }

    /// Wait for the next job. Cancel safe.
    pub(crate) async fn next(&self) -> Job {
        loop {
            if let Some(job) = self.jobs.lock().pop_front() {
                return job;
            }
            self.notify.notified().await;
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }

    /// Fan an event out to every event stream of this queue.
    pub(crate) fn publish(&self, event: QueueEvent) {
        // no subscribers is fine
        let _ = self.bus.send(event);
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.bus.subscribe()
    }
}
