#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dog_queue::prelude::*;
use dog_queue::EventListener;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

/// Handle counters of a [`CountingDriver`].
#[derive(Default)]
pub struct Counters {
    pub queues: AtomicUsize,
    pub workers: AtomicUsize,
    pub events: AtomicUsize,
    pub queue_closes: AtomicUsize,
    pub worker_closes: AtomicUsize,
    pub events_closes: AtomicUsize,
}

impl Counters {
    pub fn created(&self) -> usize {
        self.queues.load(Ordering::SeqCst) + self.workers.load(Ordering::SeqCst) + self.events.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.queue_closes.load(Ordering::SeqCst)
            + self.worker_closes.load(Ordering::SeqCst)
            + self.events_closes.load(Ordering::SeqCst)
    }
}

/// [`MemoryDriver`] that counts handles and their `close()` calls, and can
/// make the worker close of one queue fail.
#[derive(Clone, Default)]
pub struct CountingDriver {
    inner: MemoryDriver,
    pub counters: Arc<Counters>,
    failing_worker: Arc<Mutex<Option<String>>>,
}

impl CountingDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Jobs waiting on queue `name` built with default options.
    pub fn waiting(&self, name: &str) -> usize {
        self.inner.waiting(name, &QueueOptions::new())
    }

    /// Worker closes on queue `name` report an error (after being counted).
    pub fn fail_worker_close(self, name: &str) -> Self {
        *self.failing_worker.lock() = Some(name.to_string());
        self
    }
}

#[async_trait]
impl QueueDriver for CountingDriver {
    async fn queue(&self, name: &str, opts: QueueOptions) -> QueueResult<Arc<dyn QueueHandle>> {
        self.counters.queues.fetch_add(1, Ordering::SeqCst);
        let inner = self.inner.queue(name, opts).await?;
        Ok(Arc::new(CountingQueue {
            inner,
            counters: self.counters.clone(),
        }))
    }

    async fn worker(&self, name: &str, processor: Processor, opts: WorkerOptions) -> QueueResult<Arc<dyn WorkerHandle>> {
        self.counters.workers.fetch_add(1, Ordering::SeqCst);
        let inner = self.inner.worker(name, processor, opts).await?;
        let fail = self.failing_worker.lock().as_deref() == Some(name);
        Ok(Arc::new(CountingWorker {
            inner,
            counters: self.counters.clone(),
            fail,
        }))
    }

    async fn events(&self, name: &str, opts: QueueOptions) -> QueueResult<Arc<dyn EventsHandle>> {
        self.counters.events.fetch_add(1, Ordering::SeqCst);
        let inner = self.inner.events(name, opts).await?;
        Ok(Arc::new(CountingEvents {
            inner,
            counters: self.counters.clone(),
        }))
    }
}

struct CountingQueue {
    inner: Arc<dyn QueueHandle>,
    counters: Arc<Counters>,
}

#[async_trait]
impl QueueHandle for CountingQueue {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn opts(&self) -> &QueueOptions {
        self.inner.opts()
    }

    async fn add(&self, name: &str, data: Value, opts: JobOptions) -> QueueResult<Job> {
        self.inner.add(name, data, opts).await
    }

    async fn count(&self) -> QueueResult<usize> {
        self.inner.count().await
    }

    fn on(&self, event: &str, listener: EventListener) {
        self.inner.on(event, listener)
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    async fn close(&self) -> QueueResult<()> {
        self.counters.queue_closes.fetch_add(1, Ordering::SeqCst);
        self.inner.close().await
    }
}

struct CountingWorker {
    inner: Arc<dyn WorkerHandle>,
    counters: Arc<Counters>,
    fail: bool,
}

#[async_trait]
impl WorkerHandle for CountingWorker {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn opts(&self) -> &WorkerOptions {
        self.inner.opts()
    }

    fn on(&self, event: &str, listener: EventListener) {
        self.inner.on(event, listener)
    }

    fn run(&self) -> QueueResult<()> {
        self.inner.run()
    }

    fn is_running(&self) -> bool {
        self.inner.is_running()
    }

    async fn close(&self) -> QueueResult<()> {
        self.counters.worker_closes.fetch_add(1, Ordering::SeqCst);
        self.inner.close().await?;
        if self.fail {
            return Err(QueueError::Internal(format!("connection to {} lost", self.inner.name())));
        }
        Ok(())
    }
}

struct CountingEvents {
    inner: Arc<dyn EventsHandle>,
    counters: Arc<Counters>,
}

#[async_trait]
impl EventsHandle for CountingEvents {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn opts(&self) -> &QueueOptions {
        self.inner.opts()
    }

    fn on(&self, event: &str, listener: EventListener) {
        self.inner.on(event, listener)
    }

    async fn close(&self) -> QueueResult<()> {
        self.counters.events_closes.fetch_add(1, Ordering::SeqCst);
        self.inner.close().await
    }
}

/// Listener forwarding every event into a channel.
pub fn recorder() -> (EventListener, mpsc::UnboundedReceiver<QueueEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let listener: EventListener = Arc::new(move |event: &QueueEvent| {
        let _ = tx.send(event.clone());
    });
    (listener, rx)
}

pub async fn next_event(rx: &mut mpsc::UnboundedReceiver<QueueEvent>) -> QueueEvent {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("listener dropped")
}

/// Wait until `check` holds, polling for up to two seconds.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within two seconds");
}
