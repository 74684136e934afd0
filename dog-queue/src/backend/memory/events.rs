use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

use super::Channel;
use crate::driver::EventsHandle;
use crate::{EventEmitter, EventListener, QueueEvent, QueueOptions, QueueResult};

type Listening = (oneshot::Sender<()>, JoinHandle<()>);

/// Event-stream handle of the memory driver.
pub struct MemoryQueueEvents {
    name: String,
    opts: QueueOptions,
    emitter: Arc<EventEmitter>,
    listening: Mutex<Option<Listening>>,
}

impl MemoryQueueEvents {
    /// Subscribes immediately; events published after this returns are seen.
    pub(crate) fn new(name: &str, opts: QueueOptions, channel: &Channel) -> Self {
        let emitter = Arc::new(EventEmitter::new());
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let stream = BroadcastStream::new(channel.subscribe());
        let join_handle = tokio::spawn(forward(name.to_string(), stream, emitter.clone(), shutdown_rx));

        Self {
            name: name.to_string(),
            opts,
            emitter,
            listening: Mutex::new(Some((shutdown_tx, join_handle))),
        }
    }
}

async fn forward(
    name: String,
    mut stream: BroadcastStream<QueueEvent>,
    emitter: Arc<EventEmitter>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut shutdown_rx => break,
            item = stream.next() => match item {
                Some(Ok(event)) => emitter.emit(&event),
                Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                    warn!(queue = %name, skipped, "event stream lagged");
                }
                None => break,
            },
        }
    }
    debug!(queue = %name, "event stream stopped");
}

#[async_trait]
impl EventsHandle for MemoryQueueEvents {
    fn name(&self) -> &str {
        &self.name
    }

    fn opts(&self) -> &QueueOptions {
        &self.opts
    }

    fn on(&self, event: &str, listener: EventListener) {
        self.emitter.on(event, listener);
    }

    async fn close(&self) -> QueueResult<()> {
        let Some((shutdown_tx, join_handle)) = self.listening.lock().take() else {
            return Ok(());
        };
        let _ = shutdown_tx.send(());
        join_handle.await?;
        self.emitter.emit(&QueueEvent::Closed);
        Ok(())
    }
}
