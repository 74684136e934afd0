//! # dog-queue: job processing for DogRS
//!
//! A queue engine exposed through three handle kinds built by a
//! [`QueueDriver`]:
//!
//! - [`QueueHandle`]: producer side, `add` jobs to a named queue
//! - [`WorkerHandle`]: consumer side, runs a [`Processor`] per job
//! - [`EventsHandle`]: observer side, sees every event of a queue
//!
//! Handles accept listeners with `on(event, listener)` and are released
//! with `close()`, which is idempotent.
//!
//! ```rust
//! use dog_queue::prelude::*;
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let driver = MemoryDriver::new();
//! let opts = QueueOptions::new().with("concurrency", 2);
//!
//! let queue = driver.queue("mail", opts.clone()).await?;
//! let worker = driver
//!     .worker("mail", Processor::inline(|job: Job| async move { Ok(job.data) }), opts)
//!     .await?;
//!
//! queue.add("welcome", json!({"to": "ada@example.com"}), JobOptions::default()).await?;
//!
//! worker.close().await?;
//! queue.close().await?;
//! # Ok::<(), QueueError>(())
//! # });
//! ```

pub mod backend;
pub mod driver;
pub mod error;
pub mod processor;
pub mod types;

pub use driver::{EventsHandle, QueueDriver, QueueHandle, WorkerHandle};
pub use error::{JobError, QueueError, QueueResult};
pub use processor::{ProcessFn, Processor};
pub use types::{
    EventEmitter, EventListener, Job, JobId, JobOptions, QueueEvent, QueueOptions, WorkerOptions,
    DEFAULT_CONNECTION, DEFAULT_PREFIX, MAX_CONCURRENCY,
};

#[cfg(feature = "memory")]
pub use backend::memory::MemoryDriver;

pub mod prelude {
    pub use crate::{
        EventsHandle, Job, JobError, JobOptions, Processor, QueueDriver, QueueError, QueueEvent, QueueHandle,
        QueueOptions, QueueResult, WorkerHandle, WorkerOptions,
    };

    #[cfg(feature = "memory")]
    pub use crate::MemoryDriver;

    pub use async_trait::async_trait;
}
