pub mod events;
pub mod ids;
pub mod job;
pub mod options;

pub use events::{EventEmitter, EventListener, QueueEvent};
pub use ids::JobId;
pub use job::{Job, JobOptions};
pub use options::{QueueOptions, WorkerOptions, DEFAULT_CONNECTION, DEFAULT_PREFIX, MAX_CONCURRENCY};
