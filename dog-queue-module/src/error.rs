use dog_queue::QueueError;
use thiserror::Error;

pub type QueueModuleResult<T> = Result<T, QueueModuleError>;

/// Failures of queue discovery, binding and bootstrap.
#[derive(Error, Debug)]
pub enum QueueModuleError {
    /// A queue names a shared configuration key nobody registered.
    #[error(
        "shared configuration \"{config_key}\" used by queue \"{queue}\" was never registered; \
         add QueueModule::for_root_config(\"{config_key}\", ..) or drop the config key"
    )]
    MissingSharedConfiguration { config_key: String, queue: String },

    #[error("no queue found for \"{name}\": register it with QueueModule::register_queue or provide a shared configuration")]
    NoQueueFound { name: String },

    #[error("no queue found for the event stream of \"{name}\": register the queue or provide a shared configuration")]
    NoEventStreamFound { name: String },

    #[error("processor {class} does not implement WorkerHost; annotate it with `.worker_host()`")]
    InvalidProcessorClass { class: String },

    #[error("event listener {class} does not implement QueueEventsHost; annotate it with `.queue_events_host()`")]
    InvalidListenerClass { class: String },

    #[error(
        "the worker of {class} is not created yet: wait for the module init hook, or call \
         QueueRegistrar::register() first when manual registration is enabled"
    )]
    WorkerNotInitialized { class: String },

    #[error(
        "the event stream of {class} is not created yet: wait for the module init hook, or call \
         QueueRegistrar::register() first when manual registration is enabled"
    )]
    EventsNotInitialized { class: String },

    #[error("queue registration aborted: {reason}")]
    RegistrationAborted { reason: String },

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Container(#[from] anyhow::Error),
}

impl QueueModuleError {
    /// Unwrap a module or queue error carried through the container, keep
    /// anything else as [`QueueModuleError::Container`].
    pub fn from_container(err: anyhow::Error) -> Self {
        let err = match err.downcast::<QueueModuleError>() {
            Ok(module) => return module,
            Err(other) => other,
        };
        match err.downcast::<QueueError>() {
            Ok(queue) => QueueModuleError::Queue(queue),
            Err(other) => QueueModuleError::Container(other),
        }
    }

    pub fn is_missing_shared_configuration(&self) -> bool {
        matches!(self, Self::MissingSharedConfiguration { .. })
    }
}
