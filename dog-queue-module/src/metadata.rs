//! Annotation records kept in the reflector.

use dog_core::Scope;
use dog_queue::QueueOptions;

use crate::tokens::DEFAULT_QUEUE_NAME;

pub(crate) const PROCESSOR_METADATA: &str = "dog:queue:processor";
pub(crate) const WORKER_METADATA: &str = "dog:queue:worker";
pub(crate) const WORKER_HOST_METADATA: &str = "dog:queue:worker_host";
pub(crate) const LISTENER_METADATA: &str = "dog:queue:listener";
pub(crate) const EVENTS_HOST_METADATA: &str = "dog:queue:events_host";
pub(crate) const ON_WORKER_EVENT_METADATA: &str = "dog:queue:on_worker_event";
pub(crate) const ON_QUEUE_EVENT_METADATA: &str = "dog:queue:on_queue_event";

/// Declares a type as the processor of a queue.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessorMetadata {
    /// Queue to consume; `"default"` when omitted.
    pub name: Option<String>,
    /// Scope the processor expects to be registered with.
    pub scope: Option<Scope>,
    /// Shared configuration to build the worker from when no queue with
    /// this name is registered.
    pub config_key: Option<String>,
}

impl ProcessorMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn with_config_key(mut self, key: impl Into<String>) -> Self {
        self.config_key = Some(key.into());
        self
    }

    pub fn queue_name(&self) -> &str {
        self.name.as_deref().unwrap_or(DEFAULT_QUEUE_NAME)
    }
}

/// Declares a type as an event-stream listener of a queue.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEventsListenerMetadata {
    pub queue_name: String,
    pub config_key: Option<String>,
    /// Merged over the queue's options when the stream is opened.
    pub options: QueueOptions,
}

impl QueueEventsListenerMetadata {
    pub fn new(queue_name: impl Into<String>) -> Self {
        Self {
            queue_name: queue_name.into(),
            config_key: None,
            options: QueueOptions::new(),
        }
    }

    pub fn with_config_key(mut self, key: impl Into<String>) -> Self {
        self.config_key = Some(key.into());
        self
    }

    pub fn with_options(mut self, options: QueueOptions) -> Self {
        self.options = options;
        self
    }
}

/// Event hook on one method.
#[derive(Debug, Clone, PartialEq)]
pub struct OnEventMetadata {
    /// Event name (`completed`, `failed`, ... or `*`).
    pub event: String,
    /// Only call the hook for jobs with this name.
    pub job_name: Option<String>,
}

impl OnEventMetadata {
    pub fn new(event: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            job_name: None,
        }
    }

    pub fn for_job(mut self, job_name: impl Into<String>) -> Self {
        self.job_name = Some(job_name.into());
        self
    }
}

/// Hook attached to the worker of a processor.
pub type OnWorkerEventMetadata = OnEventMetadata;

/// Hook attached to the event stream of a listener.
pub type OnQueueEventMetadata = OnEventMetadata;
