//! Explicit annotations.
//!
//! ```rust
//! use dog_core::Reflector;
//! use dog_queue_module::prelude::*;
//! use serde_json::Value;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! #[derive(Default)]
//! struct Mailer {
//!     worker: HostedWorker,
//!     sent: AtomicUsize,
//! }
//!
//! #[async_trait]
//! impl WorkerHost for Mailer {
//!     async fn process(&self, job: Job) -> Result<Value, JobError> {
//!         Ok(job.data)
//!     }
//!     fn worker_slot(&self) -> &HostedWorker {
//!         &self.worker
//!     }
//! }
//!
//! let reflector = Reflector::new();
//! Annotate::<Mailer>::new(&reflector)
//!     .processor(ProcessorMetadata::new("mail"))
//!     .worker_host()
//!     .on_worker_event("on_completed", OnEventMetadata::new("completed"), |mailer, _event| {
//!         mailer.sent.fetch_add(1, Ordering::SeqCst);
//!     });
//! ```

use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;

use dog_core::{Instance, MethodRef, Reflector, Target};
use dog_queue::{EventListener, QueueEvent, WorkerOptions};

use crate::hosts::{events_host_caster, worker_host_caster, QueueEventsHost, WorkerHost};
use crate::metadata::{
    OnQueueEventMetadata, OnWorkerEventMetadata, ProcessorMetadata, QueueEventsListenerMetadata, EVENTS_HOST_METADATA,
    LISTENER_METADATA, ON_QUEUE_EVENT_METADATA, ON_WORKER_EVENT_METADATA, PROCESSOR_METADATA, WORKER_HOST_METADATA,
    WORKER_METADATA,
};

type HookFn = Arc<dyn Fn(&(dyn Any + Send + Sync), &QueueEvent) + Send + Sync>;

/// A hook method as stored on the prototype: not tied to any instance.
#[derive(Clone)]
pub(crate) struct UnboundHook {
    call: HookFn,
}

impl UnboundHook {
    fn of<T, F>(handler: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&T, &QueueEvent) + Send + Sync + 'static,
    {
        Self {
            call: Arc::new(move |this: &(dyn Any + Send + Sync), event: &QueueEvent| {
                if let Some(this) = this.downcast_ref::<T>() {
                    handler(this, event);
                }
            }),
        }
    }

    pub(crate) fn from_method(method: &MethodRef) -> Option<Self> {
        method.method.downcast_ref::<UnboundHook>().cloned()
    }

    /// Listener calling the hook on `instance`, for jobs named `job_name` only
    /// when a name is given.
    pub(crate) fn bind(&self, instance: Instance, job_name: Option<String>) -> EventListener {
        let call = self.call.clone();
        Arc::new(move |event: &QueueEvent| {
            if let Some(wanted) = &job_name {
                if event.job().map(|job| job.name.as_str()) != Some(wanted.as_str()) {
                    return;
                }
            }
            call(&*instance, event);
        })
    }
}

/// Records queue annotations for `T` into a reflector.
pub struct Annotate<'r, T> {
    reflector: &'r Reflector,
    _type: PhantomData<fn() -> T>,
}

impl<'r, T: Any + Send + Sync> Annotate<'r, T> {
    pub fn new(reflector: &'r Reflector) -> Self {
        reflector.register_type::<T>();
        Self {
            reflector,
            _type: PhantomData,
        }
    }

    pub fn processor(self, metadata: ProcessorMetadata) -> Self {
        self.reflector
            .define_metadata(PROCESSOR_METADATA, metadata, Target::of::<T>());
        self
    }

    /// Worker tuning merged over the queue's options.
    pub fn worker_options(self, options: WorkerOptions) -> Self {
        self.reflector
            .define_metadata(WORKER_METADATA, options, Target::of::<T>());
        self
    }

    pub fn queue_events_listener(self, metadata: QueueEventsListenerMetadata) -> Self {
        self.reflector
            .define_metadata(LISTENER_METADATA, metadata, Target::of::<T>());
        self
    }

    /// Call `handler` on the live processor instance for worker events.
    pub fn on_worker_event<F>(self, method: &'static str, metadata: OnWorkerEventMetadata, handler: F) -> Self
    where
        F: Fn(&T, &QueueEvent) + Send + Sync + 'static,
    {
        self.hook(method, ON_WORKER_EVENT_METADATA, metadata, handler)
    }

    /// Call `handler` on the live listener instance for queue events.
    pub fn on_queue_event<F>(self, method: &'static str, metadata: OnQueueEventMetadata, handler: F) -> Self
    where
        F: Fn(&T, &QueueEvent) + Send + Sync + 'static,
    {
        self.hook(method, ON_QUEUE_EVENT_METADATA, metadata, handler)
    }

    fn hook<F>(self, method: &'static str, key: &'static str, metadata: OnWorkerEventMetadata, handler: F) -> Self
    where
        F: Fn(&T, &QueueEvent) + Send + Sync + 'static,
    {
        let hook: Instance = Arc::new(UnboundHook::of::<T, F>(handler));
        self.reflector.define_method::<T>(method, hook);
        self.reflector
            .define_metadata(key, metadata, Target::method::<T>(method));
        self
    }
}

impl<'r, T: WorkerHost> Annotate<'r, T> {
    /// Record that `T` implements [`WorkerHost`].
    pub fn worker_host(self) -> Self {
        self.reflector
            .define_metadata(WORKER_HOST_METADATA, worker_host_caster::<T>(), Target::of::<T>());
        self
    }
}

impl<'r, T: QueueEventsHost> Annotate<'r, T> {
    /// Record that `T` implements [`QueueEventsHost`].
    pub fn queue_events_host(self) -> Self {
        self.reflector
            .define_metadata(EVENTS_HOST_METADATA, events_host_caster::<T>(), Target::of::<T>());
        self
    }
}
