//! # dog-queue-module: queues for DogRS applications
//!
//! Wires [`dog_queue`] into a [`dog_core::DogApp`]:
//!
//! - [`QueueModule`] builds module fragments that register shared queue
//!   configuration and queues (`Queue_{name}` / `QueueOptions_{name}`)
//! - [`Annotate`] marks types as processors or event listeners and declares
//!   event hooks on their methods
//! - at module init the [`QueueRegistrar`] runs the [`QueueExplorer`], which
//!   finds those types in the container and binds them to workers and event
//!   streams
//! - at shutdown the [`ShutdownCoordinator`] closes every handle it created
//!
//! Processors registered with request scope are resolved again for every
//! job, with the job as the request of the resolution context.

pub mod accessor;
pub mod annotate;
pub mod conditional;
pub mod error;
pub mod explorer;
pub mod hosts;
pub mod metadata;
pub mod module;
pub mod providers;
pub mod registrar;
pub mod registration;
pub mod shutdown;
pub mod tokens;

pub use accessor::QueueMetadataAccessor;
pub use annotate::Annotate;
pub use conditional::ConditionalDependency;
pub use error::{QueueModuleError, QueueModuleResult};
pub use explorer::{QueueExplorer, RegistrationState};
pub use hosts::{EventsHostCaster, HostedQueueEvents, HostedWorker, QueueEventsHost, WorkerHost, WorkerHostCaster};
pub use metadata::{
    OnEventMetadata, OnQueueEventMetadata, OnWorkerEventMetadata, ProcessorMetadata, QueueEventsListenerMetadata,
};
pub use module::{get_queue, QueueModule};
pub use providers::{
    create_async_queue_option_providers, create_async_queue_providers, create_async_shared_config_providers,
    create_queue_option_providers, create_queue_providers, create_shared_config_providers, QueueRef,
};
pub use registrar::QueueRegistrar;
pub use registration::{
    OptionsFactory, ProcessorBinding, QueueAsyncRegistration, QueueExtraOptions, QueueModuleConfig,
    QueueRegistration, SharedConfigAsyncRegistration,
};
pub use shutdown::{ShutdownCoordinator, ShutdownReport, TrackedResource};
pub use tokens::{
    conditional_dependency_token, queue_options_token, queue_token, shared_config_token, DEFAULT_CONFIG_KEY,
    DEFAULT_QUEUE_NAME,
};

pub mod prelude {
    pub use crate::{
        get_queue, Annotate, HostedQueueEvents, HostedWorker, OnEventMetadata, ProcessorBinding, ProcessorMetadata,
        QueueAsyncRegistration, QueueEventsHost, QueueEventsListenerMetadata, QueueExtraOptions, QueueModule,
        QueueModuleConfig, QueueModuleError, QueueRef, QueueRegistrar, QueueRegistration, WorkerHost,
    };
    pub use dog_queue::{
        EventsHandle, Job, JobError, JobOptions, QueueEvent, QueueHandle, QueueOptions, WorkerHandle, WorkerOptions,
    };

    pub use async_trait::async_trait;
}
