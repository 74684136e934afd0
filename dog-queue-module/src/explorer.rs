//! Discovery and binding of processors and event listeners.
//!
//! After the container built its static instances, [`QueueExplorer::register`]
//! walks every provider, picks out the annotated ones and gives each a
//! native handle:
//!
//! - processors get a worker running their `process` method; request-scoped
//!   processors are re-resolved for every job
//! - listeners get an event stream over their queue
//!
//! Options come from the live queue registered under the same name, else
//! from the shared configuration named by the annotation. Every handle is
//! tracked by the [`ShutdownCoordinator`] and closed at application shutdown.

use std::any::{Any, TypeId};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use dog_core::{DogContainer, DogError, Instance, InstanceWrapper, ModuleRef, Scope};
use dog_queue::{Job, JobError, Processor, QueueDriver, QueueOptions, WorkerHandle, WorkerOptions};
use futures::FutureExt;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::{debug, error, info, instrument, warn};

use crate::accessor::QueueMetadataAccessor;
use crate::annotate::UnboundHook;
use crate::error::{QueueModuleError, QueueModuleResult};
use crate::hosts::WorkerHostCaster;
use crate::metadata::OnEventMetadata;
use crate::providers::QueueRef;
use crate::shutdown::{ShutdownCoordinator, ShutdownReport, TrackedResource};
use crate::tokens::{queue_token, shared_config_token};

/// Where registration is in the application lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    Unregistered,
    Registering,
    Registered,
    /// A registration attempt returned an error.
    Failed,
    ShuttingDown,
    Closed,
}

type ReadHookMetadata = fn(&QueueMetadataAccessor, TypeId, &'static str) -> Option<OnEventMetadata>;

pub struct QueueExplorer {
    module_ref: ModuleRef,
    accessor: Arc<QueueMetadataAccessor>,
    coordinator: Arc<ShutdownCoordinator>,
    driver: Arc<dyn QueueDriver>,
    state: Mutex<RegistrationState>,
    // serializes register and shutdown
    lifecycle: tokio::sync::Mutex<()>,
}

impl QueueExplorer {
    pub fn new(
        module_ref: ModuleRef,
        accessor: Arc<QueueMetadataAccessor>,
        coordinator: Arc<ShutdownCoordinator>,
        driver: Arc<dyn QueueDriver>,
    ) -> Self {
        Self {
            module_ref,
            accessor,
            coordinator,
            driver,
            state: Mutex::new(RegistrationState::Unregistered),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    /// Current registration state.
    pub fn state(&self) -> RegistrationState {
        *self.state.lock()
    }

    pub fn coordinator(&self) -> &Arc<ShutdownCoordinator> {
        &self.coordinator
    }

    fn set_state(&self, state: RegistrationState) {
        *self.state.lock() = state;
    }

    /// Bind every annotated processor and listener.
    ///
    /// Runs once: later calls after a success return `Ok(())` without doing
    /// anything, later calls after a failure or during shutdown return
    /// [`QueueModuleError::RegistrationAborted`].
    #[instrument(skip(self))]
    pub async fn register(&self) -> QueueModuleResult<()> {
        let _guard = self.lifecycle.lock().await;
        match self.state() {
            RegistrationState::Unregistered => {}
            RegistrationState::Registered => {
                debug!("queue handlers are already registered");
                return Ok(());
            }
            RegistrationState::Failed => {
                return Err(QueueModuleError::RegistrationAborted {
                    reason: "a previous registration attempt failed".to_string(),
                })
            }
            state @ (RegistrationState::Registering | RegistrationState::ShuttingDown | RegistrationState::Closed) => {
                return Err(QueueModuleError::RegistrationAborted {
                    reason: format!("queue registration is {state:?}"),
                })
            }
        }

        self.set_state(RegistrationState::Registering);
        match self.explore().await {
            Ok(()) => {
                self.set_state(RegistrationState::Registered);
                info!(resources = self.coordinator.tracked(), "queue handlers registered");
                Ok(())
            }
            Err(err) => {
                self.set_state(RegistrationState::Failed);
                Err(err)
            }
        }
    }

    /// Close every handle created by [`register`](Self::register).
    #[instrument(skip(self))]
    pub async fn shutdown(&self) -> ShutdownReport {
        let _guard = self.lifecycle.lock().await;
        self.set_state(RegistrationState::ShuttingDown);
        let report = self.coordinator.close_all().await;
        self.set_state(RegistrationState::Closed);
        report
    }

    async fn explore(&self) -> QueueModuleResult<()> {
        let container = self.module_ref.container()?;
        for wrapper in container.components() {
            let Some(target) = self.target_of(&wrapper) else {
                if wrapper.scope() == Scope::Request {
                    debug!(
                        provider = %wrapper.token(),
                        "request-scoped value or factory provider has no instance to classify, skipping"
                    );
                }
                continue;
            };
            if self.accessor.is_processor(Some(target)) {
                self.bind_processor(&container, &wrapper, target).await?;
            }
            if self.accessor.is_queue_events_listener(Some(target)) {
                self.bind_listener(&container, &wrapper, target).await?;
            }
        }
        Ok(())
    }

    /// Type the annotations are looked up on.
    ///
    /// Class providers declare it. Value and factory providers only reveal it
    /// through their built instance, so those are classified by the
    /// instance's own type.
    fn target_of(&self, wrapper: &InstanceWrapper) -> Option<TypeId> {
        if wrapper.is_class_provider() {
            return wrapper.metatype().map(|meta| meta.id);
        }
        let instance = wrapper.instance()?;
        let any: &dyn Any = &*instance;
        Some(any.type_id())
    }

    /// `(native queue name, connection options)` for `queue_name`.
    fn resolve_options(
        &self,
        container: &DogContainer,
        queue_name: &str,
        config_key: Option<&str>,
    ) -> Option<(String, QueueOptions)> {
        let live = container
            .find(&queue_token(Some(queue_name)))
            .and_then(|wrapper| wrapper.instance())
            .and_then(|instance| instance.downcast::<QueueRef>().ok());
        if let Some(queue) = live {
            return Some((queue.name().to_string(), queue.opts().clone()));
        }

        container
            .find(&shared_config_token(config_key))
            .and_then(|wrapper| wrapper.instance())
            .and_then(|instance| instance.downcast::<QueueOptions>().ok())
            .map(|shared| (queue_name.to_string(), (*shared).clone()))
    }

    fn static_instance(&self, wrapper: &InstanceWrapper) -> QueueModuleResult<Instance> {
        wrapper.instance().ok_or_else(|| {
            DogError::invalid_lifecycle(format!("{} has no instance yet", wrapper.token()))
                .into_anyhow()
                .into()
        })
    }

    fn discover_hooks(&self, target: TypeId, read: ReadHookMetadata) -> Vec<(OnEventMetadata, UnboundHook)> {
        self.accessor.reflector().scan_from_prototype(target, |method| {
            let metadata = read(&self.accessor, target, method.name)?;
            let hook = UnboundHook::from_method(method)?;
            Some((metadata, hook))
        })
    }

    async fn bind_processor(
        &self,
        container: &DogContainer,
        wrapper: &Arc<InstanceWrapper>,
        target: TypeId,
    ) -> QueueModuleResult<()> {
        let metadata = self.accessor.processor_metadata(Some(target)).unwrap_or_default();
        let queue_name = metadata.queue_name().to_string();
        let class = self.accessor.class_name(target);

        let Some((native_name, connection)) =
            self.resolve_options(container, &queue_name, metadata.config_key.as_deref())
        else {
            error!(queue = %queue_name, processor = %class, "no queue found for processor");
            return Err(QueueModuleError::NoQueueFound { name: queue_name });
        };

        let caster = self
            .accessor
            .worker_host(Some(target))
            .ok_or_else(|| QueueModuleError::InvalidProcessorClass { class: class.clone() })?;

        let opts = connection.merge(&self.accessor.worker_options(Some(target)));
        let is_static = container.is_dependency_tree_static(wrapper);
        if metadata.scope == Some(Scope::Request) && wrapper.scope() != Scope::Request {
            warn!(processor = %class, "processor expects request scope but is registered with default scope");
        }

        if is_static {
            let instance = self.static_instance(wrapper)?;
            let host = caster(instance.clone()).ok_or_else(|| QueueModuleError::InvalidProcessorClass {
                class: class.clone(),
            })?;
            let bound = host.clone();
            let processor = Processor::inline(move |job: Job| {
                let host = bound.clone();
                async move { host.process(job).await }
            });

            let (worker, autorun) = self.paused_worker(&native_name, processor, opts).await?;
            if !host.worker_slot().set(worker.clone()) {
                warn!(processor = %class, "processor already holds a worker, keeping the first one");
            }
            for (hook, method) in self.discover_hooks(target, QueueMetadataAccessor::on_worker_event_metadata) {
                worker.on(&hook.event, method.bind(instance.clone(), hook.job_name));
            }
            if autorun {
                worker.run()?;
            }
            debug!(processor = %class, queue = %native_name, "bound static processor");
        } else {
            if !self
                .discover_hooks(target, QueueMetadataAccessor::on_worker_event_metadata)
                .is_empty()
            {
                warn!(
                    processor = %class,
                    "event hooks on request-scoped processors are not supported and were skipped"
                );
            }
            let slot = Arc::new(OnceCell::new());
            let processor = request_scoped_processor(
                self.module_ref.clone(),
                wrapper.clone(),
                caster,
                slot.clone(),
                class.clone(),
            );

            let (worker, autorun) = self.paused_worker(&native_name, processor, opts).await?;
            let _ = slot.set(worker.clone());
            if autorun {
                worker.run()?;
            }
            debug!(processor = %class, queue = %native_name, "bound request-scoped processor");
        }
        Ok(())
    }

    /// Worker that does not consume until `run()`, so its slot and hooks are
    /// in place before the first job. Tracked right away. The flag tells
    /// whether the caller asked for it to start on its own.
    async fn paused_worker(
        &self,
        queue: &str,
        processor: Processor,
        opts: WorkerOptions,
    ) -> QueueModuleResult<(Arc<dyn WorkerHandle>, bool)> {
        let autorun = opts.autorun();
        let worker = self.driver.worker(queue, processor, opts.with("autorun", false)).await?;
        self.coordinator.track(TrackedResource::Worker(worker.clone()));
        Ok((worker, autorun))
    }

    async fn bind_listener(
        &self,
        container: &DogContainer,
        wrapper: &Arc<InstanceWrapper>,
        target: TypeId,
    ) -> QueueModuleResult<()> {
        let Some(metadata) = self.accessor.queue_events_listener_metadata(Some(target)) else {
            return Ok(());
        };
        let class = self.accessor.class_name(target);

        if !container.is_dependency_tree_static(wrapper) {
            warn!(
                listener = %class,
                queue = %metadata.queue_name,
                "request-scoped event listeners are not supported, skipping"
            );
            return Ok(());
        }

        let Some((native_name, connection)) =
            self.resolve_options(container, &metadata.queue_name, metadata.config_key.as_deref())
        else {
            error!(queue = %metadata.queue_name, listener = %class, "no queue found for event listener");
            return Err(QueueModuleError::NoEventStreamFound {
                name: metadata.queue_name,
            });
        };

        let invalid = || QueueModuleError::InvalidListenerClass { class: class.clone() };
        let caster = self.accessor.queue_events_host(Some(target)).ok_or_else(invalid)?;
        let instance = self.static_instance(wrapper)?;
        let host = caster(instance.clone()).ok_or_else(invalid)?;

        let events = self
            .driver
            .events(&native_name, connection.merge(&metadata.options))
            .await?;
        if !host.events_slot().set(events.clone()) {
            warn!(listener = %class, "listener already holds an event stream, keeping the first one");
        }
        self.coordinator.track(TrackedResource::Events(events.clone()));

        for (hook, method) in self.discover_hooks(target, QueueMetadataAccessor::on_queue_event_metadata) {
            events.on(&hook.event, method.bind(instance.clone(), hook.job_name));
        }
        debug!(listener = %class, queue = %native_name, "bound event listener");
        Ok(())
    }
}

/// Worker callback resolving a fresh processor for each job.
///
/// The job is the request of its context: the context id is derived from
/// `{queue}:{job id}`, so durable dependencies follow the installed context
/// strategy while everything else is built per job and dropped afterwards.
fn request_scoped_processor(
    module_ref: ModuleRef,
    wrapper: Arc<InstanceWrapper>,
    caster: WorkerHostCaster,
    worker: Arc<OnceCell<Arc<dyn WorkerHandle>>>,
    class: String,
) -> Processor {
    Processor::inline(move |job: Job| {
        let module_ref = module_ref.clone();
        let wrapper = wrapper.clone();
        let caster = caster.clone();
        let worker = worker.clone();
        let class = class.clone();
        async move {
            let container = module_ref
                .container()
                .map_err(|err| JobError::permanent(format!("{err:#}")))?;

            let key = format!("{}:{}", job.queue, job.id);
            let request: Instance = Arc::new(job.clone());
            let context_id = container.context_ids().get_by_request(&key, &request);
            container.register_request_by_context_id(request, context_id);

            let handled = async {
                let instance = container
                    .resolve_per_context(&wrapper, context_id)
                    .await
                    .map_err(|err| JobError::permanent(format!("{err:#}")))?;
                let host = caster(instance)
                    .ok_or_else(|| JobError::permanent(format!("{class} does not implement WorkerHost")))?;
                if let Some(worker) = worker.get() {
                    let _ = host.worker_slot().set(worker.clone());
                }
                host.process(job).await
            };
            let result = AssertUnwindSafe(handled)
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(JobError::permanent(panic_message(panic.as_ref()))));

            container.release_context(context_id);
            container.context_ids().release(&key);
            result
        }
    })
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        format!("processor panicked: {msg}")
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        format!("processor panicked: {msg}")
    } else {
        "processor panicked".to_string()
    }
}
