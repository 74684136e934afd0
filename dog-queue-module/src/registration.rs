//! Declarative registration records handed to [`QueueModule`].
//!
//! [`QueueModule`]: crate::QueueModule

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use dog_core::{Dependency, Deps, DogConfigSnapshot};
use dog_queue::{Job, JobError, MemoryDriver, ProcessFn, Processor, QueueDriver, QueueOptions, WorkerOptions};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Deserialize;
use serde_json::Value;

use crate::tokens::DEFAULT_QUEUE_NAME;

/// Async producer of queue options from injected dependencies.
pub type OptionsFactory = Arc<dyn Fn(Deps) -> BoxFuture<'static, anyhow::Result<QueueOptions>> + Send + Sync>;

fn options_factory<F, Fut>(factory: F) -> OptionsFactory
where
    F: Fn(Deps) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<QueueOptions>> + Send + 'static,
{
    Arc::new(move |deps| factory(deps).boxed())
}

/// A processor declared together with its queue instead of as a component.
#[derive(Clone)]
pub enum ProcessorBinding {
    Callback(ProcessFn),
    CallbackWithOptions(ProcessFn, WorkerOptions),
    /// Executable run once per job, see [`Processor::Sandboxed`].
    Script(PathBuf),
    ScriptWithOptions(PathBuf, WorkerOptions),
}

impl ProcessorBinding {
    pub fn callback<F, Fut>(f: F) -> Self
    where
        F: Fn(Job) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, JobError>> + Send + 'static,
    {
        Self::Callback(Arc::new(move |job| f(job).boxed()))
    }

    /// Callback with worker tuning such as `concurrency` and `autorun`.
    pub fn callback_with_options<F, Fut>(options: WorkerOptions, f: F) -> Self
    where
        F: Fn(Job) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, JobError>> + Send + 'static,
    {
        Self::CallbackWithOptions(Arc::new(move |job| f(job).boxed()), options)
    }

    pub fn script(path: impl Into<PathBuf>) -> Self {
        Self::Script(path.into())
    }

    pub fn script_with_options(path: impl Into<PathBuf>, options: WorkerOptions) -> Self {
        Self::ScriptWithOptions(path.into(), options)
    }

    pub fn processor(&self) -> Processor {
        match self {
            Self::Callback(f) | Self::CallbackWithOptions(f, _) => Processor::Inline(f.clone()),
            Self::Script(path) | Self::ScriptWithOptions(path, _) => Processor::Sandboxed(path.clone()),
        }
    }

    /// Declared tuning, empty for the bare shapes.
    pub fn worker_options(&self) -> WorkerOptions {
        match self {
            Self::CallbackWithOptions(_, opts) | Self::ScriptWithOptions(_, opts) => opts.clone(),
            Self::Callback(_) | Self::Script(_) => WorkerOptions::new(),
        }
    }
}

impl fmt::Debug for ProcessorBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Callback(_) => f.write_str("Callback"),
            Self::CallbackWithOptions(_, opts) => f.debug_tuple("CallbackWithOptions").field(opts).finish(),
            Self::Script(path) => f.debug_tuple("Script").field(path).finish(),
            Self::ScriptWithOptions(path, opts) => f.debug_tuple("ScriptWithOptions").field(path).field(opts).finish(),
        }
    }
}

/// One queue to register.
#[derive(Debug, Clone, Default)]
pub struct QueueRegistration {
    pub name: Option<String>,
    /// Shared configuration merged under `options`.
    pub config_key: Option<String>,
    pub options: QueueOptions,
    pub processors: Vec<ProcessorBinding>,
}

impl QueueRegistration {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(DEFAULT_QUEUE_NAME)
    }

    pub fn with_config_key(mut self, key: impl Into<String>) -> Self {
        self.config_key = Some(key.into());
        self
    }

    pub fn with_options(mut self, options: QueueOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.set(key, value);
        self
    }

    pub fn processor(mut self, binding: ProcessorBinding) -> Self {
        self.processors.push(binding);
        self
    }
}

/// A queue whose options come from a factory.
#[derive(Clone)]
pub struct QueueAsyncRegistration {
    pub name: Option<String>,
    pub config_key: Option<String>,
    /// Handed to the factory in order.
    pub inject: Vec<Dependency>,
    pub factory: OptionsFactory,
    pub processors: Vec<ProcessorBinding>,
}

impl QueueAsyncRegistration {
    pub fn new<F, Fut>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(Deps) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<QueueOptions>> + Send + 'static,
    {
        Self {
            name: Some(name.into()),
            config_key: None,
            inject: Vec::new(),
            factory: options_factory(factory),
            processors: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(DEFAULT_QUEUE_NAME)
    }

    pub fn with_config_key(mut self, key: impl Into<String>) -> Self {
        self.config_key = Some(key.into());
        self
    }

    pub fn inject(mut self, dependency: impl Into<Dependency>) -> Self {
        self.inject.push(dependency.into());
        self
    }

    pub fn processor(mut self, binding: ProcessorBinding) -> Self {
        self.processors.push(binding);
        self
    }
}

impl fmt::Debug for QueueAsyncRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueAsyncRegistration")
            .field("name", &self.name)
            .field("config_key", &self.config_key)
            .field("inject", &self.inject)
            .field("processors", &self.processors)
            .finish()
    }
}

/// Shared configuration produced by a factory (`for_root_async`).
#[derive(Clone)]
pub struct SharedConfigAsyncRegistration {
    pub config_key: Option<String>,
    pub inject: Vec<Dependency>,
    pub factory: OptionsFactory,
}

impl SharedConfigAsyncRegistration {
    pub fn new<F, Fut>(factory: F) -> Self
    where
        F: Fn(Deps) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<QueueOptions>> + Send + 'static,
    {
        Self {
            config_key: None,
            inject: Vec::new(),
            factory: options_factory(factory),
        }
    }

    pub fn with_config_key(mut self, key: impl Into<String>) -> Self {
        self.config_key = Some(key.into());
        self
    }

    pub fn inject(mut self, dependency: impl Into<Dependency>) -> Self {
        self.inject.push(dependency.into());
        self
    }
}

/// Behaviour switches of the integration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct QueueExtraOptions {
    /// Leave `QueueRegistrar::register()` to the caller instead of the
    /// module-init hook.
    pub manual_registration: bool,
}

impl QueueExtraOptions {
    pub fn manual() -> Self {
        Self {
            manual_registration: true,
        }
    }

    /// Read `queue.manual_registration` from the application configuration.
    pub fn from_config(config: &DogConfigSnapshot) -> Self {
        Self {
            manual_registration: config.get_bool("queue.manual_registration").unwrap_or(false),
        }
    }
}

/// Queue backend and switches shared by every fragment of one `QueueModule`.
#[derive(Clone)]
pub struct QueueModuleConfig {
    pub driver: Arc<dyn QueueDriver>,
    pub extra: QueueExtraOptions,
}

impl QueueModuleConfig {
    pub fn new(driver: Arc<dyn QueueDriver>) -> Self {
        Self {
            driver,
            extra: QueueExtraOptions::default(),
        }
    }

    /// In-process queues, mostly for tests and single-node deployments.
    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryDriver::new()))
    }

    pub fn with_extra(mut self, extra: QueueExtraOptions) -> Self {
        self.extra = extra;
        self
    }
}

impl fmt::Debug for QueueModuleConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueModuleConfig").field("extra", &self.extra).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dog_core::DogConfig;

    #[test]
    fn unnamed_registration_uses_the_default_queue() {
        assert_eq!(QueueRegistration::default().name(), "default");
        assert_eq!(QueueRegistration::new("mail").name(), "mail");
    }

    #[test]
    fn binding_shapes_map_to_processors() {
        let tuned = WorkerOptions::new().with("concurrency", 3).with("autorun", false);
        let bindings = [
            ProcessorBinding::callback(|job: Job| async move { Ok(job.data) }),
            ProcessorBinding::callback_with_options(tuned.clone(), |job: Job| async move { Ok(job.data) }),
            ProcessorBinding::script("/usr/bin/worker"),
            ProcessorBinding::script_with_options("/usr/bin/worker", tuned.clone()),
        ];

        assert!(matches!(bindings[0].processor(), Processor::Inline(_)));
        assert!(bindings[0].worker_options().is_empty());
        assert_eq!(bindings[1].worker_options().concurrency(), 3);
        assert!(matches!(bindings[2].processor(), Processor::Sandboxed(_)));
        assert_eq!(bindings[3].worker_options(), tuned);
    }

    #[test]
    fn extra_options_come_from_config() {
        let mut config = DogConfig::new();
        assert!(!QueueExtraOptions::from_config(&config.snapshot()).manual_registration);
        config.set("queue.manual_registration", "true");
        assert_eq!(QueueExtraOptions::from_config(&config.snapshot()), QueueExtraOptions::manual());
    }

    #[test]
    fn extra_options_deserialize_with_defaults() {
        let extra: QueueExtraOptions = serde_json::from_str("{}").unwrap();
        assert!(!extra.manual_registration);
    }
}
