use std::collections::BTreeSet;
use std::sync::Arc;

use dog_core::{Dependency, Deps, DogApp, DogModule, FactoryContext, Instance, Provider, Token};
use dog_queue::QueueOptions;
use tracing::{debug, warn};

use crate::accessor::QueueMetadataAccessor;
use crate::conditional::ConditionalDependency;
use crate::error::{QueueModuleError, QueueModuleResult};
use crate::explorer::QueueExplorer;
use crate::providers::{
    create_async_queue_option_providers, create_async_queue_providers, create_async_shared_config_providers,
    create_queue_option_providers, create_queue_providers, create_shared_config_providers, QueueRef,
};
use crate::registrar::QueueRegistrar;
use crate::registration::{QueueAsyncRegistration, QueueModuleConfig, QueueRegistration, SharedConfigAsyncRegistration};
use crate::shutdown::ShutdownCoordinator;
use crate::tokens::{queue_options_token, queue_token, shared_config_token, DEFAULT_CONFIG_KEY};

const CORE_MODULE: &str = "QueueCoreModule";
const FRAGMENT: &str = "QueueModule";

/// Builds the module fragments that register shared configurations and
/// queues.
///
/// Every fragment imports the global queue core module (accessor, explorer,
/// registrar and shutdown coordinator). The core module is registered once
/// per application; the first `QueueModule` imported provides its driver
/// and extra options.
///
/// ```rust
/// use dog_core::DogApp;
/// use dog_queue_module::prelude::*;
/// use serde_json::json;
///
/// # tokio_test::block_on(async {
/// let queues = QueueModule::memory();
/// let app = DogApp::new();
/// app.import(queues.for_root(QueueOptions::new().with("prefix", "app")))?;
/// app.import(queues.register_queue([QueueRegistration::new("mail").processor(
///     ProcessorBinding::callback(|job: Job| async move { Ok(job.data) }),
/// )]))?;
/// app.init().await?;
///
/// let mail = get_queue(&app, Some("mail"))?;
/// mail.add("welcome", json!({"to": "ada@example.com"}), JobOptions::default()).await?;
/// app.close().await?;
/// # Ok::<(), anyhow::Error>(())
/// # });
/// ```
#[derive(Clone, Debug)]
pub struct QueueModule {
    config: QueueModuleConfig,
}

impl QueueModule {
    pub fn new(config: QueueModuleConfig) -> Self {
        Self { config }
    }

    pub fn memory() -> Self {
        Self::new(QueueModuleConfig::memory())
    }

    pub fn config(&self) -> &QueueModuleConfig {
        &self.config
    }

    /// Default shared configuration.
    pub fn for_root(&self, options: QueueOptions) -> DogModule {
        self.for_root_config(DEFAULT_CONFIG_KEY, options)
    }

    /// Shared configuration under `config_key`, for registrations naming it.
    pub fn for_root_config(&self, config_key: &str, options: QueueOptions) -> DogModule {
        self.fragment()
            .global()
            .providers(create_shared_config_providers(Some(config_key), options))
            .export(shared_config_token(Some(config_key)))
    }

    pub fn for_root_async(&self, registration: SharedConfigAsyncRegistration) -> DogModule {
        self.fragment()
            .global()
            .providers(create_async_shared_config_providers(&registration))
            .export(shared_config_token(registration.config_key.as_deref()))
    }

    /// Queues with their options and static processors. Exports
    /// `Queue_{name}` and `QueueOptions_{name}` for every registration.
    pub fn register_queue(&self, registrations: impl IntoIterator<Item = QueueRegistration>) -> DogModule {
        let registrations: Vec<QueueRegistration> = registrations.into_iter().collect();
        let names: Vec<String> = registrations.iter().map(|r| r.name().to_string()).collect();
        let module = self
            .fragment()
            .providers(conditional_providers(
                registrations.iter().map(|r| r.config_key.as_deref()),
            ))
            .providers(create_queue_option_providers(&registrations))
            .providers(create_queue_providers(&registrations, &self.config));
        export_queues(module, &names)
    }

    pub fn register_queue_async(
        &self,
        registrations: impl IntoIterator<Item = QueueAsyncRegistration>,
    ) -> DogModule {
        let registrations: Vec<QueueAsyncRegistration> = registrations.into_iter().collect();
        let names: Vec<String> = registrations.iter().map(|r| r.name().to_string()).collect();
        let module = self
            .fragment()
            .providers(conditional_providers(
                registrations.iter().map(|r| r.config_key.as_deref()),
            ))
            .providers(create_async_queue_option_providers(&registrations))
            .providers(create_async_queue_providers(&registrations, &self.config));
        export_queues(module, &names)
    }

    fn fragment(&self) -> DogModule {
        DogModule::dynamic(FRAGMENT).import(self.core_module())
    }

    fn core_module(&self) -> DogModule {
        let driver = self.config.driver.clone();
        let extra = self.config.extra.clone();

        DogModule::new(CORE_MODULE)
            .global()
            .provider(Provider::factory_with_context(
                Token::of::<QueueMetadataAccessor>(),
                vec![],
                |_deps: Deps, ctx: FactoryContext| async move {
                    let reflector = ctx.module_ref().container()?.reflector().clone();
                    Ok(Arc::new(QueueMetadataAccessor::new(reflector)) as Instance)
                },
            ))
            .provider(Provider::class(vec![], |_deps: Deps| async {
                Ok(ShutdownCoordinator::new())
            }))
            .provider(Provider::factory_with_context(
                Token::of::<QueueExplorer>(),
                vec![
                    Dependency::required(Token::of::<QueueMetadataAccessor>()),
                    Dependency::required(Token::of::<ShutdownCoordinator>()),
                ],
                move |deps: Deps, ctx: FactoryContext| {
                    let driver = driver.clone();
                    async move {
                        let accessor = deps.get::<QueueMetadataAccessor>(0)?;
                        let coordinator = deps.get::<ShutdownCoordinator>(1)?;
                        let explorer = Arc::new(QueueExplorer::new(
                            ctx.module_ref().clone(),
                            accessor,
                            coordinator,
                            driver,
                        ));

                        let hook = explorer.clone();
                        ctx.on_application_shutdown(move || {
                            let explorer = hook.clone();
                            async move {
                                let report = explorer.shutdown().await;
                                if !report.is_clean() {
                                    warn!(failed = report.failures.len(), "some queue resources failed to close");
                                }
                                Ok(())
                            }
                        });
                        Ok(explorer as Instance)
                    }
                },
            ))
            .provider(Provider::factory_with_context(
                Token::of::<QueueRegistrar>(),
                vec![Dependency::required(Token::of::<QueueExplorer>())],
                move |deps: Deps, ctx: FactoryContext| {
                    let extra = extra.clone();
                    async move {
                        let explorer = deps.get::<QueueExplorer>(0)?;
                        let registrar = Arc::new(QueueRegistrar::new(explorer, extra));

                        let hook = registrar.clone();
                        ctx.on_module_init(move || {
                            let registrar = hook.clone();
                            async move { registrar.on_module_init().await.map_err(anyhow::Error::from) }
                        });
                        Ok(registrar as Instance)
                    }
                },
            ))
            .exports([
                Token::of::<QueueMetadataAccessor>(),
                Token::of::<ShutdownCoordinator>(),
                Token::of::<QueueExplorer>(),
                Token::of::<QueueRegistrar>(),
            ])
    }
}

/// One conditional dependency provider per distinct config key.
fn conditional_providers<'a>(keys: impl Iterator<Item = Option<&'a str>>) -> Vec<Provider> {
    let keys: BTreeSet<&str> = keys.map(|key| key.unwrap_or(DEFAULT_CONFIG_KEY)).collect();
    keys.into_iter()
        .map(|key| ConditionalDependency::provider(Some(key)))
        .collect()
}

fn export_queues(module: DogModule, names: &[String]) -> DogModule {
    debug!(queues = ?names, "queue module fragment built");
    module
        .exports(names.iter().map(|name| queue_token(Some(name))))
        .exports(names.iter().map(|name| queue_options_token(name)))
}

/// The queue registered as `name` (`"default"` when `None`).
pub fn get_queue(app: &DogApp, name: Option<&str>) -> QueueModuleResult<QueueRef> {
    let queue = app
        .get_instance::<QueueRef>(queue_token(name))
        .map_err(QueueModuleError::from_container)?;
    Ok(queue.as_ref().clone())
}
