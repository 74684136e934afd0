//! Provider plans for registered queues.
//!
//! Per registration `register_queue` contributes an options provider
//! (`QueueOptions_{name}`) and a queue provider (`Queue_{name}`). The
//! options provider merges the shared configuration under the registration's
//! own options; the queue provider builds the queue through the configured
//! driver, starts its static processors and closes all of them on shutdown.

use std::sync::Arc;

use dog_core::{Dependency, Deps, FactoryContext, Instance, Provider};
use dog_queue::{QueueDriver, QueueHandle, QueueOptions, QueueResult, WorkerHandle};
use futures::future::join_all;
use tracing::{debug, error};

use crate::conditional::ConditionalDependency;
use crate::registration::{
    ProcessorBinding, QueueAsyncRegistration, QueueModuleConfig, QueueRegistration, SharedConfigAsyncRegistration,
};
use crate::tokens::{conditional_dependency_token, queue_options_token, queue_token, shared_config_token};

/// Queue handle as injected under `Queue_{name}`.
pub type QueueRef = Arc<dyn QueueHandle>;

/// `shared` overlaid with the registration's own options.
fn merge_shared(shared: Option<Arc<QueueOptions>>, own: &QueueOptions) -> QueueOptions {
    match shared {
        Some(shared) => shared.merge(own),
        None => own.clone(),
    }
}

pub fn create_queue_option_providers(registrations: &[QueueRegistration]) -> Vec<Provider> {
    registrations
        .iter()
        .map(|registration| {
            let name = registration.name().to_string();
            let own = registration.options.clone();
            Provider::factory(
                queue_options_token(&name),
                vec![Dependency::required(conditional_dependency_token(
                    registration.config_key.as_deref(),
                ))],
                move |deps: Deps| {
                    let name = name.clone();
                    let own = own.clone();
                    async move {
                        let conditional = deps.get::<ConditionalDependency>(0)?;
                        let shared = conditional.get_dependency_ref(&name)?;
                        Ok(merge_shared(shared, &own))
                    }
                },
            )
        })
        .collect()
}

/// Options providers backed by a factory. The factory sees the
/// registration's `inject` list; the conditional dependency rides last.
pub fn create_async_queue_option_providers(registrations: &[QueueAsyncRegistration]) -> Vec<Provider> {
    registrations
        .iter()
        .map(|registration| {
            let name = registration.name().to_string();
            let factory = registration.factory.clone();
            let mut inject = registration.inject.clone();
            inject.push(Dependency::required(conditional_dependency_token(
                registration.config_key.as_deref(),
            )));
            Provider::factory(queue_options_token(&name), inject, move |deps: Deps| {
                let name = name.clone();
                let factory = factory.clone();
                async move {
                    let conditional = deps.get::<ConditionalDependency>(deps.len() - 1)?;
                    let shared = conditional.get_dependency_ref(&name)?;
                    let own = factory(deps).await?;
                    Ok(merge_shared(shared, &own))
                }
            })
        })
        .collect()
}

/// Shared configuration under `Config({key})`.
pub fn create_shared_config_providers(config_key: Option<&str>, options: QueueOptions) -> Vec<Provider> {
    vec![Provider::value(shared_config_token(config_key), options)]
}

pub fn create_async_shared_config_providers(registration: &SharedConfigAsyncRegistration) -> Vec<Provider> {
    let factory = registration.factory.clone();
    vec![Provider::factory(
        shared_config_token(registration.config_key.as_deref()),
        registration.inject.clone(),
        move |deps: Deps| {
            let factory = factory.clone();
            async move { factory(deps).await }
        },
    )]
}

pub fn create_queue_providers(registrations: &[QueueRegistration], config: &QueueModuleConfig) -> Vec<Provider> {
    registrations
        .iter()
        .map(|r| queue_provider(r.name().to_string(), r.processors.clone(), config.driver.clone()))
        .collect()
}

pub fn create_async_queue_providers(
    registrations: &[QueueAsyncRegistration],
    config: &QueueModuleConfig,
) -> Vec<Provider> {
    registrations
        .iter()
        .map(|r| queue_provider(r.name().to_string(), r.processors.clone(), config.driver.clone()))
        .collect()
}

fn queue_provider(name: String, processors: Vec<ProcessorBinding>, driver: Arc<dyn QueueDriver>) -> Provider {
    Provider::factory_with_context(
        queue_token(Some(&name)),
        vec![Dependency::required(queue_options_token(&name))],
        move |deps: Deps, ctx: FactoryContext| {
            let name = name.clone();
            let processors = processors.clone();
            let driver = driver.clone();
            async move {
                let opts = deps.get::<QueueOptions>(0)?;
                // a name supplied through the options wins
                let native_name = opts.name().unwrap_or(&name).to_string();
                let queue = driver.queue(&native_name, (*opts).clone()).await?;

                let mut workers: Vec<Arc<dyn WorkerHandle>> = Vec::with_capacity(processors.len());
                for binding in &processors {
                    let worker_opts = opts.merge(&binding.worker_options());
                    match driver.worker(&native_name, binding.processor(), worker_opts).await {
                        Ok(worker) => workers.push(worker),
                        Err(err) => {
                            // no shutdown hook exists yet, release what was built
                            if let Err(close_err) = close_queue(&queue, &workers).await {
                                error!(queue = %native_name, error = %close_err, "failed to close queue");
                            }
                            return Err(anyhow::Error::from(err));
                        }
                    }
                }
                debug!(queue = %native_name, processors = workers.len(), "queue constructed");

                let hook_queue = queue.clone();
                ctx.on_application_shutdown(move || {
                    let queue = hook_queue.clone();
                    let workers = workers.clone();
                    async move {
                        close_queue(&queue, &workers).await?;
                        Ok(())
                    }
                });

                Ok(Arc::new(queue) as Instance)
            }
        },
    )
}

/// Close `workers` concurrently, then `queue`. Worker failures are logged.
async fn close_queue(queue: &Arc<dyn QueueHandle>, workers: &[Arc<dyn WorkerHandle>]) -> QueueResult<()> {
    let results = join_all(workers.iter().map(|worker| worker.close())).await;
    for (worker, result) in workers.iter().zip(results) {
        if let Err(err) = result {
            error!(queue = %worker.name(), error = %err, "failed to close worker");
        }
    }
    queue.close().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use dog_core::{DogContainer, DogModule, Reflector};
    use serde_json::json;

    fn shared_module(options: Option<QueueOptions>) -> DogModule {
        let mut module = DogModule::new("Shared").global();
        if let Some(options) = options {
            module = module
                .providers(create_shared_config_providers(None, options))
                .export(shared_config_token(None));
        }
        module
    }

    async fn resolved_options(registration: QueueRegistration, shared: Option<QueueOptions>) -> QueueOptions {
        let container = DogContainer::new(Reflector::new());
        container.add_module(shared_module(shared));
        let name = registration.name().to_string();
        container.add_module(
            DogModule::new("Queues")
                .provider(ConditionalDependency::provider(registration.config_key.as_deref()))
                .providers(create_queue_option_providers(&[registration])),
        );
        container.instantiate().await.unwrap();
        (*container.get::<QueueOptions>(queue_options_token(&name)).unwrap()).clone()
    }

    #[tokio::test]
    async fn registration_options_override_shared_ones() {
        let shared = QueueOptions::new().with("a", 1).with("b", 2);
        let registration = QueueRegistration::new("mail").with_option("b", 3).with_option("c", 4);
        let merged = resolved_options(registration, Some(shared)).await;
        assert_eq!(serde_json::to_value(&merged).unwrap(), json!({"a": 1, "b": 3, "c": 4}));
    }

    #[tokio::test]
    async fn absent_default_config_keeps_own_options() {
        let registration = QueueRegistration::new("mail").with_option("prefix", "own");
        let merged = resolved_options(registration, None).await;
        assert_eq!(merged.prefix(), "own");
        assert_eq!(merged.len(), 1);
    }

    #[tokio::test]
    async fn async_options_see_injected_dependencies() {
        let container = DogContainer::new(Reflector::new());
        container.add_module(shared_module(Some(QueueOptions::new().with("prefix", "shared"))));
        let registration = QueueAsyncRegistration::new("mail", |deps: Deps| async move {
            let concurrency = deps.get::<u64>(0)?;
            Ok(QueueOptions::new().with("concurrency", *concurrency).with("name", "mail-v2"))
        })
        .inject("CONCURRENCY");
        container.add_module(
            DogModule::new("Queues")
                .provider(Provider::value("CONCURRENCY", 8u64))
                .provider(ConditionalDependency::provider(None))
                .providers(create_async_queue_option_providers(&[registration])),
        );
        container.instantiate().await.unwrap();

        let opts = container.get::<QueueOptions>(queue_options_token("mail")).unwrap();
        assert_eq!(opts.concurrency(), 8);
        assert_eq!(opts.prefix(), "shared");
        assert_eq!(opts.name(), Some("mail-v2"));
    }
}
