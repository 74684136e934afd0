use std::any::Any;
use std::sync::Arc;

use anyhow::Result;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, instrument};

use crate::config::{DogConfig, DogConfigSnapshot};
use crate::container::{DogContainer, LifecycleEvent};
use crate::context::ContextIdStrategy;
use crate::errors::DogError;
use crate::module::DogModule;
use crate::provider::Token;
use crate::reflector::Reflector;

/// Where the application is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    Created,
    Initializing,
    Ready,
    /// `init()` failed; `close()` is still allowed.
    Failed,
    Closing,
    Closed,
}

struct DogAppInner {
    container: DogContainer,
    config: RwLock<DogConfig>,
    state: Mutex<AppState>,
    // serializes init and close
    lifecycle: tokio::sync::Mutex<()>,
}

/// DogApp is the central application object for DogRS.
///
/// Holds the module graph and container, the configuration store, and runs
/// the lifecycle: `init()` builds every static instance and runs the
/// module-init then bootstrap hooks. `close()` runs shutdown hooks.
#[derive(Clone)]
pub struct DogApp {
    inner: Arc<DogAppInner>,
}

impl Default for DogApp {
    fn default() -> Self {
        Self::new()
    }
}

impl DogApp {
    pub fn new() -> Self {
        Self::with_reflector(Reflector::new())
    }

    /// Use a reflector that annotations were already recorded into.
    pub fn with_reflector(reflector: Reflector) -> Self {
        Self {
            inner: Arc::new(DogAppInner {
                container: DogContainer::new(reflector),
                config: RwLock::new(DogConfig::new()),
                state: Mutex::new(AppState::Created),
                lifecycle: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn reflector(&self) -> &Reflector {
        self.inner.container.reflector()
    }

    pub fn container(&self) -> &DogContainer {
        &self.inner.container
    }

    pub fn state(&self) -> AppState {
        *self.inner.state.lock()
    }

    /// Add a module (and its imports) to the application graph.
    pub fn import(&self, module: DogModule) -> Result<&Self> {
        let state = self.state();
        if state != AppState::Created {
            return Err(DogError::invalid_lifecycle(format!(
                "modules must be imported before init (application is {state:?})"
            ))
            .into_anyhow());
        }
        self.inner.container.add_module(module);
        Ok(self)
    }

    pub fn set<K, V>(&self, key: K, value: V)
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.inner.config.write().set(key, value);
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.config.read().get(key).map(|s| s.to_string())
    }

    /// Load `{prefix}__A__B` environment variables as `a.b`.
    pub fn load_env(&self, prefix: &str) -> usize {
        self.inner.config.write().load_env(prefix)
    }

    pub fn config_snapshot(&self) -> DogConfigSnapshot {
        self.inner.config.read().snapshot()
    }

    /// Install the strategy that links per-call contexts to durable ones.
    pub fn use_context_strategy(&self, strategy: Arc<dyn ContextIdStrategy>) {
        self.inner.container.context_ids().apply(strategy);
    }

    /// Static instance registered under `token`.
    pub fn get_instance<T: Any + Send + Sync>(&self, token: impl Into<Token>) -> Result<Arc<T>> {
        self.inner.container.get::<T>(token)
    }

    /// Static instance of class provider `T`.
    pub fn resolve<T: Any + Send + Sync>(&self) -> Result<Arc<T>> {
        self.inner.container.get::<T>(Token::of::<T>())
    }

    #[instrument(skip(self))]
    pub async fn init(&self) -> Result<()> {
        let _guard = self.inner.lifecycle.lock().await;
        {
            let mut state = self.inner.state.lock();
            if *state != AppState::Created {
                return Err(DogError::invalid_lifecycle(format!(
                    "init() called on an application that is {:?}",
                    *state
                ))
                .into_anyhow());
            }
            *state = AppState::Initializing;
        }

        match self.run_init().await {
            Ok(()) => {
                *self.inner.state.lock() = AppState::Ready;
                info!(providers = self.inner.container.components().len(), "application initialized");
                Ok(())
            }
            Err(err) => {
                *self.inner.state.lock() = AppState::Failed;
                error!(error = %format!("{err:#}"), "application failed to initialize");
                Err(err)
            }
        }
    }

    async fn run_init(&self) -> Result<()> {
        self.inner.container.instantiate().await?;

        for event in [LifecycleEvent::ModuleInit, LifecycleEvent::ApplicationBootstrap] {
            for (owner, hook) in self.inner.container.lifecycle_hooks(event) {
                debug!(%owner, ?event, "running lifecycle hook");
                hook().await.map_err(|e| e.context(format!("{event:?} hook of {owner} failed")))?;
            }
        }
        Ok(())
    }

    /// Run shutdown hooks, last registered first.
    ///
    /// A failing hook is logged and the remaining hooks still run. Calling
    /// `close()` again after it finished is a no-op.
    #[instrument(skip(self))]
    pub async fn close(&self) -> Result<()> {
        let _guard = self.inner.lifecycle.lock().await;
        {
            let mut state = self.inner.state.lock();
            match *state {
                AppState::Closed => return Ok(()),
                AppState::Ready | AppState::Failed => *state = AppState::Closing,
                other => {
                    return Err(DogError::invalid_lifecycle(format!(
                        "close() called on an application that is {other:?}"
                    ))
                    .into_anyhow())
                }
            }
        }

        let mut hooks = self.inner.container.lifecycle_hooks(LifecycleEvent::ApplicationShutdown);
        hooks.reverse();
        for (owner, hook) in hooks {
            if let Err(err) = hook().await {
                error!(%owner, error = %format!("{err:#}"), "shutdown hook failed");
            }
        }

        *self.inner.state.lock() = AppState::Closed;
        info!("application closed");
        Ok(())
    }
}
