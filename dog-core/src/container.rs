use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Weak};

use anyhow::Context as _;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::context::{ContextId, ContextIdFactory};
use crate::errors::DogError;
use crate::module::{DogModule, ModuleId};
use crate::provider::{Dependency, Deps, FactoryFn, Instance, Provider, ProviderKind, Scope, Token, TypeMeta};
use crate::reflector::Reflector;

/// Async lifecycle callback registered by a provider factory.
pub type LifecycleHook = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Application lifecycle points at which hooks run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    ModuleInit,
    ApplicationBootstrap,
    ApplicationShutdown,
}

#[derive(Default)]
pub(crate) struct LifecycleRegistry {
    hooks: Mutex<Vec<(LifecycleEvent, Token, LifecycleHook)>>,
}

impl LifecycleRegistry {
    fn register(&self, event: LifecycleEvent, owner: Token, hook: LifecycleHook) {
        self.hooks.lock().push((event, owner, hook));
    }

    /// Hooks for `event` in registration order.
    pub(crate) fn hooks(&self, event: LifecycleEvent) -> Vec<(Token, LifecycleHook)> {
        self.hooks
            .lock()
            .iter()
            .filter(|(e, _, _)| *e == event)
            .map(|(_, owner, hook)| (owner.clone(), hook.clone()))
            .collect()
    }
}

/// Handed to every provider factory invocation.
#[derive(Clone)]
pub struct FactoryContext {
    module_ref: ModuleRef,
    owner: Token,
    lifecycle: Option<Arc<LifecycleRegistry>>,
    context_id: Option<ContextId>,
}

impl FactoryContext {
    pub fn module_ref(&self) -> &ModuleRef {
        &self.module_ref
    }

    /// Token of the provider being built.
    pub fn owner(&self) -> &Token {
        &self.owner
    }

    /// Set when building a request-scoped instance.
    pub fn context_id(&self) -> Option<ContextId> {
        self.context_id
    }

    pub fn on_module_init<F, Fut>(&self, hook: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.register(LifecycleEvent::ModuleInit, hook);
    }

    pub fn on_application_bootstrap<F, Fut>(&self, hook: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.register(LifecycleEvent::ApplicationBootstrap, hook);
    }

    pub fn on_application_shutdown<F, Fut>(&self, hook: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.register(LifecycleEvent::ApplicationShutdown, hook);
    }

    fn register<F, Fut>(&self, event: LifecycleEvent, hook: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        match &self.lifecycle {
            Some(lifecycle) => {
                let hook: LifecycleHook = Arc::new(move || hook().boxed());
                lifecycle.register(event, self.owner.clone(), hook);
            }
            // per-context instances do not take part in the app lifecycle
            None => debug!(owner = %self.owner, ?event, "ignoring lifecycle hook of request-scoped instance"),
        }
    }
}

/// Weak handle to the container, safe to keep inside instances.
#[derive(Clone)]
pub struct ModuleRef {
    inner: Weak<ContainerInner>,
}

impl ModuleRef {
    pub fn container(&self) -> anyhow::Result<DogContainer> {
        self.inner
            .upgrade()
            .map(|inner| DogContainer { inner })
            .ok_or_else(|| DogError::invalid_lifecycle("the application container has been dropped").into_anyhow())
    }
}

/// One provider registered in one module, plus its (lazily built) instance.
pub struct InstanceWrapper {
    index: usize,
    token: Token,
    kind: ProviderKind,
    metatype: Option<TypeMeta>,
    scope: Scope,
    durable: bool,
    inject: Vec<Dependency>,
    factory: FactoryFn,
    module: ModuleId,
    module_name: String,
    instance: OnceCell<Instance>,
}

impl InstanceWrapper {
    fn new(index: usize, provider: Provider, module: ModuleId, module_name: &str) -> Self {
        Self {
            index,
            token: provider.token,
            kind: provider.kind,
            metatype: provider.metatype,
            scope: provider.scope,
            durable: provider.durable,
            inject: provider.inject,
            factory: provider.factory,
            module,
            module_name: module_name.to_string(),
            instance: OnceCell::new(),
        }
    }

    pub fn token(&self) -> &Token {
        &self.token
    }

    /// Display name: the class name for class providers, the token otherwise.
    pub fn name(&self) -> String {
        match &self.metatype {
            Some(meta) => meta.short_name().to_string(),
            None => self.token.to_string(),
        }
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    /// Declared concrete type; `None` for value and factory providers.
    pub fn metatype(&self) -> Option<TypeMeta> {
        self.metatype
    }

    pub fn is_class_provider(&self) -> bool {
        self.kind == ProviderKind::Class
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn is_durable(&self) -> bool {
        self.durable
    }

    pub fn inject(&self) -> &[Dependency] {
        &self.inject
    }

    pub fn module(&self) -> ModuleId {
        self.module
    }

    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    /// The static instance, once built.
    pub fn instance(&self) -> Option<Instance> {
        self.instance.get().cloned()
    }
}

struct ModuleRecord {
    key: String,
    global: bool,
    providers: HashMap<Token, Arc<InstanceWrapper>>,
    imports: Vec<ModuleId>,
    exports: HashSet<Token>,
}

type ArenaKey = (u64, usize);

struct ContainerInner {
    modules: RwLock<Vec<ModuleRecord>>,
    wrappers: RwLock<Vec<Arc<InstanceWrapper>>>,
    arena: Mutex<HashMap<ArenaKey, Arc<OnceCell<Instance>>>>,
    requests: Mutex<HashMap<u64, Instance>>,
    context_ids: ContextIdFactory,
    lifecycle: Arc<LifecycleRegistry>,
    reflector: Reflector,
}

/// The dependency-injection container: module graph, provider wrappers,
/// static instances and the per-context instance arena.
#[derive(Clone)]
pub struct DogContainer {
    inner: Arc<ContainerInner>,
}

impl DogContainer {
    pub fn new(reflector: Reflector) -> Self {
        Self {
            inner: Arc::new(ContainerInner {
                modules: RwLock::new(Vec::new()),
                wrappers: RwLock::new(Vec::new()),
                arena: Mutex::new(HashMap::new()),
                requests: Mutex::new(HashMap::new()),
                context_ids: ContextIdFactory::new(),
                lifecycle: Arc::new(LifecycleRegistry::default()),
                reflector,
            }),
        }
    }

    pub fn reflector(&self) -> &Reflector {
        &self.inner.reflector
    }

    pub fn context_ids(&self) -> &ContextIdFactory {
        &self.inner.context_ids
    }

    pub fn module_ref(&self) -> ModuleRef {
        ModuleRef {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub(crate) fn lifecycle_hooks(&self, event: LifecycleEvent) -> Vec<(Token, LifecycleHook)> {
        self.inner.lifecycle.hooks(event)
    }

    /// Register `module` and, first, everything it imports.
    ///
    /// A module whose key is already registered is not registered again.
    pub fn add_module(&self, module: DogModule) -> ModuleId {
        if let Some(id) = self.module_by_key(&module.key) {
            return id;
        }

        let DogModule {
            key,
            name,
            global,
            imports,
            providers,
            exports,
        } = module;

        let imports: Vec<ModuleId> = imports.into_iter().map(|m| self.add_module(m)).collect();

        let mut modules = self.inner.modules.write();
        let mut wrappers = self.inner.wrappers.write();
        let id = ModuleId(modules.len());

        let mut records: HashMap<Token, Arc<InstanceWrapper>> = HashMap::new();
        for provider in providers {
            let token = provider.token.clone();
            match records.get(&token).map(|w| w.index) {
                Some(index) => {
                    warn!(module = %name, %token, "provider registered twice in one module, keeping the last one");
                    let wrapper = Arc::new(InstanceWrapper::new(index, provider, id, &name));
                    wrappers[index] = wrapper.clone();
                    records.insert(token, wrapper);
                }
                None => {
                    let wrapper = Arc::new(InstanceWrapper::new(wrappers.len(), provider, id, &name));
                    wrappers.push(wrapper.clone());
                    records.insert(token, wrapper);
                }
            }
        }

        debug!(module = %name, providers = records.len(), "registered module");
        modules.push(ModuleRecord {
            key,
            global,
            providers: records,
            imports,
            exports: exports.into_iter().collect(),
        });
        id
    }

    fn module_by_key(&self, key: &str) -> Option<ModuleId> {
        self.inner
            .modules
            .read()
            .iter()
            .position(|m| m.key == key)
            .map(ModuleId)
    }

    /// Every provider wrapper in registration order.
    pub fn components(&self) -> Vec<Arc<InstanceWrapper>> {
        self.inner.wrappers.read().clone()
    }

    /// Non-strict lookup: the first provider registered under `token` in any module.
    pub fn find(&self, token: &Token) -> Option<Arc<InstanceWrapper>> {
        self.inner
            .wrappers
            .read()
            .iter()
            .find(|w| &w.token == token)
            .cloned()
    }

    /// Strict lookup from inside `module`: own providers, then exports of
    /// imported modules, then exports of global modules.
    pub fn lookup(&self, module: ModuleId, token: &Token) -> Option<Arc<InstanceWrapper>> {
        let modules = self.inner.modules.read();
        let record = modules.get(module.0)?;

        if let Some(wrapper) = record.providers.get(token) {
            return Some(wrapper.clone());
        }

        let mut seen = HashSet::new();
        for import in &record.imports {
            if let Some(wrapper) = exported(&modules, *import, token, &mut seen) {
                return Some(wrapper);
            }
        }

        modules
            .iter()
            .enumerate()
            .filter(|(_, m)| m.global)
            .find_map(|(idx, _)| exported(&modules, ModuleId(idx), token, &mut seen))
    }

    /// Static instance registered under `token` (non-strict).
    pub fn get<T: std::any::Any + Send + Sync>(&self, token: impl Into<Token>) -> anyhow::Result<Arc<T>> {
        let token = token.into();
        let wrapper = self
            .find(&token)
            .ok_or_else(|| DogError::unknown_dependency(format!("nothing is registered under {token}")).into_anyhow())?;
        let instance = wrapper.instance().ok_or_else(|| {
            DogError::invalid_lifecycle(format!(
                "{token} has no static instance (request-scoped, or the application is not initialized)"
            ))
            .into_anyhow()
        })?;
        instance.downcast::<T>().map_err(|_| {
            DogError::type_mismatch(format!("{token} is not a {}", std::any::type_name::<T>())).into_anyhow()
        })
    }

    /// True when `wrapper` and everything it depends on can be built once.
    pub fn is_dependency_tree_static(&self, wrapper: &InstanceWrapper) -> bool {
        let mut seen = HashSet::new();
        self.tree_static(wrapper, &mut seen)
    }

    fn tree_static(&self, wrapper: &InstanceWrapper, seen: &mut HashSet<usize>) -> bool {
        if wrapper.scope == Scope::Request {
            return false;
        }
        if !seen.insert(wrapper.index) {
            return true;
        }
        wrapper.inject.iter().all(|dep| {
            if dep.token.is_request() {
                return false;
            }
            match self.lookup(wrapper.module, &dep.token) {
                Some(dependency) => self.tree_static(&dependency, seen),
                None => true,
            }
        })
    }

    /// Build every static instance, dependencies first.
    pub async fn instantiate(&self) -> anyhow::Result<()> {
        for wrapper in self.components() {
            if self.is_dependency_tree_static(&wrapper) {
                self.ensure_static(wrapper, Vec::new()).await?;
            }
        }
        Ok(())
    }

    fn ensure_static(&self, wrapper: Arc<InstanceWrapper>, path: Vec<usize>) -> BoxFuture<'_, anyhow::Result<Instance>> {
        async move {
            if let Some(instance) = wrapper.instance.get() {
                return Ok(instance.clone());
            }
            self.check_cycle(&wrapper, &path)?;
            let mut path = path;
            path.push(wrapper.index);

            let mut values = Vec::with_capacity(wrapper.inject.len());
            for dep in &wrapper.inject {
                match self.lookup(wrapper.module, &dep.token) {
                    Some(dependency) => values.push(Some(self.ensure_static(dependency, path.clone()).await?)),
                    None if dep.optional => values.push(None),
                    None => return Err(self.missing_dependency(&wrapper, dep)),
                }
            }

            let deps = Deps::new(wrapper.inject.iter().map(|d| d.token.clone()).collect(), values);
            let ctx = FactoryContext {
                module_ref: self.module_ref(),
                owner: wrapper.token.clone(),
                lifecycle: Some(self.inner.lifecycle.clone()),
                context_id: None,
            };

            let instance = wrapper
                .instance
                .get_or_try_init(|| (wrapper.factory)(deps, ctx))
                .await
                .with_context(|| format!("failed to instantiate {} in {}", wrapper.token, wrapper.module_name))?
                .clone();
            debug!(token = %wrapper.token, module = %wrapper.module_name, "instantiated provider");
            Ok(instance)
        }
        .boxed()
    }

    /// Resolve `wrapper`'s full dependency subtree for one context.
    ///
    /// Static subtrees resolve to the shared instance. Request-scoped
    /// providers are built once per context id (durable ones once per
    /// durable parent) and cached in the arena until [`release_context`].
    ///
    /// [`release_context`]: DogContainer::release_context
    pub fn resolve_per_context(
        &self,
        wrapper: &Arc<InstanceWrapper>,
        context_id: ContextId,
    ) -> BoxFuture<'_, anyhow::Result<Instance>> {
        self.resolve_in_context(wrapper.clone(), context_id, Vec::new())
    }

    fn resolve_in_context(
        &self,
        wrapper: Arc<InstanceWrapper>,
        context_id: ContextId,
        path: Vec<usize>,
    ) -> BoxFuture<'_, anyhow::Result<Instance>> {
        async move {
            if self.is_dependency_tree_static(&wrapper) {
                return self.ensure_static(wrapper, Vec::new()).await;
            }
            self.check_cycle(&wrapper, &path)?;
            let mut path = path;
            path.push(wrapper.index);

            let slot = context_id.for_provider(wrapper.durable);
            let cell = self
                .inner
                .arena
                .lock()
                .entry((slot.id(), wrapper.index))
                .or_default()
                .clone();
            if let Some(instance) = cell.get() {
                return Ok(instance.clone());
            }

            let mut values = Vec::with_capacity(wrapper.inject.len());
            for dep in &wrapper.inject {
                if dep.token.is_request() {
                    match self.inner.requests.lock().get(&context_id.id()).cloned() {
                        Some(request) => values.push(Some(request)),
                        None if dep.optional => values.push(None),
                        None => {
                            return Err(DogError::unknown_dependency(format!(
                                "{} injects REQUEST but no request is registered for context {}",
                                wrapper.token,
                                context_id.id()
                            ))
                            .into_anyhow())
                        }
                    }
                    continue;
                }
                match self.lookup(wrapper.module, &dep.token) {
                    Some(dependency) => values.push(Some(
                        self.resolve_in_context(dependency, context_id, path.clone()).await?,
                    )),
                    None if dep.optional => values.push(None),
                    None => return Err(self.missing_dependency(&wrapper, dep)),
                }
            }

            let deps = Deps::new(wrapper.inject.iter().map(|d| d.token.clone()).collect(), values);
            let ctx = FactoryContext {
                module_ref: self.module_ref(),
                owner: wrapper.token.clone(),
                lifecycle: None,
                context_id: Some(context_id),
            };

            let instance = cell
                .get_or_try_init(|| (wrapper.factory)(deps, ctx))
                .await
                .with_context(|| format!("failed to resolve {} for context {}", wrapper.token, context_id.id()))?
                .clone();
            Ok(instance)
        }
        .boxed()
    }

    /// Make `request` injectable through `REQUEST` for `context_id`.
    pub fn register_request_by_context_id(&self, request: Instance, context_id: ContextId) {
        self.inner.requests.lock().insert(context_id.id(), request);
    }

    /// Drop the per-call instances and request of `context_id`.
    ///
    /// Instances cached under a durable parent are kept.
    pub fn release_context(&self, context_id: ContextId) {
        let id = context_id.id();
        self.inner.arena.lock().retain(|(ctx, _), _| *ctx != id);
        self.inner.requests.lock().remove(&id);
    }

    /// Number of live per-context instances (all contexts).
    pub fn arena_len(&self) -> usize {
        self.inner.arena.lock().len()
    }

    fn check_cycle(&self, wrapper: &InstanceWrapper, path: &[usize]) -> anyhow::Result<()> {
        if !path.contains(&wrapper.index) {
            return Ok(());
        }
        let wrappers = self.inner.wrappers.read();
        let chain: Vec<String> = path
            .iter()
            .chain(std::iter::once(&wrapper.index))
            .filter_map(|idx| wrappers.get(*idx).map(|w| w.token.to_string()))
            .collect();
        Err(DogError::circular_dependency(chain.join(" -> ")).into_anyhow())
    }

    fn missing_dependency(&self, wrapper: &InstanceWrapper, dep: &Dependency) -> anyhow::Error {
        DogError::unknown_dependency(format!(
            "{} depends on {}, which is not available in module {}",
            wrapper.token, dep.token, wrapper.module_name
        ))
        .into_anyhow()
    }
}

fn exported(
    modules: &[ModuleRecord],
    module: ModuleId,
    token: &Token,
    seen: &mut HashSet<ModuleId>,
) -> Option<Arc<InstanceWrapper>> {
    if !seen.insert(module) {
        return None;
    }
    let record = modules.get(module.0)?;
    if !record.exports.contains(token) {
        return None;
    }
    if let Some(wrapper) = record.providers.get(token) {
        return Some(wrapper.clone());
    }
    // re-export of something the module imports
    record
        .imports
        .iter()
        .find_map(|import| exported(modules, *import, token, seen))
}
