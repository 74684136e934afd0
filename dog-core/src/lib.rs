//! dog-core: framework-agnostic core for DogRS.
//!
//! A small dependency-injection container with a module graph, static and
//! request-scoped providers, a metadata reflector and an application
//! lifecycle (`init` / `close`). Integrations such as `dog-queue-module`
//! build on these pieces.

pub mod app;
pub mod config;
pub mod container;
pub mod context;
pub mod errors;
pub mod module;
pub mod provider;
pub mod reflector;

pub use app::{AppState, DogApp};
pub use config::{DogConfig, DogConfigSnapshot};
pub use container::{DogContainer, FactoryContext, InstanceWrapper, LifecycleEvent, LifecycleHook, ModuleRef};
pub use context::{ContextId, ContextIdFactory, ContextIdStrategy, KeyedDurableStrategy};
pub use errors::{DogError, DogResult, ErrorKind};
pub use module::{DogModule, ModuleId};
pub use provider::{Dependency, Deps, Instance, Provider, ProviderKind, Scope, Token, TypeMeta, REQUEST};
pub use reflector::{MethodRef, Reflector, Target};
