use std::any::{type_name, Any, TypeId};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::container::FactoryContext;
use crate::errors::DogError;

/// A type-erased, shareable component instance.
pub type Instance = Arc<dyn Any + Send + Sync>;

/// Future returned by provider factories.
pub type ProviderFuture = BoxFuture<'static, anyhow::Result<Instance>>;

/// Type-erased provider factory.
pub type FactoryFn = Arc<dyn Fn(Deps, FactoryContext) -> ProviderFuture + Send + Sync>;

/// Identity under which a provider is registered and injected.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token(Arc<str>);

impl Token {
    pub fn new(token: impl AsRef<str>) -> Self {
        Self(Arc::from(token.as_ref()))
    }

    /// Class token: the fully qualified type name.
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self::new(type_name::<T>())
    }

    /// The per-context request object (for jobs: the job being processed).
    pub fn request() -> Self {
        Self::new(REQUEST)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_request(&self) -> bool {
        &*self.0 == REQUEST
    }
}

/// Reserved token resolving to the request registered for a context id.
pub const REQUEST: &str = "REQUEST";

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token({})", self.0)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Token {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Token {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

impl From<&Token> for Token {
    fn from(value: &Token) -> Self {
        value.clone()
    }
}

/// Lifetime of a provider's instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Scope {
    /// One instance for the whole application.
    #[default]
    Default,
    /// A fresh instance per context id.
    Request,
}

/// How a provider was declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    Class,
    Factory,
    Value,
}

/// Runtime identity of a concrete type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeMeta {
    pub id: TypeId,
    pub name: &'static str,
}

impl TypeMeta {
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
        }
    }

    /// Short type name without the module path.
    pub fn short_name(&self) -> &'static str {
        short_type_name(self.name)
    }
}

pub(crate) fn short_type_name(name: &'static str) -> &'static str {
    let base = name.split('<').next().unwrap_or(name);
    match base.rfind("::") {
        Some(idx) => &name[idx + 2..],
        None => name,
    }
}

/// One injected dependency of a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub token: Token,
    pub optional: bool,
}

impl Dependency {
    pub fn required(token: impl Into<Token>) -> Self {
        Self {
            token: token.into(),
            optional: false,
        }
    }

    /// Resolves to `None` instead of failing when nothing provides `token`.
    pub fn optional(token: impl Into<Token>) -> Self {
        Self {
            token: token.into(),
            optional: true,
        }
    }
}

impl From<Token> for Dependency {
    fn from(token: Token) -> Self {
        Dependency::required(token)
    }
}

impl From<&str> for Dependency {
    fn from(token: &str) -> Self {
        Dependency::required(token)
    }
}

/// Resolved dependencies handed to a factory, in `inject` order.
pub struct Deps {
    tokens: Vec<Token>,
    values: Vec<Option<Instance>>,
}

impl Deps {
    pub(crate) fn new(tokens: Vec<Token>, values: Vec<Option<Instance>>) -> Self {
        Self { tokens, values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Raw instance at `index`, `None` for an absent optional dependency.
    pub fn instance(&self, index: usize) -> Option<&Instance> {
        self.values.get(index).and_then(|v| v.as_ref())
    }

    /// Typed required dependency.
    pub fn get<T: Any + Send + Sync>(&self, index: usize) -> anyhow::Result<Arc<T>> {
        self.optional::<T>(index)?.ok_or_else(|| {
            DogError::unknown_dependency(format!(
                "dependency #{index} ({}) was not resolved",
                self.token_name(index)
            ))
            .into_anyhow()
        })
    }

    /// Typed optional dependency; a present value of the wrong type is an error.
    pub fn optional<T: Any + Send + Sync>(&self, index: usize) -> anyhow::Result<Option<Arc<T>>> {
        match self.instance(index) {
            None => Ok(None),
            Some(instance) => instance.clone().downcast::<T>().map(Some).map_err(|_| {
                DogError::type_mismatch(format!(
                    "dependency #{index} ({}) is not a {}",
                    self.token_name(index),
                    type_name::<T>()
                ))
                .into_anyhow()
            }),
        }
    }

    fn token_name(&self, index: usize) -> &str {
        self.tokens.get(index).map(Token::as_str).unwrap_or("?")
    }
}

/// Declarative recipe for building an instance.
#[derive(Clone)]
pub struct Provider {
    pub(crate) token: Token,
    pub(crate) kind: ProviderKind,
    pub(crate) metatype: Option<TypeMeta>,
    pub(crate) scope: Scope,
    pub(crate) durable: bool,
    pub(crate) inject: Vec<Dependency>,
    pub(crate) factory: FactoryFn,
}

impl Provider {
    /// Class provider: token and metatype are `T` itself.
    pub fn class<T, F, Fut>(inject: Vec<Dependency>, build: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(Deps) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let factory: FactoryFn = Arc::new(move |deps, _ctx| {
            build(deps).map(|res| res.map(|v| Arc::new(v) as Instance)).boxed()
        });
        Self {
            token: Token::of::<T>(),
            kind: ProviderKind::Class,
            metatype: Some(TypeMeta::of::<T>()),
            scope: Scope::Default,
            durable: false,
            inject,
            factory,
        }
    }

    /// Factory provider producing a `T` under an arbitrary token.
    pub fn factory<T, F, Fut>(token: impl Into<Token>, inject: Vec<Dependency>, build: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(Deps) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self::factory_with_context(token, inject, move |deps, _ctx| {
            build(deps).map(|res| res.map(|v| Arc::new(v) as Instance))
        })
    }

    /// Factory provider with access to the container and lifecycle hooks.
    pub fn factory_with_context<F, Fut>(token: impl Into<Token>, inject: Vec<Dependency>, build: F) -> Self
    where
        F: Fn(Deps, FactoryContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Instance>> + Send + 'static,
    {
        let factory: FactoryFn = Arc::new(move |deps, ctx| build(deps, ctx).boxed());
        Self {
            token: token.into(),
            kind: ProviderKind::Factory,
            metatype: None,
            scope: Scope::Default,
            durable: false,
            inject,
            factory,
        }
    }

    /// Value provider: the instance already exists.
    pub fn value<T: Any + Send + Sync>(token: impl Into<Token>, value: T) -> Self {
        let instance: Instance = Arc::new(value);
        let factory: FactoryFn = Arc::new(move |_deps, _ctx| {
            let instance = instance.clone();
            async move { Ok(instance) }.boxed()
        });
        Self {
            token: token.into(),
            kind: ProviderKind::Value,
            metatype: None,
            scope: Scope::Default,
            durable: false,
            inject: Vec::new(),
            factory,
        }
    }

    /// Re-register under another token (e.g. a class provider under a string alias).
    pub fn with_token(mut self, token: impl Into<Token>) -> Self {
        self.token = token.into();
        self
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    /// Request-scoped instances of a durable provider are cached under the
    /// durable parent context instead of the per-call one.
    pub fn durable(mut self) -> Self {
        self.durable = true;
        self
    }

    pub fn token(&self) -> &Token {
        &self.token
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }
}

impl fmt::Debug for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provider")
            .field("token", &self.token)
            .field("kind", &self.kind)
            .field("scope", &self.scope)
            .field("durable", &self.durable)
            .field("inject", &self.inject)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MailService;

    #[test]
    fn class_tokens_use_type_names() {
        assert_eq!(Token::of::<MailService>(), Token::of::<MailService>());
        assert!(Token::of::<MailService>().as_str().ends_with("MailService"));
        assert_eq!(TypeMeta::of::<MailService>().short_name(), "MailService");
    }

    #[test]
    fn deps_report_type_mismatch() {
        let deps = Deps::new(vec![Token::new("n")], vec![Some(Arc::new(5u32) as Instance)]);
        assert_eq!(*deps.get::<u32>(0).unwrap(), 5);
        let err = deps.get::<String>(0).unwrap_err();
        assert!(err.to_string().contains("is not a"));
    }

    #[test]
    fn missing_optional_is_none() {
        let deps = Deps::new(vec![Token::new("cfg")], vec![None]);
        assert!(deps.optional::<u32>(0).unwrap().is_none());
        assert!(deps.get::<u32>(0).is_err());
    }
}
