use std::sync::atomic::{AtomicU64, Ordering};

use crate::provider::{Provider, Token};

static DYNAMIC_MODULE_ID: AtomicU64 = AtomicU64::new(1);

/// Index of a registered module inside the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(pub(crate) usize);

/// A unit of the application graph: providers, what they export, and the
/// modules they import.
///
/// Modules are deduplicated by key. Static modules use their name as key,
/// so importing the same static module from several places registers it
/// once; dynamic modules get a unique key per construction.
#[derive(Debug)]
pub struct DogModule {
    pub(crate) key: String,
    pub(crate) name: String,
    pub(crate) global: bool,
    pub(crate) imports: Vec<DogModule>,
    pub(crate) providers: Vec<Provider>,
    pub(crate) exports: Vec<Token>,
}

impl DogModule {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            key: name.clone(),
            name,
            global: false,
            imports: Vec::new(),
            providers: Vec::new(),
            exports: Vec::new(),
        }
    }

    /// A module fragment produced at runtime (e.g. `register_queue`).
    pub fn dynamic(name: impl Into<String>) -> Self {
        let name = name.into();
        let id = DYNAMIC_MODULE_ID.fetch_add(1, Ordering::Relaxed);
        Self {
            key: format!("{name}#{id}"),
            ..Self::new(name)
        }
    }

    /// Exports of a global module are visible from every module.
    pub fn global(mut self) -> Self {
        self.global = true;
        self
    }

    pub fn import(mut self, module: DogModule) -> Self {
        self.imports.push(module);
        self
    }

    pub fn provider(mut self, provider: Provider) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn providers(mut self, providers: impl IntoIterator<Item = Provider>) -> Self {
        self.providers.extend(providers);
        self
    }

    pub fn export(mut self, token: impl Into<Token>) -> Self {
        self.exports.push(token.into());
        self
    }

    pub fn exports(mut self, tokens: impl IntoIterator<Item = Token>) -> Self {
        self.exports.extend(tokens);
        self
    }

    /// Export every provider declared so far.
    pub fn export_all(mut self) -> Self {
        let tokens: Vec<Token> = self.providers.iter().map(|p| p.token().clone()).collect();
        self.exports.extend(tokens);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn provider_tokens(&self) -> impl Iterator<Item = &Token> {
        self.providers.iter().map(|p| p.token())
    }

    pub fn exported_tokens(&self) -> &[Token] {
        &self.exports
    }

    pub fn is_global(&self) -> bool {
        self.global
    }
}
