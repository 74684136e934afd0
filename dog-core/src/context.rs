//! Context ids correlate the request-scoped instances built for one logical
//! invocation (an HTTP request, a job, ...).
//!
//! The container keeps an arena keyed by context id; this module only hands
//! out ids and remembers which request they belong to.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::provider::Instance;

static CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque id of one resolution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId {
    id: u64,
    durable: Option<u64>,
}

impl ContextId {
    /// A fresh id, never handed out before.
    pub fn new() -> Self {
        Self {
            id: CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
            durable: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Context under which durable providers of this context are cached.
    pub fn durable_parent(&self) -> Option<ContextId> {
        self.durable.map(|id| ContextId { id, durable: None })
    }

    /// Context used to cache instances of a provider with the given durability.
    pub fn for_provider(&self, durable: bool) -> ContextId {
        match (durable, self.durable_parent()) {
            (true, Some(parent)) => parent,
            _ => ContextId { id: self.id, durable: None },
        }
    }

    fn with_durable_parent(mut self, parent: ContextId) -> Self {
        self.durable = Some(parent.id);
        self
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

/// Decides which durable context, if any, a new per-call context belongs to.
pub trait ContextIdStrategy: Send + Sync {
    fn attach(&self, context_id: ContextId, request: &Instance) -> Option<ContextId>;
}

/// Durable strategy keyed by a value extracted from the request
/// (a tenant id, an account, ...). Requests with the same key share one
/// durable context for the life of the application.
pub struct KeyedDurableStrategy<F> {
    key_of: F,
    contexts: Mutex<HashMap<String, ContextId>>,
}

impl<F> KeyedDurableStrategy<F>
where
    F: Fn(&Instance) -> Option<String> + Send + Sync,
{
    pub fn new(key_of: F) -> Self {
        Self {
            key_of,
            contexts: Mutex::new(HashMap::new()),
        }
    }
}

impl<F> ContextIdStrategy for KeyedDurableStrategy<F>
where
    F: Fn(&Instance) -> Option<String> + Send + Sync,
{
    fn attach(&self, _context_id: ContextId, request: &Instance) -> Option<ContextId> {
        let key = (self.key_of)(request)?;
        let mut contexts = self.contexts.lock();
        Some(*contexts.entry(key).or_default())
    }
}

/// Hands out context ids and memoizes them per request identity.
#[derive(Default)]
pub struct ContextIdFactory {
    by_request: Mutex<HashMap<String, ContextId>>,
    strategy: RwLock<Option<Arc<dyn ContextIdStrategy>>>,
}

impl ContextIdFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&self, strategy: Arc<dyn ContextIdStrategy>) {
        *self.strategy.write() = Some(strategy);
    }

    /// Unassociated context id.
    pub fn create(&self) -> ContextId {
        ContextId::new()
    }

    /// Context id for a request identified by `key`.
    ///
    /// The first call for a key creates the id (consulting the strategy for a
    /// durable parent); later calls return the same id until [`release`].
    ///
    /// [`release`]: ContextIdFactory::release
    pub fn get_by_request(&self, key: &str, request: &Instance) -> ContextId {
        if let Some(existing) = self.by_request.lock().get(key) {
            return *existing;
        }

        let context_id = ContextId::new();
        let strategy = self.strategy.read().clone();
        let context_id = match strategy.and_then(|s| s.attach(context_id, request)) {
            Some(parent) => context_id.with_durable_parent(parent),
            None => context_id,
        };

        *self
            .by_request
            .lock()
            .entry(key.to_string())
            .or_insert(context_id)
    }

    /// Forget the association for `key`, returning the id it had.
    pub fn release(&self, key: &str) -> Option<ContextId> {
        self.by_request.lock().remove(key)
    }

    pub fn tracked(&self) -> usize {
        self.by_request.lock().len()
    }
}
