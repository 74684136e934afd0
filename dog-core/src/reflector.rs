//! Metadata side-table.
//!
//! Annotations are explicit calls made when a type is wired into the
//! application. Values are keyed by `(Target, key)` where the target is a
//! type identity or one method of a type, never a name string.
//!
//! Each type also has a *prototype*: the ordered table of its unbound
//! methods. Method metadata is attached to the prototype entry; a method
//! bound to an instance is just a closure and carries none, so discovery
//! always goes through [`Reflector::scan_from_prototype`].

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::provider::{short_type_name, Instance};

/// What a metadata entry is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    Type(TypeId),
    Method(TypeId, &'static str),
}

impl Target {
    pub fn of<T: ?Sized + 'static>() -> Self {
        Target::Type(TypeId::of::<T>())
    }

    pub fn method<T: ?Sized + 'static>(name: &'static str) -> Self {
        Target::Method(TypeId::of::<T>(), name)
    }

    pub fn type_id(&self) -> TypeId {
        match self {
            Target::Type(id) | Target::Method(id, _) => *id,
        }
    }
}

/// One unbound method on a type's prototype.
#[derive(Clone)]
pub struct MethodRef {
    pub name: &'static str,
    pub method: Instance,
}

#[derive(Default)]
struct ReflectorInner {
    metadata: RwLock<HashMap<(Target, &'static str), Instance>>,
    prototypes: RwLock<HashMap<TypeId, Vec<MethodRef>>>,
    names: RwLock<HashMap<TypeId, &'static str>>,
}

/// Shared handle to the application's metadata store.
#[derive(Clone, Default)]
pub struct Reflector {
    inner: Arc<ReflectorInner>,
}

impl Reflector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember the display name of `T`.
    pub fn register_type<T: ?Sized + 'static>(&self) {
        self.inner
            .names
            .write()
            .insert(TypeId::of::<T>(), type_name::<T>());
    }

    pub fn type_name(&self, id: TypeId) -> Option<&'static str> {
        self.inner.names.read().get(&id).copied()
    }

    /// Short display name for diagnostics, falling back to the raw id.
    pub fn display_name(&self, id: TypeId) -> String {
        match self.type_name(id) {
            Some(name) => short_type_name(name).to_string(),
            None => format!("{id:?}"),
        }
    }

    pub fn define_metadata<V: Any + Send + Sync>(&self, key: &'static str, value: V, target: Target) {
        self.inner
            .metadata
            .write()
            .insert((target, key), Arc::new(value));
    }

    pub fn get_metadata<V: Any + Send + Sync + Clone>(&self, key: &'static str, target: Target) -> Option<V> {
        self.inner
            .metadata
            .read()
            .get(&(target, key))
            .and_then(|v| v.downcast_ref::<V>())
            .cloned()
    }

    pub fn has_metadata(&self, key: &'static str, target: Target) -> bool {
        self.inner.metadata.read().contains_key(&(target, key))
    }

    /// Add (or replace) an unbound method on `T`'s prototype.
    pub fn define_method<T: ?Sized + 'static>(&self, name: &'static str, method: Instance) {
        self.register_type::<T>();
        let mut prototypes = self.inner.prototypes.write();
        let methods = prototypes.entry(TypeId::of::<T>()).or_default();
        match methods.iter_mut().find(|m| m.name == name) {
            Some(existing) => existing.method = method,
            None => methods.push(MethodRef { name, method }),
        }
    }

    /// Unbound methods of a type in definition order.
    pub fn methods(&self, id: TypeId) -> Vec<MethodRef> {
        self.inner
            .prototypes
            .read()
            .get(&id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn method(&self, id: TypeId, name: &str) -> Option<MethodRef> {
        self.inner
            .prototypes
            .read()
            .get(&id)
            .and_then(|methods| methods.iter().find(|m| m.name == name).cloned())
    }

    /// Visit every prototype method of `id`, collecting what `f` returns.
    pub fn scan_from_prototype<R>(&self, id: TypeId, mut f: impl FnMut(&MethodRef) -> Option<R>) -> Vec<R> {
        self.methods(id).iter().filter_map(|m| f(m)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Mailer;

    #[derive(Clone, Debug, PartialEq)]
    struct Label(&'static str);

    #[test]
    fn metadata_is_keyed_by_identity_and_key() {
        let reflector = Reflector::new();
        reflector.define_metadata("label", Label("mail"), Target::of::<Mailer>());

        assert_eq!(reflector.get_metadata::<Label>("label", Target::of::<Mailer>()), Some(Label("mail")));
        assert!(reflector.get_metadata::<Label>("label", Target::of::<String>()).is_none());
        assert!(reflector.get_metadata::<Label>("other", Target::of::<Mailer>()).is_none());
        // wrong value type reads as absent
        assert!(reflector.get_metadata::<u8>("label", Target::of::<Mailer>()).is_none());
    }

    #[test]
    fn prototype_scan_sees_methods_in_order() {
        let reflector = Reflector::new();
        reflector.define_method::<Mailer>("on_active", Arc::new(1u8));
        reflector.define_method::<Mailer>("on_completed", Arc::new(2u8));
        reflector.define_metadata("hook", Label("completed"), Target::method::<Mailer>("on_completed"));

        let hooks = reflector.scan_from_prototype(TypeId::of::<Mailer>(), |m| {
            reflector.get_metadata::<Label>("hook", Target::Method(TypeId::of::<Mailer>(), m.name))
        });
        assert_eq!(hooks, vec![Label("completed")]);

        let names: Vec<_> = reflector.methods(TypeId::of::<Mailer>()).iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["on_active", "on_completed"]);
        assert!(reflector.display_name(TypeId::of::<Mailer>()).ends_with("Mailer"));
    }
}
