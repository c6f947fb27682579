//! Named strategy lookup.
//!
//! Pluggable roles (serializers, load balancers, HA strategies) are traits;
//! an [`ExtensionLoader`] maps a configuration name to a factory for one
//! role and hands out instances according to the registered [`Scope`].

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use crate::protocol::error::{MoonrpcError, Result};

/// Lifetime of instances handed out by a loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// One instance, created on first lookup and shared afterwards.
    Singleton,
    /// A fresh instance on every lookup.
    Prototype,
}

type Factory<T> = Arc<dyn Fn() -> Arc<T> + Send + Sync>;

struct Entry<T: ?Sized> {
    scope: Scope,
    factory: Factory<T>,
    instance: OnceLock<Arc<T>>,
}

/// Registry of named factories for one extension role.
///
/// # Example
///
/// ```
/// use moonrpc_common::extension::{ExtensionLoader, Scope};
/// use std::sync::Arc;
///
/// trait Greeter: Send + Sync {
///     fn greet(&self) -> String;
/// }
///
/// struct English;
/// impl Greeter for English {
///     fn greet(&self) -> String { "hello".into() }
/// }
///
/// let loader: ExtensionLoader<dyn Greeter> = ExtensionLoader::new("greeter");
/// loader.register("en", Scope::Singleton, || Arc::new(English) as Arc<dyn Greeter>);
///
/// assert_eq!(loader.get("en").unwrap().greet(), "hello");
/// assert!(loader.get("fr").is_err());
/// ```
pub struct ExtensionLoader<T: ?Sized> {
    role: &'static str,
    entries: RwLock<HashMap<String, Arc<Entry<T>>>>,
}

impl<T: ?Sized + Send + Sync> ExtensionLoader<T> {
    /// Creates an empty loader; `role` is only used in error messages.
    pub fn new(role: &'static str) -> Self {
        Self {
            role,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Registers (or replaces) the factory for `name`.
    pub fn register<F>(&self, name: impl Into<String>, scope: Scope, factory: F)
    where
        F: Fn() -> Arc<T> + Send + Sync + 'static,
    {
        let entry = Arc::new(Entry {
            scope,
            factory: Arc::new(factory),
            instance: OnceLock::new(),
        });
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), entry);
    }

    /// Looks up the extension registered under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`MoonrpcError::Config`] if nothing is registered under
    /// `name`.
    pub fn get(&self, name: &str) -> Result<Arc<T>> {
        let entry = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| MoonrpcError::Config(format!("unknown {} extension '{}'", self.role, name)))?;

        Ok(match entry.scope {
            Scope::Singleton => entry.instance.get_or_init(|| (entry.factory)()).clone(),
            Scope::Prototype => (entry.factory)(),
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    trait Counter: Send + Sync {
        fn id(&self) -> usize;
    }

    struct Numbered(usize);

    impl Counter for Numbered {
        fn id(&self) -> usize {
            self.0
        }
    }

    fn loader_with(scope: Scope) -> ExtensionLoader<dyn Counter> {
        let created = Arc::new(AtomicUsize::new(0));
        let loader: ExtensionLoader<dyn Counter> = ExtensionLoader::new("counter");
        loader.register("numbered", scope, move || {
            Arc::new(Numbered(created.fetch_add(1, Ordering::SeqCst))) as Arc<dyn Counter>
        });
        loader
    }

    #[test]
    fn test_singleton_is_cached() {
        let loader = loader_with(Scope::Singleton);
        let a = loader.get("numbered").unwrap();
        let b = loader.get("numbered").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.id(), 0);
    }

    #[test]
    fn test_prototype_creates_fresh_instances() {
        let loader = loader_with(Scope::Prototype);
        let a = loader.get("numbered").unwrap();
        let b = loader.get("numbered").unwrap();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_unknown_name_is_config_error() {
        let loader = loader_with(Scope::Singleton);
        match loader.get("missing") {
            Err(MoonrpcError::Config(msg)) => assert!(msg.contains("counter")),
            other => panic!("unexpected: {:?}", other.map(|c| c.id())),
        }
    }

    #[test]
    fn test_names_sorted() {
        let loader = loader_with(Scope::Singleton);
        loader.register("alpha", Scope::Prototype, || Arc::new(Numbered(9)) as Arc<dyn Counter>);
        assert_eq!(loader.names(), vec!["alpha".to_string(), "numbered".to_string()]);
        assert!(loader.contains("alpha"));
    }
}
