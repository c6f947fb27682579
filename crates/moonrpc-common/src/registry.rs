//! Registry collaborator contract and in-process registries.
//!
//! A registry keeps the set of provider addresses for each service path and
//! pushes changes to subscribed [`NotifyListener`]s. Listeners are invoked
//! on whatever thread performed the change; they must resynchronise their
//! own state rather than assume a particular caller.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use tracing::debug;

use crate::address::{param, Address};
use crate::protocol::error::{MoonrpcError, Result};

/// Receives membership snapshots from a registry.
pub trait NotifyListener: Send + Sync {
    /// `addresses` is the complete current provider list for the subscribed
    /// service as seen by `registry`.
    fn notify(&self, registry: &Address, addresses: Vec<Address>);
}

/// Service registry client.
pub trait Registry: Send + Sync {
    /// Address of the registry itself.
    fn url(&self) -> &Address;

    fn register(&self, address: &Address) -> Result<()>;

    fn unregister(&self, address: &Address) -> Result<()>;

    fn subscribe(&self, address: &Address, listener: Arc<dyn NotifyListener>) -> Result<()>;

    fn unsubscribe(&self, address: &Address, listener: &Arc<dyn NotifyListener>) -> Result<()>;

    /// Current provider list for the service named by `address`.
    fn discover(&self, address: &Address) -> Result<Vec<Address>>;
}

/// Opens (or reuses) registry clients by registry address.
pub trait RegistryFactory: Send + Sync {
    fn get_registry(&self, url: &Address) -> Result<Arc<dyn Registry>>;
}

fn same_listener(a: &Arc<dyn NotifyListener>, b: &Arc<dyn NotifyListener>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

#[derive(Default)]
struct LocalState {
    providers: Vec<Address>,
    listeners: HashMap<String, Vec<Arc<dyn NotifyListener>>>,
}

/// In-process registry keyed by service path.
///
/// `register` and `unregister` push the new provider list to subscribers of
/// the affected path after releasing the state lock, so listeners may query
/// the registry. Publications are serialized and each one snapshots the
/// list while holding the publish lock, so the last snapshot a listener
/// sees is always the current membership. Listeners must not register or
/// unregister from inside `notify`.
pub struct LocalRegistry {
    url: Address,
    state: Mutex<LocalState>,
    publishing: Mutex<()>,
}

impl LocalRegistry {
    pub fn new(url: Address) -> Self {
        Self {
            url,
            state: Mutex::new(LocalState::default()),
            publishing: Mutex::new(()),
        }
    }

    fn providers_for(state: &LocalState, path: &str) -> Vec<Address> {
        state
            .providers
            .iter()
            .filter(|p| p.path() == path && p.parameter(param::SIDE) != Some(param::SIDE_CONSUMER))
            .cloned()
            .collect()
    }

    fn publish(&self, path: &str) {
        let _publishing = self.publishing.lock().unwrap_or_else(PoisonError::into_inner);
        let (listeners, snapshot) = {
            let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            let listeners = state.listeners.get(path).cloned().unwrap_or_default();
            (listeners, Self::providers_for(&state, path))
        };
        debug!(
            "Registry {} publishing {} provider(s) for {} to {} listener(s)",
            self.url.uri(),
            snapshot.len(),
            path,
            listeners.len()
        );
        for listener in listeners {
            listener.notify(&self.url, snapshot.clone());
        }
    }
}

impl Registry for LocalRegistry {
    fn url(&self) -> &Address {
        &self.url
    }

    fn register(&self, address: &Address) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if state.providers.contains(address) {
                return Ok(());
            }
            state.providers.push(address.clone());
        }
        self.publish(address.path());
        Ok(())
    }

    fn unregister(&self, address: &Address) -> Result<()> {
        let removed = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            let before = state.providers.len();
            state.providers.retain(|p| p != address);
            before != state.providers.len()
        };
        if removed {
            self.publish(address.path());
        }
        Ok(())
    }

    fn subscribe(&self, address: &Address, listener: Arc<dyn NotifyListener>) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state
            .listeners
            .entry(address.path().to_string())
            .or_default()
            .push(listener);
        Ok(())
    }

    fn unsubscribe(&self, address: &Address, listener: &Arc<dyn NotifyListener>) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(listeners) = state.listeners.get_mut(address.path()) {
            listeners.retain(|l| !same_listener(l, listener));
        }
        Ok(())
    }

    fn discover(&self, address: &Address) -> Result<Vec<Address>> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(Self::providers_for(&state, address.path()))
    }
}

/// Point-to-point "registry" for `direct://host:port` addresses.
///
/// Discovery always yields a single provider at the registry's own host and
/// port, carrying the protocol, path and parameters of the requested
/// address. Registration and subscription are accepted and ignored.
pub struct DirectRegistry {
    url: Address,
}

impl DirectRegistry {
    pub fn new(url: Address) -> Self {
        Self { url }
    }
}

impl Registry for DirectRegistry {
    fn url(&self) -> &Address {
        &self.url
    }

    fn register(&self, _address: &Address) -> Result<()> {
        Ok(())
    }

    fn unregister(&self, _address: &Address) -> Result<()> {
        Ok(())
    }

    fn subscribe(&self, _address: &Address, _listener: Arc<dyn NotifyListener>) -> Result<()> {
        Ok(())
    }

    fn unsubscribe(&self, _address: &Address, _listener: &Arc<dyn NotifyListener>) -> Result<()> {
        Ok(())
    }

    fn discover(&self, address: &Address) -> Result<Vec<Address>> {
        let provider = address
            .clone()
            .with_host(self.url.host())
            .with_port(self.url.port())
            .with_parameter(param::SIDE, param::SIDE_PROVIDER);
        Ok(vec![provider])
    }
}

/// Registry factory for the `local` and `direct` protocols.
///
/// One registry instance is kept per registry [`Address::uri`], so every
/// cluster and exporter naming the same registry shares its state.
#[derive(Default)]
pub struct DefaultRegistryFactory {
    registries: Mutex<HashMap<String, Arc<dyn Registry>>>,
}

impl DefaultRegistryFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide factory, created on first use and never torn down.
    pub fn global() -> Arc<DefaultRegistryFactory> {
        static GLOBAL: OnceLock<Arc<DefaultRegistryFactory>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(DefaultRegistryFactory::new())).clone()
    }

    fn create_registry(url: &Address) -> Result<Arc<dyn Registry>> {
        match url.protocol() {
            "local" => Ok(Arc::new(LocalRegistry::new(url.clone()))),
            "direct" => Ok(Arc::new(DirectRegistry::new(url.clone()))),
            other => Err(MoonrpcError::Registry(format!(
                "unsupported registry protocol '{}' in {}",
                other, url
            ))),
        }
    }
}

impl RegistryFactory for DefaultRegistryFactory {
    fn get_registry(&self, url: &Address) -> Result<Arc<dyn Registry>> {
        let key = url.uri();
        let mut registries = self.registries.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(registry) = registries.get(&key) {
            return Ok(registry.clone());
        }
        let registry = Self::create_registry(url)?;
        registries.insert(key, registry.clone());
        Ok(registry)
    }
}
