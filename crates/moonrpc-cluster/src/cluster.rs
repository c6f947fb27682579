//! Registry-driven endpoint membership for one service reference.
//!
//! A [`Cluster`] keeps one endpoint list per registry address. Every
//! notification from a registry rebuilds that registry's list (reusing
//! endpoints whose address is unchanged), then recomputes the merged list
//! and publishes it to the load balancer in a single swap.

use moonrpc_client::{Endpoint, Protocol};
use moonrpc_common::address::{param, Address};
use moonrpc_common::protocol::error::{MoonrpcError, Result};
use moonrpc_common::protocol::{Request, Response, RpcError};
use moonrpc_common::registry::{NotifyListener, RegistryFactory};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock, Weak};
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

use crate::ha::HaStrategy;
use crate::load_balancer::{Endpoints, LoadBalancer};

/// Consumer-side parameters copied onto every endpoint address so the HA
/// strategy and the transport see the caller's budget.
const CALL_PARAMETERS: [&str; 2] = [param::REQUEST_TIMEOUT, param::RETRIES];

/// Per-registry endpoint lists, kept in registry order.
type Membership = Vec<(Address, Vec<Arc<dyn Endpoint>>)>;

pub struct Cluster {
    url: Address,
    registry_urls: Vec<Address>,
    registries: Arc<dyn RegistryFactory>,
    protocol: Arc<dyn Protocol>,
    load_balancer: Arc<dyn LoadBalancer>,
    ha_strategy: Arc<dyn HaStrategy>,
    membership: Mutex<Membership>,
    endpoints: RwLock<Endpoints>,
    available: AtomicBool,
    listener: OnceLock<Arc<dyn NotifyListener>>,
    runtime: Option<Handle>,
}

/// Forwards registry notifications without keeping the cluster alive.
struct ClusterListener {
    cluster: Weak<Cluster>,
}

impl NotifyListener for ClusterListener {
    fn notify(&self, registry: &Address, addresses: Vec<Address>) {
        if let Some(cluster) = self.cluster.upgrade() {
            cluster.notify(registry, addresses);
        }
    }
}

impl Cluster {
    /// Creates an uninitialised cluster for the consumer address `url`.
    ///
    /// When created inside a tokio runtime, notifications arriving later on
    /// foreign threads build their endpoints on that runtime.
    pub fn new(
        url: Address,
        registry_urls: Vec<Address>,
        registries: Arc<dyn RegistryFactory>,
        protocol: Arc<dyn Protocol>,
        load_balancer: Arc<dyn LoadBalancer>,
        ha_strategy: Arc<dyn HaStrategy>,
    ) -> Arc<Self> {
        let membership = registry_urls
            .iter()
            .map(|registry| (registry.clone(), Vec::new()))
            .collect();
        Arc::new(Self {
            url,
            registry_urls,
            registries,
            protocol,
            load_balancer,
            ha_strategy,
            membership: Mutex::new(membership),
            endpoints: RwLock::new(Arc::new(Vec::new())),
            available: AtomicBool::new(false),
            listener: OnceLock::new(),
            runtime: Handle::try_current().ok(),
        })
    }

    /// Loads the current providers from every registry and subscribes to
    /// further changes.
    ///
    /// # Errors
    ///
    /// Fails with [`MoonrpcError::Config`] outside a tokio runtime. Also
    /// fails if a registry cannot be opened or subscribed to, or if no
    /// provider was found while the `check` parameter is true.
    pub fn init(self: &Arc<Self>) -> Result<()> {
        if self.runtime.is_none() && Handle::try_current().is_err() {
            return Err(MoonrpcError::Config(format!(
                "cluster {} must be initialised inside a tokio runtime",
                self.url.uri()
            )));
        }
        let listener = self.listener();
        for registry_url in &self.registry_urls {
            let registry = self.registries.get_registry(registry_url)?;
            match registry.discover(&self.url) {
                Ok(addresses) => self.notify(registry_url, addresses),
                Err(e) => error!(
                    "Cluster discover failed for {} on registry {}: {}",
                    self.url.uri(),
                    registry_url.uri(),
                    e
                ),
            }
            registry.subscribe(&self.url, listener.clone())?;
        }

        let count = self.endpoints().len();
        info!("Cluster {} initialised with {} endpoint(s)", self.url.uri(), count);
        if count == 0 {
            let message = format!(
                "no provider for {} in registries [{}]",
                self.url.uri(),
                self.registry_uris()
            );
            if self.url.bool_parameter(param::CHECK, param::DEFAULT_CHECK) {
                return Err(MoonrpcError::NoEndpoint(message));
            }
            warn!("{}", message);
        }

        self.available.store(true, Ordering::Release);
        Ok(())
    }

    /// Applies one registry's provider list.
    ///
    /// Calls are serialized per cluster. An empty list is treated as no
    /// change.
    pub fn notify(&self, registry_url: &Address, addresses: Vec<Address>) {
        if addresses.is_empty() {
            warn!(
                "Cluster {} ignoring empty notification from registry {}",
                self.url.uri(),
                registry_url.uri()
            );
            return;
        }
        let _runtime = self.runtime.as_ref().map(Handle::enter);

        let mut membership = self.membership.lock().unwrap_or_else(PoisonError::into_inner);
        info!(
            "Cluster {} notified by registry {} with {} address(es)",
            self.url.uri(),
            registry_url.uri(),
            addresses.len()
        );

        let previous: Vec<Arc<dyn Endpoint>> = membership
            .iter()
            .find(|(registry, _)| registry == registry_url)
            .map(|(_, endpoints)| endpoints.clone())
            .unwrap_or_default();

        let mut current: Vec<Arc<dyn Endpoint>> = Vec::new();
        for address in addresses.iter().filter(|a| a.can_serve(&self.url)) {
            if let Some(existing) = previous
                .iter()
                .find(|e| e.url() == address || e.service_url() == address)
            {
                current.push(existing.clone());
                continue;
            }
            match self.protocol.refer(&self.refer_url(address), address) {
                Ok(endpoint) => {
                    debug!("Cluster {} created endpoint {}", self.url.uri(), address.uri());
                    current.push(endpoint);
                }
                Err(e) => error!(
                    "Cluster {} failed to refer {}: {}",
                    self.url.uri(),
                    address.uri(),
                    e
                ),
            }
        }

        match membership.iter_mut().find(|(registry, _)| registry == registry_url) {
            Some((_, endpoints)) => *endpoints = current,
            None => membership.push((registry_url.clone(), current)),
        }

        let merged: Vec<Arc<dyn Endpoint>> = membership
            .iter()
            .flat_map(|(_, endpoints)| endpoints.iter().cloned())
            .collect();

        let dropped: Vec<Arc<dyn Endpoint>> = previous
            .into_iter()
            .filter(|old| !merged.iter().any(|e| Arc::ptr_eq(e, old)))
            .collect();

        // Destroy only once the balancer can no longer select them.
        self.publish(Arc::new(merged));
        for endpoint in dropped {
            info!("Cluster {} dropping endpoint {}", self.url.uri(), endpoint.url().uri());
            endpoint.destroy();
        }
    }

    /// Runs `request` through the HA strategy.
    ///
    /// Business errors are returned as `Err`; every other failure becomes an
    /// error response carrying the request id.
    pub async fn call(&self, request: Request) -> Result<Response> {
        let request_id = request.id;
        if !self.is_available() {
            return Ok(Response::error(
                request_id,
                RpcError::framework(format!("service not available: {}", self.url.uri())),
            ));
        }

        match self.ha_strategy.call(request, self.load_balancer.as_ref()).await {
            Ok(response) => Ok(response),
            Err(e) if e.is_business() => Err(e),
            Err(e) => {
                debug!("Cluster {} call {} failed: {}", self.url.uri(), request_id, e);
                Ok(Response::error(request_id, &e))
            }
        }
    }

    /// Unsubscribes from every registry, destroys all endpoints and marks
    /// the cluster unavailable. Registry failures are logged and skipped.
    pub fn destroy(&self) {
        self.available.store(false, Ordering::Release);
        for registry_url in &self.registry_urls {
            let outcome = self.registries.get_registry(registry_url).and_then(|registry| {
                if let Some(listener) = self.listener.get() {
                    registry.unsubscribe(&self.url, listener)?;
                }
                registry.unregister(&self.url)
            });
            if let Err(e) = outcome {
                warn!(
                    "Unsubscribe or unregister failed for {} on registry {}: {}",
                    self.url.uri(),
                    registry_url.uri(),
                    e
                );
            }
        }

        let mut membership = self.membership.lock().unwrap_or_else(PoisonError::into_inner);
        self.publish(Arc::new(Vec::new()));
        for (_, endpoints) in membership.iter_mut() {
            for endpoint in endpoints.drain(..) {
                endpoint.destroy();
            }
        }
        info!("Cluster {} destroyed", self.url.uri());
    }

    pub fn url(&self) -> &Address {
        &self.url
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    /// The merged endpoint list the load balancer currently selects from.
    pub fn endpoints(&self) -> Endpoints {
        self.endpoints
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn load_balancer(&self) -> &Arc<dyn LoadBalancer> {
        &self.load_balancer
    }

    fn publish(&self, merged: Endpoints) {
        // Both handles take the same snapshot.
        self.load_balancer.set_endpoints(merged.clone());
        *self.endpoints.write().unwrap_or_else(PoisonError::into_inner) = merged;
    }

    fn listener(self: &Arc<Self>) -> Arc<dyn NotifyListener> {
        self.listener
            .get_or_init(|| {
                Arc::new(ClusterListener {
                    cluster: Arc::downgrade(self),
                })
            })
            .clone()
    }

    fn refer_url(&self, service_url: &Address) -> Address {
        let mut url = service_url.clone();
        for key in CALL_PARAMETERS {
            if let Some(value) = self.url.parameter(key) {
                url.set_parameter(key, value);
            }
        }
        url
    }

    fn registry_uris(&self) -> String {
        self.registry_urls
            .iter()
            .map(Address::uri)
            .collect::<Vec<_>>()
            .join(", ")
    }
}
