//! Server-side configuration and the provider-side service configuration.
//!
//! Pool and server settings can be built programmatically or derived from
//! the parameters of an export address (`maxWorkerThread`, `workerQueueSize`).

use moonrpc_common::address::{param, Address};
use moonrpc_common::protocol::error::{MoonrpcError, Result};
use moonrpc_common::registry::{DefaultRegistryFactory, Registry, RegistryFactory};
use moonrpc_common::transport::DEFAULT_MAX_FRAME_SIZE;
use std::sync::Arc;
use tracing::{info, warn};

use crate::exporter::{Exporter, ServerProtocol};
use crate::provider::Provider;

/// Bounds of the worker pool that runs business code.
///
/// # Fields
///
/// - `max_workers` - Requests executing concurrently (default: 200)
/// - `queue_capacity` - Requests admitted beyond `max_workers` that wait
///   for a worker (default: 0, reject as soon as every worker is busy)
///
/// # Example
///
/// ```
/// use moonrpc_server::WorkerPoolConfig;
///
/// let config = WorkerPoolConfig::new()
///     .with_max_workers(16)
///     .with_queue_capacity(64);
/// assert_eq!(config.capacity(), 80);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerPoolConfig {
    pub max_workers: usize,
    pub queue_capacity: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            max_workers: param::DEFAULT_MAX_WORKER_THREAD as usize,
            queue_capacity: param::DEFAULT_WORKER_QUEUE_SIZE as usize,
        }
    }
}

impl WorkerPoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads `maxWorkerThread` and `workerQueueSize` from `url`.
    ///
    /// Negative values are clamped to zero and caught by [`validate`](Self::validate).
    pub fn from_address(url: &Address) -> Self {
        let max_workers = url.int_parameter(param::MAX_WORKER_THREAD, param::DEFAULT_MAX_WORKER_THREAD);
        let queue_capacity = url.int_parameter(param::WORKER_QUEUE_SIZE, param::DEFAULT_WORKER_QUEUE_SIZE);
        Self {
            max_workers: max_workers.max(0) as usize,
            queue_capacity: queue_capacity.max(0) as usize,
        }
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    /// Total number of requests the pool admits at once.
    pub fn capacity(&self) -> usize {
        self.max_workers + self.queue_capacity
    }

    /// Validates the pool bounds.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `max_workers` is zero
    /// - `max_workers` exceeds 10000
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.max_workers == 0 {
            return Err("max workers must be greater than zero".to_string());
        }

        if self.max_workers > 10_000 {
            return Err(format!(
                "max workers must be <= 10000 (got {})",
                self.max_workers
            ));
        }

        Ok(())
    }
}

/// Configuration of one [`TransportServer`](crate::TransportServer).
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Largest request body accepted before the connection is dropped
    pub max_frame_size: usize,
    pub pool: WorkerPoolConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            pool: WorkerPoolConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_address(url: &Address) -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            pool: WorkerPoolConfig::from_address(url),
        }
    }

    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    pub fn with_pool(mut self, pool: WorkerPoolConfig) -> Self {
        self.pool = pool;
        self
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.max_frame_size == 0 {
            return Err("max frame size must be greater than zero".to_string());
        }
        self.pool.validate()
    }
}

/// Provider configuration for one service interface.
///
/// [`export`](Self::export) publishes the provider on its protocol address
/// and registers the bound address with every configured registry.
///
/// # Default Configuration
///
/// - `host`: 127.0.0.1, `port`: 0 (ephemeral)
/// - `version`: 1.0, `group`: default, `serialization`: json
/// - `max_workers`: 200, `queue_capacity`: 0
///
/// # Example
///
/// ```no_run
/// use moonrpc_common::Address;
/// use moonrpc_server::{ServiceConfig, ServiceProvider};
/// use std::sync::Arc;
///
/// # async fn demo() -> moonrpc_common::Result<()> {
/// let provider = ServiceProvider::new("moonrpc.demo.EchoService")
///     .method("echo", &["String"], |args| Ok(args[0].clone()));
/// let registry: Address = "local://127.0.0.1/registry".parse()?;
///
/// let mut service = ServiceConfig::new(Arc::new(provider))
///     .with_port(9100)
///     .with_registry(registry);
/// let url = service.export().await?;
/// println!("serving on {}", url);
/// service.unexport().await;
/// # Ok(())
/// # }
/// ```
pub struct ServiceConfig {
    pub interface: String,
    pub registries: Vec<Address>,
    pub protocol: String,
    pub application: String,
    pub host: String,
    pub port: u16,
    pub version: String,
    pub group: String,
    pub serialization: String,
    pub pool: WorkerPoolConfig,
    provider: Arc<dyn Provider>,
    registry_factory: Arc<dyn RegistryFactory>,
    server_protocol: Arc<ServerProtocol>,
    exporter: Option<Exporter>,
    registered: Vec<Arc<dyn Registry>>,
}

impl ServiceConfig {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self {
            interface: provider.interface().to_string(),
            registries: Vec::new(),
            protocol: ServerProtocol::NAME.to_string(),
            application: "moonrpc".to_string(),
            host: "127.0.0.1".to_string(),
            port: 0,
            version: param::DEFAULT_VERSION.to_string(),
            group: param::DEFAULT_GROUP.to_string(),
            serialization: param::DEFAULT_SERIALIZATION.to_string(),
            pool: WorkerPoolConfig::default(),
            provider,
            registry_factory: DefaultRegistryFactory::global(),
            server_protocol: ServerProtocol::global(),
            exporter: None,
            registered: Vec::new(),
        }
    }

    pub fn with_registry(mut self, registry: Address) -> Self {
        self.registries.push(registry);
        self
    }

    pub fn with_application(mut self, application: impl Into<String>) -> Self {
        self.application = application.into();
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    pub fn with_serialization(mut self, serialization: impl Into<String>) -> Self {
        self.serialization = serialization.into();
        self
    }

    pub fn with_pool(mut self, pool: WorkerPoolConfig) -> Self {
        self.pool = pool;
        self
    }

    pub fn with_registry_factory(mut self, factory: Arc<dyn RegistryFactory>) -> Self {
        self.registry_factory = factory;
        self
    }

    pub fn with_server_protocol(mut self, protocol: Arc<ServerProtocol>) -> Self {
        self.server_protocol = protocol;
        self
    }

    /// Validates the configuration.
    ///
    /// Registries are optional: a service without one is reachable only
    /// through a `direct` reference.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.interface.is_empty() {
            return Err("interface must not be empty".to_string());
        }
        if self.host.is_empty() {
            return Err(format!("no host configured for service {}", self.interface));
        }
        self.pool.validate()
    }

    /// Address the service is exported at, before the port is bound.
    pub fn service_url(&self) -> Address {
        Address::new(self.protocol.clone(), self.host.clone(), self.port, self.interface.clone())
            .with_parameter(param::APPLICATION, self.application.clone())
            .with_parameter(param::VERSION, self.version.clone())
            .with_parameter(param::GROUP, self.group.clone())
            .with_parameter(param::SERIALIZATION, self.serialization.clone())
            .with_parameter(param::SIDE, param::SIDE_PROVIDER)
            .with_parameter(param::MAX_WORKER_THREAD, self.pool.max_workers.to_string())
            .with_parameter(param::WORKER_QUEUE_SIZE, self.pool.queue_capacity.to_string())
    }

    /// Bound address once exported.
    pub fn exported_url(&self) -> Option<&Address> {
        self.exporter.as_ref().map(Exporter::url)
    }

    /// Exports the provider and registers the bound address.
    ///
    /// Repeated calls return the bound address of the first export. A
    /// registration failure withdraws the export and is returned.
    pub async fn export(&mut self) -> Result<Address> {
        if let Some(url) = self.exported_url() {
            return Ok(url.clone());
        }
        self.validate().map_err(MoonrpcError::Config)?;

        let exporter = self
            .server_protocol
            .export(&self.service_url(), self.provider.clone())
            .await?;
        let url = exporter.url().clone();

        for registry_url in &self.registries {
            let outcome = self
                .registry_factory
                .get_registry(registry_url)
                .and_then(|registry| registry.register(&url).map(|_| registry));
            match outcome {
                Ok(registry) => self.registered.push(registry),
                Err(e) => {
                    self.withdraw(&url);
                    exporter.unexport().await;
                    return Err(e);
                }
            }
        }

        info!(
            "Service {} exported at {} and registered with {} registry(ies)",
            self.interface,
            url,
            self.registered.len()
        );
        self.exporter = Some(exporter);
        Ok(url)
    }

    /// Unregisters the service and withdraws the export.
    ///
    /// Registry failures are logged and do not stop the remaining steps.
    pub async fn unexport(&mut self) {
        let exporter = match self.exporter.take() {
            Some(exporter) => exporter,
            None => {
                warn!("Service {} unexported before export", self.interface);
                return;
            }
        };
        self.withdraw(exporter.url());
        exporter.unexport().await;
        info!("Service {} unexported", self.interface);
    }

    fn withdraw(&mut self, url: &Address) {
        for registry in self.registered.drain(..) {
            if let Err(e) = registry.unregister(url) {
                warn!(
                    "Unregister failed for {} on registry {}: {}",
                    url,
                    registry.url().uri(),
                    e
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ServiceProvider;
    use moonrpc_common::registry::{LocalRegistry, NotifyListener};

    #[test]
    fn test_default_pool_config() {
        let config = WorkerPoolConfig::default();
        assert_eq!(config.max_workers, 200);
        assert_eq!(config.queue_capacity, 0);
        assert_eq!(config.capacity(), 200);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_pool_config_from_address() {
        let url: Address = "moon://0.0.0.0:9000/demo.EchoService?maxWorkerThread=8&workerQueueSize=4"
            .parse()
            .unwrap();
        let config = WorkerPoolConfig::from_address(&url);
        assert_eq!(config.max_workers, 8);
        assert_eq!(config.queue_capacity, 4);
    }

    #[test]
    fn test_negative_parameters_clamped_and_rejected() {
        let url: Address = "moon://0.0.0.0:9000/demo.EchoService?maxWorkerThread=-3"
            .parse()
            .unwrap();
        let config = WorkerPoolConfig::from_address(&url);
        assert_eq!(config.max_workers, 0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_upper_bound() {
        assert!(WorkerPoolConfig::new().with_max_workers(10_000).validate().is_ok());
        assert!(WorkerPoolConfig::new().with_max_workers(10_001).validate().is_err());
    }

    #[test]
    fn test_server_config() {
        let config = ServerConfig::new()
            .with_max_frame_size(1024)
            .with_pool(WorkerPoolConfig::new().with_max_workers(2));
        assert_eq!(config.max_frame_size, 1024);
        assert_eq!(config.pool.max_workers, 2);
        assert!(config.validate().is_ok());
        assert!(ServerConfig::new().with_max_frame_size(0).validate().is_err());
    }

    fn echo_provider() -> Arc<dyn Provider> {
        Arc::new(ServiceProvider::new("demo.EchoService").method("echo", &["String"], |args| Ok(args[0].clone())))
    }

    fn service(registry: &Address) -> ServiceConfig {
        ServiceConfig::new(echo_provider())
            .with_registry(registry.clone())
            .with_version("2.0")
            .with_registry_factory(Arc::new(DefaultRegistryFactory::new()))
            .with_server_protocol(Arc::new(ServerProtocol::new()))
    }

    /// Registry whose every operation fails.
    struct Unreachable(Address);

    impl Registry for Unreachable {
        fn url(&self) -> &Address {
            &self.0
        }

        fn register(&self, _: &Address) -> Result<()> {
            Err(MoonrpcError::Registry("unreachable".into()))
        }

        fn unregister(&self, _: &Address) -> Result<()> {
            Err(MoonrpcError::Registry("unreachable".into()))
        }

        fn subscribe(&self, _: &Address, _: Arc<dyn NotifyListener>) -> Result<()> {
            Err(MoonrpcError::Registry("unreachable".into()))
        }

        fn unsubscribe(&self, _: &Address, _: &Arc<dyn NotifyListener>) -> Result<()> {
            Err(MoonrpcError::Registry("unreachable".into()))
        }

        fn discover(&self, _: &Address) -> Result<Vec<Address>> {
            Err(MoonrpcError::Registry("unreachable".into()))
        }
    }

    /// Hands out one shared registry per protocol for the tests.
    struct Registries {
        local: Arc<LocalRegistry>,
        broken: Arc<Unreachable>,
    }

    impl RegistryFactory for Registries {
        fn get_registry(&self, url: &Address) -> Result<Arc<dyn Registry>> {
            match url.protocol() {
                "local" => Ok(self.local.clone()),
                _ => Ok(self.broken.clone()),
            }
        }
    }

    #[test]
    fn test_service_url_parameters() {
        let registry = Address::new("local", "svc", 0, "registry");
        let service = service(&registry)
            .with_group("blue")
            .with_pool(WorkerPoolConfig::new().with_max_workers(8));
        let url = service.service_url();

        assert_eq!(url.protocol(), "moon");
        assert_eq!(url.path(), "demo.EchoService");
        assert_eq!(url.version(), "2.0");
        assert_eq!(url.group(), "blue");
        assert_eq!(url.parameter(param::SIDE), Some(param::SIDE_PROVIDER));
        assert_eq!(WorkerPoolConfig::from_address(&url).max_workers, 8);
        assert!(service.validate().is_ok());
    }

    #[tokio::test]
    async fn test_export_registers_bound_url() {
        let local = Arc::new(LocalRegistry::new(Address::new("local", "svc", 0, "registry")));
        let factory = Arc::new(Registries {
            local: local.clone(),
            broken: Arc::new(Unreachable(Address::new("broken", "svc", 0, "registry"))),
        });
        let mut service = service(local.url()).with_registry_factory(factory);

        let url = service.export().await.unwrap();
        assert_ne!(url.port(), 0);
        assert_eq!(service.exported_url(), Some(&url));
        assert_eq!(local.discover(&url).unwrap(), vec![url.clone()]);

        // Exporting again returns the same address.
        assert_eq!(service.export().await.unwrap(), url);

        service.unexport().await;
        assert!(service.exported_url().is_none());
        assert!(local.discover(&url).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_registration_failure_withdraws_export() {
        let local = Arc::new(LocalRegistry::new(Address::new("local", "svc", 0, "registry")));
        let protocol = Arc::new(ServerProtocol::new());
        let factory = Arc::new(Registries {
            local: local.clone(),
            broken: Arc::new(Unreachable(Address::new("broken", "svc", 0, "registry"))),
        });
        let mut service = service(local.url())
            .with_registry(Address::new("broken", "svc", 0, "registry"))
            .with_registry_factory(factory)
            .with_server_protocol(protocol.clone());

        let err = service.export().await.unwrap_err();
        assert!(matches!(err, MoonrpcError::Registry(_)));
        assert!(service.exported_url().is_none());
        assert_eq!(protocol.exported_count().await, 0);
        assert!(local.discover(&service.service_url()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unexport_before_export_is_noop() {
        let registry = Address::new("local", "svc", 0, "registry");
        let mut service = service(&registry);
        service.unexport().await;
        assert!(service.exported_url().is_none());
    }
}
