//! Named extensions and the consumer-side reference configuration.

use moonrpc_client::{ClientConfig, MoonProtocol, Protocol};
use moonrpc_common::address::{param, Address};
use moonrpc_common::extension::{ExtensionLoader, Scope};
use moonrpc_common::protocol::error::{MoonrpcError, Result};
use moonrpc_common::registry::{DefaultRegistryFactory, RegistryFactory};
use moonrpc_common::transport::{default_serializers, DefaultCodec, Serializer};
use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

use crate::cluster::Cluster;
use crate::ha::{FailfastHaStrategy, FailoverHaStrategy, HaStrategy};
use crate::invoker::ProxyInvoker;
use crate::load_balancer::{LeastActiveLoadBalancer, LoadBalancer, RandomLoadBalancer, RoundRobinLoadBalancer};

/// Loaders for every pluggable role on the consumer side.
///
/// Load balancers are prototype scoped because each cluster owns its own
/// population; HA strategies and protocols are stateless singletons.
pub struct Extensions {
    pub serializers: Arc<ExtensionLoader<dyn Serializer>>,
    pub load_balancers: ExtensionLoader<dyn LoadBalancer>,
    pub ha_strategies: ExtensionLoader<dyn HaStrategy>,
    pub protocols: ExtensionLoader<dyn Protocol>,
}

impl Extensions {
    /// Built-in extensions with the default client configuration.
    pub fn with_defaults() -> Self {
        Self::with_client_config(ClientConfig::default())
    }

    /// Built-in extensions whose `moon` protocol uses `config`.
    pub fn with_client_config(config: ClientConfig) -> Self {
        let serializers = Arc::new(default_serializers());

        let load_balancers: ExtensionLoader<dyn LoadBalancer> = ExtensionLoader::new("load balancer");
        load_balancers.register(RandomLoadBalancer::NAME, Scope::Prototype, || {
            Arc::new(RandomLoadBalancer::new()) as Arc<dyn LoadBalancer>
        });
        load_balancers.register(RoundRobinLoadBalancer::NAME, Scope::Prototype, || {
            Arc::new(RoundRobinLoadBalancer::new()) as Arc<dyn LoadBalancer>
        });
        load_balancers.register(LeastActiveLoadBalancer::NAME, Scope::Prototype, || {
            Arc::new(LeastActiveLoadBalancer::new()) as Arc<dyn LoadBalancer>
        });

        let ha_strategies: ExtensionLoader<dyn HaStrategy> = ExtensionLoader::new("ha strategy");
        ha_strategies.register(FailoverHaStrategy::NAME, Scope::Singleton, || {
            Arc::new(FailoverHaStrategy) as Arc<dyn HaStrategy>
        });
        ha_strategies.register(FailfastHaStrategy::NAME, Scope::Singleton, || {
            Arc::new(FailfastHaStrategy) as Arc<dyn HaStrategy>
        });

        let protocols: ExtensionLoader<dyn Protocol> = ExtensionLoader::new("protocol");
        let codec_serializers = serializers.clone();
        protocols.register(MoonProtocol::NAME, Scope::Singleton, move || {
            let codec = Arc::new(DefaultCodec::with_serializers(codec_serializers.clone()));
            Arc::new(MoonProtocol::with_codec(config.clone(), codec)) as Arc<dyn Protocol>
        });

        Self {
            serializers,
            load_balancers,
            ha_strategies,
            protocols,
        }
    }

    /// Process-wide default extensions, created on first use.
    pub fn global() -> Arc<Extensions> {
        static GLOBAL: OnceLock<Arc<Extensions>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(Extensions::with_defaults())).clone()
    }
}

impl Default for Extensions {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Consumer configuration for one service interface.
///
/// [`refer`](Self::refer) builds one [`Cluster`] per configured protocol and
/// wraps them in a [`ProxyInvoker`].
///
/// # Default Configuration
///
/// - `version`: 1.0, `group`: default, `serialization`: json
/// - `request_timeout_ms`: 1000, `retries`: 0, `check`: true
/// - `load_balance`: random, `ha_strategy`: failover
/// - `protocols`: moon
///
/// # Example
///
/// ```no_run
/// use moonrpc_cluster::ReferenceConfig;
/// use moonrpc_common::Address;
///
/// # async fn demo() -> moonrpc_common::Result<()> {
/// let registry: Address = "direct://127.0.0.1:9100/registry".parse()?;
/// let mut reference = ReferenceConfig::new("moonrpc.demo.EchoService")
///     .with_registry(registry)
///     .with_retries(2);
/// let invoker = reference.refer()?;
/// let greeting: String = invoker.call(invoker.request("echo")).await?;
/// reference.destroy();
/// # Ok(())
/// # }
/// ```
pub struct ReferenceConfig {
    pub interface: String,
    pub registries: Vec<Address>,
    pub protocols: Vec<String>,
    pub application: String,
    pub host: String,
    pub version: String,
    pub group: String,
    pub serialization: String,
    pub request_timeout_ms: u64,
    pub retries: i64,
    pub check: bool,
    pub load_balance: String,
    pub ha_strategy: String,
    pub lenient: bool,
    pub declared_errors: BTreeSet<String>,
    registry_factory: Arc<dyn RegistryFactory>,
    extensions: Arc<Extensions>,
    clusters: Vec<Arc<Cluster>>,
    invoker: Option<Arc<ProxyInvoker>>,
}

impl ReferenceConfig {
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            registries: Vec::new(),
            protocols: vec![MoonProtocol::NAME.to_string()],
            application: "moonrpc".to_string(),
            host: "127.0.0.1".to_string(),
            version: param::DEFAULT_VERSION.to_string(),
            group: param::DEFAULT_GROUP.to_string(),
            serialization: param::DEFAULT_SERIALIZATION.to_string(),
            request_timeout_ms: param::DEFAULT_REQUEST_TIMEOUT_MS as u64,
            retries: param::DEFAULT_RETRIES,
            check: param::DEFAULT_CHECK,
            load_balance: param::DEFAULT_LOAD_BALANCE.to_string(),
            ha_strategy: param::DEFAULT_HA_STRATEGY.to_string(),
            lenient: false,
            declared_errors: BTreeSet::new(),
            registry_factory: DefaultRegistryFactory::global(),
            extensions: Extensions::global(),
            clusters: Vec::new(),
            invoker: None,
        }
    }

    pub fn with_registry(mut self, registry: Address) -> Self {
        self.registries.push(registry);
        self
    }

    pub fn with_protocols(mut self, protocols: Vec<String>) -> Self {
        self.protocols = protocols;
        self
    }

    pub fn with_application(mut self, application: impl Into<String>) -> Self {
        self.application = application.into();
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

    pub fn with_request_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.request_timeout_ms = timeout_ms;
        self
    }

    pub fn with_retries(mut self, retries: i64) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_check(mut self, check: bool) -> Self {
        self.check = check;
        self
    }

    pub fn with_load_balance(mut self, name: impl Into<String>) -> Self {
        self.load_balance = name.into();
        self
    }

    pub fn with_ha_strategy(mut self, name: impl Into<String>) -> Self {
        self.ha_strategy = name.into();
        self
    }

    pub fn with_leniency(mut self, lenient: bool) -> Self {
        self.lenient = lenient;
        self
    }

    pub fn declare_errors(mut self, method: impl Into<String>) -> Self {
        self.declared_errors.insert(method.into());
        self
    }

    pub fn with_registry_factory(mut self, factory: Arc<dyn RegistryFactory>) -> Self {
        self.registry_factory = factory;
        self
    }

    pub fn with_extensions(mut self, extensions: Arc<Extensions>) -> Self {
        self.extensions = extensions;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the interface, registries or protocols are
    /// missing, the timeout is zero, or a strategy name is unknown.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.interface.is_empty() {
            return Err("interface must not be empty".to_string());
        }
        if self.registries.is_empty() {
            return Err(format!("no registry configured for reference {}", self.interface));
        }
        if self.protocols.is_empty() {
            return Err(format!("no protocol configured for reference {}", self.interface));
        }
        if self.request_timeout_ms == 0 {
            return Err("request timeout must be greater than zero".to_string());
        }
        if !self.extensions.load_balancers.contains(&self.load_balance) {
            return Err(format!("unknown load balancer '{}'", self.load_balance));
        }
        if !self.extensions.ha_strategies.contains(&self.ha_strategy) {
            return Err(format!("unknown ha strategy '{}'", self.ha_strategy));
        }
        Ok(())
    }

    /// Consumer address used for `protocol`.
    pub fn consumer_url(&self, protocol: &str) -> Address {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        Address::new(protocol, self.host.clone(), 0, self.interface.clone())
            .with_parameter(param::APPLICATION, self.application.clone())
            .with_parameter(param::VERSION, self.version.clone())
            .with_parameter(param::GROUP, self.group.clone())
            .with_parameter(param::SERIALIZATION, self.serialization.clone())
            .with_parameter(param::SIDE, param::SIDE_CONSUMER)
            .with_parameter(param::REQUEST_TIMEOUT, self.request_timeout_ms.to_string())
            .with_parameter(param::RETRIES, self.retries.to_string())
            .with_parameter(param::CHECK, self.check.to_string())
            .with_parameter(param::LOAD_BALANCE, self.load_balance.clone())
            .with_parameter(param::HA_STRATEGY, self.ha_strategy.clone())
            .with_parameter(param::TIMESTAMP, timestamp.to_string())
    }

    /// Builds and initialises the clusters and returns the invoker.
    ///
    /// Repeated calls return the same invoker. If any cluster fails to
    /// initialise, the clusters built so far are destroyed.
    pub fn refer(&mut self) -> Result<Arc<ProxyInvoker>> {
        if let Some(invoker) = &self.invoker {
            return Ok(invoker.clone());
        }
        self.validate().map_err(MoonrpcError::Config)?;

        let mut clusters = Vec::with_capacity(self.protocols.len());
        for protocol in &self.protocols {
            match self.build_cluster(protocol) {
                Ok(cluster) => clusters.push(cluster),
                Err(e) => {
                    for cluster in &clusters {
                        cluster.destroy();
                    }
                    return Err(e);
                }
            }
        }

        let mut invoker = ProxyInvoker::new(self.interface.clone(), clusters.clone()).with_leniency(self.lenient);
        for method in &self.declared_errors {
            invoker = invoker.declare_errors(method.clone());
        }
        let invoker = Arc::new(invoker);

        info!(
            "Reference {} ready with {} cluster(s)",
            self.interface,
            clusters.len()
        );
        self.clusters = clusters;
        self.invoker = Some(invoker.clone());
        Ok(invoker)
    }

    fn build_cluster(&self, protocol_name: &str) -> Result<Arc<Cluster>> {
        let url = self.consumer_url(protocol_name);
        let protocol = self.extensions.protocols.get(url.protocol())?;
        let load_balancer = self
            .extensions
            .load_balancers
            .get(url.parameter_or(param::LOAD_BALANCE, param::DEFAULT_LOAD_BALANCE))?;
        let ha_strategy = self
            .extensions
            .ha_strategies
            .get(url.parameter_or(param::HA_STRATEGY, param::DEFAULT_HA_STRATEGY))?;

        let cluster = Cluster::new(
            url,
            self.registries.clone(),
            self.registry_factory.clone(),
            protocol,
            load_balancer,
            ha_strategy,
        );
        cluster.init()?;
        Ok(cluster)
    }

    pub fn clusters(&self) -> &[Arc<Cluster>] {
        &self.clusters
    }

    /// Destroys every cluster built by [`refer`](Self::refer).
    pub fn destroy(&mut self) {
        if self.clusters.is_empty() {
            warn!("Reference {} destroyed before refer", self.interface);
        }
        for cluster in self.clusters.drain(..) {
            cluster.destroy();
        }
        self.invoker = None;
    }
}
