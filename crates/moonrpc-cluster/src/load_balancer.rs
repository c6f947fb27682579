use moonrpc_client::Endpoint;
use moonrpc_common::protocol::error::{MoonrpcError, Result};
use moonrpc_common::protocol::Request;
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Immutable population snapshot shared by a cluster and its balancer.
pub type Endpoints = Arc<Vec<Arc<dyn Endpoint>>>;

/// Selection over the live endpoint set of one cluster.
pub trait LoadBalancer: Send + Sync {
    /// Replaces the selection population in one step.
    fn set_endpoints(&self, endpoints: Endpoints);

    /// The population currently selected from.
    fn endpoints(&self) -> Endpoints;

    /// Picks one endpoint for `request`.
    ///
    /// # Errors
    ///
    /// Returns [`MoonrpcError::NoEndpoint`] if the population is empty.
    fn select(&self, request: &Request) -> Result<Arc<dyn Endpoint>>;
}

/// Population holder shared by the built-in balancers.
///
/// Writers swap in a whole new `Arc<Vec<_>>`, so a reader holds either the
/// old or the new list and never a partially updated one.
#[derive(Default)]
struct Population {
    endpoints: RwLock<Endpoints>,
}

impl Population {
    fn set(&self, endpoints: Endpoints) {
        *self.endpoints.write().unwrap_or_else(PoisonError::into_inner) = endpoints;
    }

    fn snapshot(&self) -> Endpoints {
        self.endpoints
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn non_empty(&self, request: &Request) -> Result<Endpoints> {
        let endpoints = self.snapshot();
        if endpoints.is_empty() {
            return Err(MoonrpcError::NoEndpoint(format!(
                "no endpoint for {}.{}",
                request.interface, request.method
            )));
        }
        Ok(endpoints)
    }
}

/// Uniform random selection.
#[derive(Default)]
pub struct RandomLoadBalancer {
    population: Population,
}

impl RandomLoadBalancer {
    pub const NAME: &'static str = "random";

    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for RandomLoadBalancer {
    fn set_endpoints(&self, endpoints: Endpoints) {
        self.population.set(endpoints);
    }

    fn endpoints(&self) -> Endpoints {
        self.population.snapshot()
    }

    fn select(&self, request: &Request) -> Result<Arc<dyn Endpoint>> {
        let endpoints = self.population.non_empty(request)?;
        let index = rand::thread_rng().gen_range(0..endpoints.len());
        Ok(endpoints[index].clone())
    }
}

/// Round-robin selection over the current population.
///
/// The cursor survives population changes; after a change the rotation
/// simply continues modulo the new length.
#[derive(Default)]
pub struct RoundRobinLoadBalancer {
    population: Population,
    cursor: AtomicUsize,
}

impl RoundRobinLoadBalancer {
    pub const NAME: &'static str = "roundrobin";

    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for RoundRobinLoadBalancer {
    fn set_endpoints(&self, endpoints: Endpoints) {
        self.population.set(endpoints);
    }

    fn endpoints(&self) -> Endpoints {
        self.population.snapshot()
    }

    fn select(&self, request: &Request) -> Result<Arc<dyn Endpoint>> {
        let endpoints = self.population.non_empty(request)?;
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % endpoints.len();
        Ok(endpoints[index].clone())
    }
}

/// Picks the endpoint with the fewest in-flight calls, breaking ties at
/// random.
#[derive(Default)]
pub struct LeastActiveLoadBalancer {
    population: Population,
}

impl LeastActiveLoadBalancer {
    pub const NAME: &'static str = "leastactive";

    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for LeastActiveLoadBalancer {
    fn set_endpoints(&self, endpoints: Endpoints) {
        self.population.set(endpoints);
    }

    fn endpoints(&self) -> Endpoints {
        self.population.snapshot()
    }

    fn select(&self, request: &Request) -> Result<Arc<dyn Endpoint>> {
        let endpoints = self.population.non_empty(request)?;

        let mut least = usize::MAX;
        let mut candidates: Vec<&Arc<dyn Endpoint>> = Vec::new();
        for endpoint in endpoints.iter() {
            let active = endpoint.active_count();
            if active < least {
                least = active;
                candidates.clear();
            }
            if active == least {
                candidates.push(endpoint);
            }
        }

        let index = rand::thread_rng().gen_range(0..candidates.len());
        Ok(candidates[index].clone())
    }
}
