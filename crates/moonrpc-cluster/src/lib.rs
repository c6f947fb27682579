pub mod cluster;
pub mod config;
pub mod ha;
pub mod invoker;
pub mod load_balancer;

#[cfg(test)]
mod test_support;

pub use cluster::Cluster;
pub use config::{Extensions, ReferenceConfig};
pub use ha::{FailfastHaStrategy, FailoverHaStrategy, HaStrategy};
pub use invoker::ProxyInvoker;
pub use load_balancer::{
    Endpoints, LeastActiveLoadBalancer, LoadBalancer, RandomLoadBalancer, RoundRobinLoadBalancer,
};
