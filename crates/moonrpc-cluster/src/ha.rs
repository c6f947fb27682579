use async_trait::async_trait;
use moonrpc_common::address::param;
use moonrpc_common::protocol::error::Result;
use moonrpc_common::protocol::{Request, Response};
use tracing::warn;

use crate::load_balancer::LoadBalancer;

/// Failure handling policy around endpoint selection.
///
/// Strategies are stateless per call, so a single instance can be shared by
/// any number of clusters.
#[async_trait]
pub trait HaStrategy: Send + Sync {
    async fn call(&self, request: Request, load_balancer: &dyn LoadBalancer) -> Result<Response>;
}

/// Select once, call once, propagate any failure unchanged.
#[derive(Debug, Default)]
pub struct FailfastHaStrategy;

impl FailfastHaStrategy {
    pub const NAME: &'static str = "failfast";
}

#[async_trait]
impl HaStrategy for FailfastHaStrategy {
    async fn call(&self, request: Request, load_balancer: &dyn LoadBalancer) -> Result<Response> {
        let endpoint = load_balancer.select(&request)?;
        endpoint.call(request).await
    }
}

/// Retries framework failures up to the `retries` budget of the selected
/// endpoint.
///
/// Every attempt re-selects, so a small population may see the same
/// endpoint twice. Business errors are returned after the first attempt.
#[derive(Debug, Default)]
pub struct FailoverHaStrategy;

impl FailoverHaStrategy {
    pub const NAME: &'static str = "failover";
}

#[async_trait]
impl HaStrategy for FailoverHaStrategy {
    async fn call(&self, request: Request, load_balancer: &dyn LoadBalancer) -> Result<Response> {
        let retries = load_balancer
            .select(&request)?
            .url()
            .int_parameter(param::RETRIES, param::DEFAULT_RETRIES)
            .max(0) as u64;

        for attempt in 0..=retries {
            let endpoint = load_balancer.select(&request)?;
            match endpoint.call(request.clone()).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_business() || attempt >= retries => return Err(e),
                Err(e) => {
                    warn!(
                        "Failover attempt {}/{} for request {} ({}.{}) on {} failed: {}",
                        attempt + 1,
                        retries + 1,
                        request.id,
                        request.interface,
                        request.method,
                        endpoint.url().socket_addr(),
                        e
                    );
                }
            }
        }

        unreachable!("failover loop always returns on its last attempt")
    }
}
