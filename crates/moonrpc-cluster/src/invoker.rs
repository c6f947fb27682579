use moonrpc_common::address::param;
use moonrpc_common::protocol::error::{MoonrpcError, Result};
use moonrpc_common::protocol::{CallKind, Request};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{error, warn};

use crate::cluster::Cluster;

/// Client-facing entry point for one service interface.
///
/// Builds requests for the interface, drives them through the configured
/// clusters in order and maps the response back to a value or an error.
///
/// # Leniency
///
/// With leniency enabled, a framework failure on a method that does not
/// declare errors (see [`declare_errors`](Self::declare_errors)) is logged
/// and replaced by a default value: `null` from [`invoke`](Self::invoke),
/// `T::default()` from [`call`](Self::call). Business errors are always
/// returned.
///
/// # Example
///
/// ```no_run
/// # use moonrpc_cluster::ProxyInvoker;
/// # use serde_json::json;
/// # async fn demo(invoker: ProxyInvoker) -> moonrpc_common::Result<()> {
/// let request = invoker
///     .request("add")
///     .with_arg("int", json!(2))
///     .with_arg("int", json!(3));
/// let sum: i64 = invoker.call(request).await?;
/// # Ok(())
/// # }
/// ```
pub struct ProxyInvoker {
    interface: String,
    clusters: Vec<Arc<Cluster>>,
    lenient: bool,
    declared: HashSet<String>,
}

impl ProxyInvoker {
    pub fn new(interface: impl Into<String>, clusters: Vec<Arc<Cluster>>) -> Self {
        Self {
            interface: interface.into(),
            clusters,
            lenient: false,
            declared: HashSet::new(),
        }
    }

    /// Enables or disables default values on framework failures.
    pub fn with_leniency(mut self, lenient: bool) -> Self {
        self.lenient = lenient;
        self
    }

    /// Marks `method` as declaring its errors; its failures are never
    /// replaced by a default value.
    pub fn declare_errors(mut self, method: impl Into<String>) -> Self {
        self.declared.insert(method.into());
        self
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn clusters(&self) -> &[Arc<Cluster>] {
        &self.clusters
    }

    pub fn is_lenient(&self) -> bool {
        self.lenient
    }

    /// Starts a synchronous request for `method` on this interface with a
    /// fresh request id.
    pub fn request(&self, method: impl Into<String>) -> Request {
        Request::new(self.interface.clone(), method).with_kind(CallKind::Sync)
    }

    /// Sends `request` and returns the raw result value.
    pub async fn invoke(&self, request: Request) -> Result<Value> {
        Ok(self.dispatch(request).await?.unwrap_or(Value::Null))
    }

    /// Sends `request` and deserializes the result into `T`.
    pub async fn call<T>(&self, request: Request) -> Result<T>
    where
        T: DeserializeOwned + Default,
    {
        match self.dispatch(request).await? {
            Some(value) => serde_json::from_value(value)
                .map_err(|e| MoonrpcError::Serialization(format!("cannot decode result: {}", e))),
            None => Ok(T::default()),
        }
    }

    /// Returns `None` when a failure was replaced by a default value.
    async fn dispatch(&self, mut request: Request) -> Result<Option<Value>> {
        let lenient = self.lenient && !self.declared.contains(&request.method);

        for (index, cluster) in self.clusters.iter().enumerate() {
            let url = cluster.url();
            request
                .attachments
                .insert(param::VERSION.to_string(), url.version().to_string());
            request
                .attachments
                .insert(param::GROUP.to_string(), url.group().to_string());

            let outcome = match cluster.call(request.clone()).await {
                Ok(response) => response.into_value(),
                Err(e) => Err(e),
            };

            match outcome {
                Ok(value) => return Ok(Some(value)),
                Err(e) if e.is_business() => return Err(e),
                Err(e) if index + 1 < self.clusters.len() => {
                    warn!(
                        "Call {}.{} failed on {}, trying next cluster: {}",
                        self.interface,
                        request.method,
                        url.uri(),
                        e
                    );
                }
                Err(e) if lenient => {
                    warn!(
                        "Call {}.{} failed on {}, returning default value: {}",
                        self.interface,
                        request.method,
                        url.uri(),
                        e
                    );
                    return Ok(None);
                }
                Err(e) => {
                    error!("Call {}.{} failed on {}: {}", self.interface, request.method, url.uri(), e);
                    return Err(e);
                }
            }
        }

        Err(MoonrpcError::Config(format!(
            "cluster not exist, interface={}",
            self.interface
        )))
    }
}
