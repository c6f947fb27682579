//! # moonrpc CLI
//!
//! Command-line demo for the moonrpc invocation core.
//!
//! - `moonrpc serve`: export the built-in [`ECHO_SERVICE`] on a TCP address
//! - `moonrpc call`: call a method through a `direct://` registry and print
//!   the JSON result (raw output for scripting)
//!
//! The pieces the binary is made of live here so they can be tested without
//! spawning processes.

use anyhow::{anyhow, Result};
use moonrpc_cluster::ReferenceConfig;
use moonrpc_common::{param, Address, MoonrpcError};
use moonrpc_server::{ServiceConfig, ServiceProvider, WorkerPoolConfig};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;

/// Interface name of the demo service.
pub const ECHO_SERVICE: &str = "moonrpc.demo.EchoService";

/// The demo service: `echo(String)`, `add(int, int)` and `fail(String)`,
/// which always raises a business error with the given message.
pub fn echo_service() -> ServiceProvider {
    ServiceProvider::new(ECHO_SERVICE)
        .method("echo", &["String"], |args| Ok(args[0].clone()))
        .method("add", &["int", "int"], |args| {
            let a = int_arg(args, 0)?;
            let b = int_arg(args, 1)?;
            a.checked_add(b)
                .map(|sum| json!(sum))
                .ok_or_else(|| MoonrpcError::business(format!("{} + {} overflows", a, b)))
        })
        .method("fail", &["String"], |args| {
            Err(MoonrpcError::business(args[0].as_str().unwrap_or("failure requested")))
        })
}

fn int_arg(args: &[Value], index: usize) -> moonrpc_common::Result<i64> {
    args.get(index)
        .and_then(Value::as_i64)
        .ok_or_else(|| MoonrpcError::business(format!("argument {} is not an int", index)))
}

/// Declared parameter type for a JSON argument, matching the names the
/// demo service registers its methods with.
pub fn param_type_of(value: &Value) -> &'static str {
    match value {
        Value::String(_) => "String",
        Value::Number(n) if n.is_i64() || n.is_u64() => "int",
        Value::Number(_) => "double",
        Value::Bool(_) => "boolean",
        Value::Array(_) => "List",
        Value::Object(_) | Value::Null => "Object",
    }
}

/// Parses positional JSON arguments; bare words are taken as strings.
pub fn parse_args(raw: &[String]) -> Vec<Value> {
    raw.iter()
        .map(|arg| serde_json::from_str(arg).unwrap_or_else(|_| Value::String(arg.clone())))
        .collect()
}

/// Exports the demo service on `bind` and registers it with `registries`.
pub async fn serve(bind: &str, registries: &[String], max_workers: usize) -> Result<ServiceConfig> {
    let addr: SocketAddr = bind
        .parse()
        .map_err(|e| anyhow!("Invalid bind address {}: {}", bind, e))?;

    let mut service = ServiceConfig::new(Arc::new(echo_service()))
        .with_host(addr.ip().to_string())
        .with_port(addr.port())
        .with_pool(WorkerPoolConfig::new().with_max_workers(max_workers));
    for registry in registries {
        let registry: Address = registry.parse()?;
        service = service.with_registry(registry);
    }

    service.export().await?;
    Ok(service)
}

/// Where and how `moonrpc call` reaches its service.
#[derive(Debug, Clone, PartialEq)]
pub struct CallTarget {
    pub registry: Address,
    pub interface: String,
}

impl CallTarget {
    /// Parses `direct://host:port[/interface]`; the interface defaults to
    /// the demo service.
    pub fn parse(target: &str) -> Result<Self> {
        let address: Address = target.parse()?;
        if address.protocol() != "direct" {
            return Err(anyhow!(
                "Invalid target '{}': expected direct://host:port[/interface]",
                target
            ));
        }
        let interface = if address.path().is_empty() {
            ECHO_SERVICE.to_string()
        } else {
            address.path().to_string()
        };
        Ok(Self {
            registry: address.with_path(""),
            interface,
        })
    }
}

/// Calls `method` once and returns its result.
pub async fn call(target: &CallTarget, method: &str, args: Vec<Value>, timeout_ms: u64, retries: i64) -> Result<Value> {
    let mut reference = ReferenceConfig::new(target.interface.clone())
        .with_registry(target.registry.clone())
        .with_request_timeout_ms(timeout_ms)
        .with_retries(retries)
        .with_ha_strategy(if retries > 0 { "failover" } else { "failfast" });

    let invoker = reference.refer()?;
    let request = args
        .into_iter()
        .fold(invoker.request(method), |request, arg| {
            request.with_arg(param_type_of(&arg), arg)
        })
        .with_attachment(param::APPLICATION, "moonrpc-cli");

    let outcome = invoker.invoke(request).await;
    reference.destroy();
    Ok(outcome?)
}

#[cfg(test)]
mod tests;
