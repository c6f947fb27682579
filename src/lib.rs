//! moonrpc
//!
//! Registry-driven RPC invocation core. This crate re-exports the member
//! crates so applications can depend on one package:
//!
//! - [`common`]: addresses, protocol types, wire frame, codec, registries
//! - [`client`]: request correlation, connections, reference endpoints
//! - [`cluster`]: load balancing, HA strategies, clusters, proxy invoker
//! - [`server`]: providers, routing, worker pool, transport server, export
//!
//! # Example
//!
//! ```no_run
//! use moonrpc::{Address, ReferenceConfig, ServiceConfig, ServiceProvider};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn demo() -> moonrpc::Result<()> {
//! let registry: Address = "local://127.0.0.1/registry".parse()?;
//!
//! let provider = ServiceProvider::new("demo.Greeter")
//!     .method("greet", &["String"], |args| Ok(json!(format!("hello {}", args[0]))));
//! let mut service = ServiceConfig::new(Arc::new(provider)).with_registry(registry.clone());
//! service.export().await?;
//!
//! let mut reference = ReferenceConfig::new("demo.Greeter").with_registry(registry);
//! let invoker = reference.refer()?;
//! let greeting: String = invoker
//!     .call(invoker.request("greet").with_arg("String", json!("moon")))
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub use moonrpc_client as client;
pub use moonrpc_cluster as cluster;
pub use moonrpc_common as common;
pub use moonrpc_server as server;

pub use moonrpc_client::{ClientConfig, Endpoint, MoonProtocol, Protocol, ReferenceEndpoint, TransportClient};
pub use moonrpc_cluster::{Cluster, HaStrategy, LoadBalancer, ProxyInvoker, ReferenceConfig};
pub use moonrpc_common::{
    param, Address, CallKind, ErrorKind, MoonrpcError, Request, Response, Result, RpcError,
};
pub use moonrpc_server::{Provider, ServerProtocol, ServiceConfig, ServiceProvider, TransportServer};
