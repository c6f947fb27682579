//! moonrpc Server
//!
//! This crate provides the provider side of moonrpc:
//!
//! - **Providers**: [`Provider`] and the closure-based [`ServiceProvider`]
//! - **Routing**: [`MessageRouter`], mapping `group/interface/version` service
//!   keys to providers
//! - **Execution**: [`WorkerPool`], the bounded pool that runs business code
//!   and rejects work with a "server busy" error instead of queueing without
//!   bound
//! - **Transport**: [`TransportServer`], the framed TCP server
//! - **Export**: [`ServerProtocol`] / [`Exporter`] and the declarative
//!   [`ServiceConfig`]

pub mod config;
pub mod exporter;
pub mod provider;
pub mod router;
pub mod server;
pub mod worker_pool;

pub use config::{ServerConfig, ServiceConfig, WorkerPoolConfig};
pub use exporter::{Exporter, ServerProtocol};
pub use provider::{MethodHandler, Provider, ServiceProvider};
pub use router::{request_service_key, MessageRouter};
pub use server::TransportServer;
pub use worker_pool::WorkerPool;
