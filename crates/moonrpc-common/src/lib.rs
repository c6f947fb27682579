//! moonrpc Common Types and Transport
//!
//! This crate provides the shared vocabulary of the moonrpc invocation core:
//!
//! - **Addresses**: [`Address`], the structured `protocol://host:port/path?params`
//!   descriptor with capability matching
//! - **Protocol Layer**: [`Request`], [`Response`], and the business/framework
//!   tagged error model ([`MoonrpcError`], [`RpcError`])
//! - **Transport Layer**: the fixed-header wire frame and the pluggable
//!   [`Codec`](transport::Codec) / [`Serializer`](transport::Serializer) pair
//! - **Extensions**: named strategy lookup ([`extension::ExtensionLoader`])
//! - **Registries**: the registry collaborator contract plus in-process
//!   `local` and `direct` registries
//!
//! # Example
//!
//! ```
//! use moonrpc_common::{Address, Request, Response};
//! use serde_json::json;
//!
//! let target: Address = "moon://127.0.0.1:9000/demo.UserService?version=1.0".parse().unwrap();
//! let request = Request::new(target.path(), "find")
//!     .with_arg("long", json!(7))
//!     .with_timeout(500);
//!
//! let response = Response::success(request.id, json!({"name": "ada"}));
//! assert!(response.is_success());
//! ```

pub mod address;
pub mod extension;
pub mod protocol;
pub mod registry;
pub mod transport;

pub use address::{param, Address};
pub use protocol::*;
pub use registry::{DefaultRegistryFactory, NotifyListener, Registry, RegistryFactory};
