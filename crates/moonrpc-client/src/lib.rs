//! Client side of the moonrpc transport.
//!
//! [`TransportClient`] owns one lazily established connection per provider
//! address and correlates responses to pending calls by request id.
//! [`ReferenceEndpoint`] wraps a client as a callable target for load
//! balancing, and [`MoonProtocol`] builds endpoints from addresses.

pub mod client;
pub mod connection;
pub mod correlator;
pub mod endpoint;
pub mod protocol;

#[cfg(test)]
mod test_support;

pub use client::{ClientConfig, TransportClient};
pub use connection::{Connection, ConnectionManager};
pub use correlator::{RequestCorrelator, ResponseFuture, DEFAULT_SWEEP_INTERVAL};
pub use endpoint::{Endpoint, ReferenceEndpoint};
pub use protocol::{MoonProtocol, Protocol};
