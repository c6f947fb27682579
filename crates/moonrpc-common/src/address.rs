//! Structured service addresses.
//!
//! An [`Address`] names a protocol endpoint plus the service it exposes and
//! carries a flat bag of string parameters (version, group, serialization,
//! timeouts, retry budget and so on). The textual form is
//!
//! ```text
//! protocol://host:port/servicePath?k1=v1&k2=v2
//! ```
//!
//! Addresses are values: deriving a variant with different parameters clones
//! the parameter map, and shared addresses are never mutated.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::protocol::error::{MoonrpcError, Result};

/// Well-known parameter names and their defaults.
pub mod param {
    pub const VERSION: &str = "version";
    pub const DEFAULT_VERSION: &str = "1.0";

    pub const GROUP: &str = "group";
    pub const DEFAULT_GROUP: &str = "default";

    pub const SERIALIZATION: &str = "serialization";
    pub const DEFAULT_SERIALIZATION: &str = "json";

    pub const REQUEST_TIMEOUT: &str = "requestTimeout";
    pub const DEFAULT_REQUEST_TIMEOUT_MS: i64 = 1000;

    pub const RETRIES: &str = "retries";
    pub const DEFAULT_RETRIES: i64 = 0;

    pub const CHECK: &str = "check";
    pub const DEFAULT_CHECK: bool = true;

    pub const LOAD_BALANCE: &str = "loadbalance";
    pub const DEFAULT_LOAD_BALANCE: &str = "random";

    pub const HA_STRATEGY: &str = "haStrategy";
    pub const DEFAULT_HA_STRATEGY: &str = "failover";

    pub const MAX_WORKER_THREAD: &str = "maxWorkerThread";
    pub const DEFAULT_MAX_WORKER_THREAD: i64 = 200;

    pub const WORKER_QUEUE_SIZE: &str = "workerQueueSize";
    pub const DEFAULT_WORKER_QUEUE_SIZE: i64 = 0;

    pub const SIDE: &str = "side";
    pub const SIDE_PROVIDER: &str = "provider";
    pub const SIDE_CONSUMER: &str = "consumer";

    pub const APPLICATION: &str = "application";
    pub const TIMESTAMP: &str = "timestamp";
}

/// A protocol endpoint together with the service it serves and its
/// parameters.
///
/// Equality and hashing are structural over every field, including the full
/// parameter map.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    protocol: String,
    host: String,
    port: u16,
    path: String,
    parameters: BTreeMap<String, String>,
}

impl Address {
    pub fn new(
        protocol: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        path: impl Into<String>,
    ) -> Self {
        Address {
            protocol: protocol.into(),
            host: host.into(),
            port,
            path: path.into(),
            parameters: BTreeMap::new(),
        }
    }

    /// Parses the textual address form.
    ///
    /// `://` separates the protocol; when it is absent the `:/` form is
    /// accepted, with everything after the colon treated as the remainder.
    /// A missing port parses as 0 and a bare `key` parameter maps to itself.
    ///
    /// # Errors
    ///
    /// Returns [`MoonrpcError::InvalidAddress`] when the input is empty, has
    /// no protocol separator, starts with a separator, or carries a port that
    /// is not a number.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(MoonrpcError::InvalidAddress("address is empty".to_string()));
        }

        let (body, query) = match input.split_once('?') {
            Some((body, query)) => (body, Some(query)),
            None => (input, None),
        };

        let mut parameters = BTreeMap::new();
        if let Some(query) = query {
            for pair in query.split('&').map(str::trim).filter(|p| !p.is_empty()) {
                match pair.split_once('=') {
                    Some((key, value)) => parameters.insert(key.trim().to_string(), value.trim().to_string()),
                    None => parameters.insert(pair.to_string(), pair.to_string()),
                };
            }
        }

        let (protocol, rest) = if let Some(idx) = body.find("://") {
            (&body[..idx], &body[idx + 3..])
        } else if let Some(idx) = body.find(":/") {
            (&body[..idx], &body[idx + 1..])
        } else {
            return Err(MoonrpcError::InvalidAddress(format!(
                "missing protocol separator in '{}'",
                input
            )));
        };
        if protocol.is_empty() {
            return Err(MoonrpcError::InvalidAddress(format!("missing protocol in '{}'", input)));
        }

        let (authority, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx + 1..]),
            None => (rest, ""),
        };

        let (host, port) = match authority.rfind(':') {
            Some(idx) => {
                let port = authority[idx + 1..].parse::<u16>().map_err(|e| {
                    MoonrpcError::InvalidAddress(format!("bad port in '{}': {}", input, e))
                })?;
                (&authority[..idx], port)
            }
            None => (authority, 0),
        };

        Ok(Address {
            protocol: protocol.to_string(),
            host: host.to_string(),
            port,
            path: path.to_string(),
            parameters,
        })
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn parameters(&self) -> &BTreeMap<String, String> {
        &self.parameters
    }

    /// `host:port`, suitable for connecting or binding.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// `protocol://host:port/path` without parameters.
    pub fn uri(&self) -> String {
        format!("{}://{}:{}/{}", self.protocol, self.host, self.port, self.path)
    }

    /// The full textual form, parameters in key order.
    pub fn full_uri(&self) -> String {
        let mut uri = self.uri();
        if !self.parameters.is_empty() {
            uri.push('?');
            let query: Vec<String> = self
                .parameters
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            uri.push_str(&query.join("&"));
        }
        uri
    }

    /// `group/path/version`, the routing key a provider is registered under.
    pub fn service_key(&self) -> String {
        format!("{}/{}/{}", self.group(), self.path, self.version())
    }

    /// Identifies one export of a service on one protocol endpoint.
    pub fn protocol_key(&self) -> String {
        format!("{}://{}:{}/{}", self.protocol, self.host, self.port, self.service_key())
    }

    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }

    pub fn parameter_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        match self.parameters.get(key) {
            Some(value) if !value.is_empty() => value.as_str(),
            _ => default,
        }
    }

    /// Integer parameter; missing or unparseable values yield `default`.
    pub fn int_parameter(&self, key: &str, default: i64) -> i64 {
        self.parameter(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    pub fn bool_parameter(&self, key: &str, default: bool) -> bool {
        self.parameter(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    pub fn version(&self) -> &str {
        self.parameter_or(param::VERSION, param::DEFAULT_VERSION)
    }

    pub fn group(&self) -> &str {
        self.parameter_or(param::GROUP, param::DEFAULT_GROUP)
    }

    pub fn serialization(&self) -> &str {
        self.parameter_or(param::SERIALIZATION, param::DEFAULT_SERIALIZATION)
    }

    /// Per-call timeout in milliseconds; non-positive values fall back to
    /// the default.
    pub fn request_timeout_ms(&self) -> u64 {
        let timeout = self.int_parameter(param::REQUEST_TIMEOUT, param::DEFAULT_REQUEST_TIMEOUT_MS);
        if timeout > 0 {
            timeout as u64
        } else {
            param::DEFAULT_REQUEST_TIMEOUT_MS as u64
        }
    }

    /// Returns true if this (candidate) address can serve `requirement`:
    /// path, protocol, version and serialization must all be equal, with
    /// defaults applied to absent parameters.
    pub fn can_serve(&self, requirement: &Address) -> bool {
        self.path == requirement.path
            && self.protocol == requirement.protocol
            && self.version() == requirement.version()
            && self.serialization() == requirement.serialization()
    }

    pub fn set_parameter(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.parameters.insert(key.into(), value.into());
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_parameter(key, value);
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_uri())
    }
}

impl FromStr for Address {
    type Err = MoonrpcError;

    fn from_str(s: &str) -> Result<Self> {
        Address::parse(s)
    }
}
