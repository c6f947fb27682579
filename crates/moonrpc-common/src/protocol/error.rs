use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Every failure a moonrpc call can surface.
///
/// Only [`MoonrpcError::Business`] originates in application code on the
/// remote side; every other variant is a framework failure and is eligible
/// for retry under failover.
#[derive(Error, Debug)]
pub enum MoonrpcError {
    #[error("Business error: {message}")]
    Business {
        message: String,
        cause: Option<String>,
    },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    #[error("Connection closed: {0}")]
    Closed(String),

    #[error("No endpoint available: {0}")]
    NoEndpoint(String),

    #[error("Unavailable: {0}")]
    Unavailable(String),

    #[error("Provider not exist serviceKey={0}")]
    ServiceNotFound(String),

    #[error("Service method not exist: {0}")]
    MethodNotFound(String),

    #[error("Server busy: {0}")]
    ServerBusy(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Frame too large: {size} bytes (max {max} bytes)")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Remote error: {0}")]
    Remote(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MoonrpcError {
    /// Creates a business error without a cause.
    pub fn business(message: impl Into<String>) -> Self {
        MoonrpcError::Business {
            message: message.into(),
            cause: None,
        }
    }

    /// Returns true when the remote method itself raised this error.
    ///
    /// Business errors are never retried and never replaced by a default
    /// value.
    pub fn is_business(&self) -> bool {
        matches!(self, MoonrpcError::Business { .. })
    }
}

impl From<std::net::AddrParseError> for MoonrpcError {
    fn from(err: std::net::AddrParseError) -> Self {
        MoonrpcError::InvalidAddress(err.to_string())
    }
}

impl From<std::num::ParseIntError> for MoonrpcError {
    fn from(err: std::num::ParseIntError) -> Self {
        MoonrpcError::InvalidAddress(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MoonrpcError>;

/// Discriminant carried by an error on the wire.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Business,
    Framework,
}

/// Error attached to a [`Response`](super::Response).
///
/// This is the serializable projection of [`MoonrpcError`]: it keeps the
/// business/framework tag, the message and an optional cause description.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

impl RpcError {
    pub fn business(message: impl Into<String>, cause: Option<String>) -> Self {
        RpcError {
            kind: ErrorKind::Business,
            message: message.into(),
            cause,
        }
    }

    pub fn framework(message: impl Into<String>) -> Self {
        RpcError {
            kind: ErrorKind::Framework,
            message: message.into(),
            cause: None,
        }
    }

    pub fn is_business(&self) -> bool {
        self.kind == ErrorKind::Business
    }

    /// Converts the wire error back into a local error.
    ///
    /// Framework errors that crossed the network lose their original
    /// variant and come back as [`MoonrpcError::Remote`], except for the
    /// server busy marker which stays distinguishable.
    pub fn into_error(self) -> MoonrpcError {
        match self.kind {
            ErrorKind::Business => MoonrpcError::Business {
                message: self.message,
                cause: self.cause,
            },
            ErrorKind::Framework if self.message.starts_with(SERVER_BUSY_PREFIX) => {
                let detail = self.message[SERVER_BUSY_PREFIX.len()..].trim_start_matches(": ");
                MoonrpcError::ServerBusy(detail.to_string())
            }
            ErrorKind::Framework => MoonrpcError::Remote(self.message),
        }
    }
}

const SERVER_BUSY_PREFIX: &str = "Server busy";

impl From<&MoonrpcError> for RpcError {
    fn from(err: &MoonrpcError) -> Self {
        match err {
            MoonrpcError::Business { message, cause } => RpcError::business(message.clone(), cause.clone()),
            other => RpcError::framework(other.to_string()),
        }
    }
}

impl From<MoonrpcError> for RpcError {
    fn from(err: MoonrpcError) -> Self {
        RpcError::from(&err)
    }
}
