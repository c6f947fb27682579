//! moonrpc Response Types
//!
//! This module defines the RPC response structure.

use serde::{Deserialize, Serialize};
use super::error::{MoonrpcError, Result, RpcError};
use super::RequestId;

/// RPC method result (JSON value)
///
/// The result is an opaque payload produced by the provider.
pub type RpcResult = serde_json::Value;

/// An RPC response written by a provider for one request.
///
/// # Response Flow
///
/// 1. The server decodes a `Request` and routes it to a provider
/// 2. The provider produces a `Response` (value or error)
/// 3. The server stamps the execution duration and writes the frame
/// 4. The client matches it to the pending call by `id`
///
/// # Fields
///
/// - `id`: The request ID this response corresponds to
/// - `result`: The result value (present on success)
/// - `error`: Tagged error (present on failure)
/// - `process_time_ms`: Time the server spent executing the request
///
/// # Example
///
/// ```
/// use moonrpc_common::protocol::{Response, RpcError};
/// use serde_json::json;
///
/// let ok = Response::success(7, json!("pong"));
/// assert!(ok.is_success());
///
/// let failed = Response::error(7, RpcError::framework("no provider"));
/// assert!(!failed.is_success());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Response {
    /// Request identifier this response corresponds to
    pub id: RequestId,
    /// Result value (present on success)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<RpcResult>,
    /// Error (present on failure)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    /// Server-side execution duration in milliseconds
    #[serde(default)]
    pub process_time_ms: u64,
}

impl Response {
    /// Creates a successful response.
    ///
    /// # Arguments
    ///
    /// * `id` - The request identifier (must match the request's ID)
    /// * `result` - The result value
    pub fn success(id: RequestId, result: RpcResult) -> Self {
        Response {
            id,
            result: Some(result),
            error: None,
            process_time_ms: 0,
        }
    }

    /// Creates an error response.
    ///
    /// # Arguments
    ///
    /// * `id` - The request identifier (must match the request's ID)
    /// * `error` - The tagged error describing what went wrong
    pub fn error(id: RequestId, error: impl Into<RpcError>) -> Self {
        Response {
            id,
            result: None,
            error: Some(error.into()),
            process_time_ms: 0,
        }
    }

    /// Creates the placeholder returned for oneway calls.
    pub fn empty(id: RequestId) -> Self {
        Response {
            id,
            result: None,
            error: None,
            process_time_ms: 0,
        }
    }

    pub fn with_process_time(mut self, process_time_ms: u64) -> Self {
        self.process_time_ms = process_time_ms;
        self
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Returns the carried value, or the carried error as a [`MoonrpcError`].
    ///
    /// A successful response without a result yields `Value::Null`.
    pub fn into_value(self) -> Result<RpcResult> {
        match self.error {
            Some(error) => Err(error.into_error()),
            None => Ok(self.result.unwrap_or(RpcResult::Null)),
        }
    }

    /// Converts a response carrying an error into `Err`, leaving successful
    /// responses untouched.
    pub fn into_result(self) -> Result<Response> {
        match self.error {
            Some(error) => Err(error.into_error()),
            None => Ok(self),
        }
    }
}

impl From<(RequestId, MoonrpcError)> for Response {
    fn from((id, err): (RequestId, MoonrpcError)) -> Self {
        Response::error(id, &err)
    }
}
