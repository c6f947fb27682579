use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

pub type RequestId = u64;
pub type RpcArgs = Vec<Value>;

/// How the caller waits for the outcome of a request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CallKind {
    /// The caller awaits the correlated response.
    #[default]
    Sync,
    /// The caller receives a handle and collects the response later.
    Async,
    /// Fire and forget; the server never writes a response.
    Oneway,
}

/// Monotonically increasing request id source.
///
/// Ids are unique only within the generator that produced them. Most code
/// uses the process-wide generator behind [`next_request_id`].
#[derive(Debug)]
pub struct RequestIdGenerator {
    next: AtomicU64,
}

impl RequestIdGenerator {
    pub const fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> RequestId {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for RequestIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL_REQUEST_IDS: RequestIdGenerator = RequestIdGenerator::new();

/// Returns the next id from the process-wide generator.
pub fn next_request_id() -> RequestId {
    GLOBAL_REQUEST_IDS.next_id()
}

/// A remote method invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request {
    pub id: RequestId,
    pub interface: String,
    pub method: String,
    #[serde(default)]
    pub param_types: Vec<String>,
    #[serde(default)]
    pub args: RpcArgs,
    #[serde(default)]
    pub attachments: BTreeMap<String, String>,
    #[serde(default)]
    pub kind: CallKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl Request {
    pub fn new(interface: impl Into<String>, method: impl Into<String>) -> Self {
        Request {
            id: next_request_id(),
            interface: interface.into(),
            method: method.into(),
            param_types: Vec::new(),
            args: Vec::new(),
            attachments: BTreeMap::new(),
            kind: CallKind::Sync,
            timeout_ms: None,
        }
    }

    /// Appends one argument together with its declared type name.
    pub fn with_arg(mut self, param_type: impl Into<String>, arg: Value) -> Self {
        self.param_types.push(param_type.into());
        self.args.push(arg);
        self
    }

    pub fn with_attachment(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attachments.insert(key.into(), value.into());
        self
    }

    pub fn with_kind(mut self, kind: CallKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn attachment(&self, key: &str) -> Option<&str> {
        self.attachments.get(key).map(String::as_str)
    }

    pub fn is_oneway(&self) -> bool {
        self.kind == CallKind::Oneway
    }
}
