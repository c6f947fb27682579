use moonrpc_common::protocol::error::{MoonrpcError, Result};
use moonrpc_common::protocol::{Request, Response, RpcError};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Business code behind one exported method.
///
/// Receives the positional arguments of the call. Any error it returns is
/// reported to the caller as a business error.
pub type MethodHandler = Arc<dyn Fn(&[Value]) -> Result<Value> + Send + Sync>;

/// Server-side implementation of one service interface.
pub trait Provider: Send + Sync {
    fn interface(&self) -> &str;

    /// Runs `request` and always produces a response carrying its id.
    ///
    /// Business failures and framework failures (such as an unknown method)
    /// are both reported inside the response.
    fn invoke(&self, request: &Request) -> Response;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Signature {
    name: String,
    param_types: Vec<String>,
}

/// [`Provider`] assembled from closures, one per method signature.
///
/// Methods are resolved by name and declared parameter types, so overloads
/// with different parameter lists may coexist.
///
/// # Example
///
/// ```
/// use moonrpc_common::{MoonrpcError, Request};
/// use moonrpc_server::{Provider, ServiceProvider};
/// use serde_json::json;
///
/// let provider = ServiceProvider::new("demo.Calculator")
///     .method("add", &["int", "int"], |args| {
///         let a = args[0].as_i64().unwrap_or_default();
///         let b = args[1].as_i64().unwrap_or_default();
///         Ok(json!(a + b))
///     })
///     .method("div", &["int", "int"], |args| match args[1].as_i64() {
///         Some(0) | None => Err(MoonrpcError::business("division by zero")),
///         Some(b) => Ok(json!(args[0].as_i64().unwrap_or_default() / b)),
///     });
///
/// let request = Request::new("demo.Calculator", "add")
///     .with_arg("int", json!(2))
///     .with_arg("int", json!(3));
/// assert_eq!(provider.invoke(&request).result, Some(json!(5)));
/// ```
pub struct ServiceProvider {
    interface: String,
    methods: HashMap<Signature, MethodHandler>,
}

impl ServiceProvider {
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            methods: HashMap::new(),
        }
    }

    /// Adds a method; a later registration with the same signature replaces
    /// the earlier one.
    pub fn method<F>(mut self, name: impl Into<String>, param_types: &[&str], handler: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        let signature = Signature {
            name: name.into(),
            param_types: param_types.iter().map(|t| t.to_string()).collect(),
        };
        self.methods.insert(signature, Arc::new(handler));
        self
    }

    pub fn has_method(&self, name: &str, param_types: &[String]) -> bool {
        self.lookup(name, param_types).is_some()
    }

    /// Method names, sorted and without duplicates.
    pub fn method_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.methods.keys().map(|s| s.name.clone()).collect();
        names.sort();
        names.dedup();
        names
    }

    fn lookup(&self, name: &str, param_types: &[String]) -> Option<&MethodHandler> {
        self.methods.get(&Signature {
            name: name.to_string(),
            param_types: param_types.to_vec(),
        })
    }
}

impl Provider for ServiceProvider {
    fn interface(&self) -> &str {
        &self.interface
    }

    fn invoke(&self, request: &Request) -> Response {
        let handler = match self.lookup(&request.method, &request.param_types) {
            Some(handler) => handler,
            None => {
                let err = MoonrpcError::MethodNotFound(format!("{}.{}", request.interface, request.method));
                return Response::error(request.id, &err);
            }
        };

        match handler(&request.args) {
            Ok(value) => Response::success(request.id, value),
            Err(MoonrpcError::Business { message, cause }) => {
                Response::error(request.id, RpcError::business(message, cause))
            }
            Err(e) => Response::error(
                request.id,
                RpcError::business("invoke failure", Some(e.to_string())),
            ),
        }
    }
}
