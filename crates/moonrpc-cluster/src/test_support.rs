//! In-memory endpoints and protocol used by the cluster tests.

use async_trait::async_trait;
use moonrpc_client::{Endpoint, Protocol};
use moonrpc_common::address::Address;
use moonrpc_common::protocol::error::{MoonrpcError, Result};
use moonrpc_common::protocol::{Request, Response};
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

type Behaviour = Box<dyn Fn(&Request) -> Result<Response> + Send + Sync>;
type DestroyHook = Box<dyn Fn() + Send + Sync>;

pub struct MockEndpoint {
    url: Address,
    service_url: Address,
    active: AtomicUsize,
    available: AtomicBool,
    calls: AtomicUsize,
    destroyed: AtomicBool,
    behaviour: Behaviour,
    destroy_hook: Mutex<Option<DestroyHook>>,
}

impl MockEndpoint {
    pub fn new<F>(url: Address, behaviour: F) -> Self
    where
        F: Fn(&Request) -> Result<Response> + Send + Sync + 'static,
    {
        Self {
            service_url: url.clone(),
            url,
            active: AtomicUsize::new(0),
            available: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
            destroyed: AtomicBool::new(false),
            behaviour: Box::new(behaviour),
            destroy_hook: Mutex::new(None),
        }
    }

    /// Answers every call with its own port.
    pub fn ok(port: u16) -> Self {
        Self::new(address(port), move |request| Ok(Response::success(request.id, json!(port))))
    }

    /// Fails every call with a connection error.
    pub fn broken(port: u16) -> Self {
        Self::new(address(port), move |_| {
            Err(MoonrpcError::Connection(format!("127.0.0.1:{} refused", port)))
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_active(&self, active: usize) {
        self.active.store(active, Ordering::SeqCst);
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Runs `hook` inside `destroy`.
    pub fn on_destroy<F>(&self, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.destroy_hook.lock().unwrap() = Some(Box::new(hook));
    }
}

pub fn address(port: u16) -> Address {
    Address::new("moon", "127.0.0.1", port, "demo.EchoService")
}

#[async_trait]
impl Endpoint for MockEndpoint {
    fn url(&self) -> &Address {
        &self.url
    }

    fn service_url(&self) -> &Address {
        &self.service_url
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    async fn call(&self, request: Request) -> Result<Response> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.behaviour)(&request)
    }

    fn destroy(&self) {
        self.available.store(false, Ordering::SeqCst);
        self.destroyed.store(true, Ordering::SeqCst);
        if let Some(hook) = self.destroy_hook.lock().unwrap().as_ref() {
            hook();
        }
    }
}

/// Protocol that hands out [`MockEndpoint`]s answering with their port and
/// remembers every endpoint it created.
#[derive(Default)]
pub struct MockProtocol {
    created: Mutex<Vec<Arc<MockEndpoint>>>,
}

impl MockProtocol {
    pub fn created(&self) -> Vec<Arc<MockEndpoint>> {
        self.created.lock().unwrap().clone()
    }
}

impl Protocol for MockProtocol {
    fn name(&self) -> &str {
        "moon"
    }

    fn refer(&self, url: &Address, service_url: &Address) -> Result<Arc<dyn Endpoint>> {
        let port = service_url.port();
        let mut endpoint = MockEndpoint::new(url.clone(), move |request| {
            Ok(Response::success(request.id, json!(port)))
        });
        endpoint.service_url = service_url.clone();
        let endpoint = Arc::new(endpoint);
        self.created.lock().unwrap().push(endpoint.clone());
        Ok(endpoint)
    }
}
