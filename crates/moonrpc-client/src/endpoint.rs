use async_trait::async_trait;
use moonrpc_common::address::Address;
use moonrpc_common::protocol::error::{MoonrpcError, Result};
use moonrpc_common::protocol::{Request, Response};
use moonrpc_common::transport::Codec;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::info;

use crate::client::{ClientConfig, TransportClient};

/// One callable remote target.
///
/// Load balancers select among endpoints and HA strategies call them.
/// `call` resolves to `Ok` only for a response without an error; an error
/// carried by the response is returned as `Err` so callers can branch on
/// [`MoonrpcError::is_business`].
#[async_trait]
pub trait Endpoint: Send + Sync {
    /// Address this endpoint was created for (carries call parameters such
    /// as `retries` and `requestTimeout`).
    fn url(&self) -> &Address;

    /// Address of the provider as announced by the registry.
    fn service_url(&self) -> &Address;

    fn is_available(&self) -> bool;

    /// Calls currently in flight through this endpoint.
    fn active_count(&self) -> usize;

    async fn call(&self, request: Request) -> Result<Response>;

    /// Tears down the transport and marks the endpoint unavailable.
    fn destroy(&self);
}

/// Decrements the in-flight counter when dropped, including when the call
/// future is cancelled.
struct ActiveGuard<'a> {
    active: &'a AtomicUsize,
}

impl<'a> ActiveGuard<'a> {
    fn enter(active: &'a AtomicUsize) -> Self {
        active.fetch_add(1, Ordering::AcqRel);
        Self { active }
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Endpoint backed by a [`TransportClient`].
///
/// Lifecycle: [`new`](Self::new) → [`init`](Self::init) → `call` (many
/// times) → `destroy`.
pub struct ReferenceEndpoint {
    url: Address,
    service_url: Address,
    client: TransportClient,
    active: AtomicUsize,
    available: AtomicBool,
}

impl ReferenceEndpoint {
    pub fn new(url: Address, service_url: Address, config: ClientConfig) -> Self {
        let client = TransportClient::new(url.clone(), config);
        Self::with_client(url, service_url, client)
    }

    pub fn with_codec(url: Address, service_url: Address, config: ClientConfig, codec: Arc<dyn Codec>) -> Self {
        let client = TransportClient::with_codec(url.clone(), config, codec);
        Self::with_client(url, service_url, client)
    }

    fn with_client(url: Address, service_url: Address, client: TransportClient) -> Self {
        Self {
            url,
            service_url,
            client,
            active: AtomicUsize::new(0),
            available: AtomicBool::new(false),
        }
    }

    /// Prepares the transport and marks the endpoint available.
    pub fn init(&self) -> Result<()> {
        self.client.open()?;
        self.available.store(true, Ordering::Release);
        info!("Endpoint {} initialised", self.url.uri());
        Ok(())
    }

    pub fn client(&self) -> &TransportClient {
        &self.client
    }
}

#[async_trait]
impl Endpoint for ReferenceEndpoint {
    fn url(&self) -> &Address {
        &self.url
    }

    fn service_url(&self) -> &Address {
        &self.service_url
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    fn active_count(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    async fn call(&self, request: Request) -> Result<Response> {
        if !self.is_available() {
            return Err(MoonrpcError::Unavailable(format!(
                "node is not available: {}",
                self.url.uri()
            )));
        }

        let _active = ActiveGuard::enter(&self.active);
        self.client.request(request).await?.into_result()
    }

    fn destroy(&self) {
        self.available.store(false, Ordering::Release);
        self.client.close();
        info!("Endpoint {} destroyed", self.url.uri());
    }
}
