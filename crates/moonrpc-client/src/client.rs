use moonrpc_common::address::Address;
use moonrpc_common::protocol::error::{MoonrpcError, Result};
use moonrpc_common::protocol::{CallKind, Message, Request, Response};
use moonrpc_common::transport::{Codec, DefaultCodec, DEFAULT_MAX_FRAME_SIZE};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

use crate::connection::ConnectionManager;
use crate::correlator::{RequestCorrelator, ResponseFuture, DEFAULT_SWEEP_INTERVAL};

/// Transport client configuration.
///
/// # Default Configuration
///
/// - `connect_timeout`: 3 seconds
/// - `sweep_interval`: 5 seconds
/// - `max_frame_size`: 100 MB
///
/// The per-call timeout is not part of this struct: it comes from the
/// request itself or the target address `requestTimeout` parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Maximum time to establish a TCP connection
    pub connect_timeout: Duration,
    /// Period of the pending-call timeout sweep
    pub sweep_interval: Duration,
    /// Largest response body the client will accept
    pub max_frame_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(3),
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any duration is zero or the frame size limit is
    /// zero.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.connect_timeout.is_zero() {
            return Err("connect timeout must be greater than zero".to_string());
        }
        if self.sweep_interval.is_zero() {
            return Err("sweep interval must be greater than zero".to_string());
        }
        if self.max_frame_size == 0 {
            return Err("max frame size must be greater than zero".to_string());
        }
        Ok(())
    }
}

/// Correlating client for one provider address.
///
/// Sync and async calls register a pending entry before the frame is sent;
/// oneway calls only send. A background sweep (started by [`open`]) fails
/// calls that outlive their deadline.
///
/// [`open`]: TransportClient::open
///
/// # Example
///
/// ```no_run
/// use moonrpc_client::{ClientConfig, TransportClient};
/// use moonrpc_common::{Address, Request};
/// use serde_json::json;
///
/// # #[tokio::main]
/// # async fn main() -> moonrpc_common::Result<()> {
/// let address: Address = "moon://127.0.0.1:9100/moonrpc.demo.EchoService".parse()?;
/// let client = TransportClient::new(address, ClientConfig::default());
/// client.open()?;
///
/// let request = Request::new("moonrpc.demo.EchoService", "echo").with_arg("string", json!("hi"));
/// let response = client.request(request).await?;
/// println!("{:?}", response.result);
///
/// client.close();
/// # Ok(())
/// # }
/// ```
pub struct TransportClient {
    address: Address,
    codec: Arc<dyn Codec>,
    correlator: Arc<RequestCorrelator>,
    connections: ConnectionManager,
    sweeper: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
    config: ClientConfig,
}

impl TransportClient {
    pub fn new(address: Address, config: ClientConfig) -> Self {
        Self::with_codec(address, config, Arc::new(DefaultCodec::new()))
    }

    pub fn with_codec(address: Address, config: ClientConfig, codec: Arc<dyn Codec>) -> Self {
        let correlator = Arc::new(RequestCorrelator::new());
        let connections = ConnectionManager::new(
            address.clone(),
            codec.clone(),
            correlator.clone(),
            config.connect_timeout,
            config.max_frame_size,
        );
        Self {
            address,
            codec,
            correlator,
            connections,
            sweeper: Mutex::new(None),
            closed: AtomicBool::new(false),
            config,
        }
    }

    /// Validates the configuration and starts the timeout sweep.
    ///
    /// The connection itself is established lazily on the first call.
    ///
    /// # Errors
    ///
    /// Returns [`MoonrpcError::Config`] for an invalid configuration or when
    /// called outside a tokio runtime.
    pub fn open(&self) -> Result<()> {
        self.config.validate().map_err(MoonrpcError::Config)?;
        self.ensure_open()?;
        let mut sweeper = self.sweeper.lock().unwrap_or_else(PoisonError::into_inner);
        if sweeper.is_none() {
            *sweeper = Some(self.correlator.spawn_sweeper(self.config.sweep_interval)?);
        }
        Ok(())
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn correlator(&self) -> &Arc<RequestCorrelator> {
        &self.correlator
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Sends `request` according to its [`CallKind`].
    ///
    /// Sync and async requests resolve to the correlated response; oneway
    /// requests return an empty response as soon as the frame is written.
    pub async fn request(&self, request: Request) -> Result<Response> {
        match request.kind {
            CallKind::Oneway => {
                let id = request.id;
                self.send_oneway(request).await?;
                Ok(Response::empty(id))
            }
            CallKind::Sync | CallKind::Async => self.request_async(request).await?.await,
        }
    }

    /// Registers and sends `request`, returning the pending-call handle
    /// without waiting for the response.
    pub async fn request_async(&self, request: Request) -> Result<ResponseFuture> {
        self.ensure_open()?;
        let request_id = request.id;
        let timeout_ms = request
            .timeout_ms
            .unwrap_or_else(|| self.address.request_timeout_ms());

        let frame = self.codec.encode_frame(&self.address, &Message::Request(request))?;
        let connection = self.connections.get().await?;

        let future = self
            .correlator
            .register(request_id, Duration::from_millis(timeout_ms));
        if let Err(e) = connection.send_call(request_id, &frame).await {
            self.correlator.cancel(request_id);
            return Err(e);
        }
        Ok(future)
    }

    /// Writes `request` without registering a pending call.
    pub async fn send_oneway(&self, request: Request) -> Result<()> {
        self.ensure_open()?;
        let frame = self.codec.encode_frame(&self.address, &Message::Request(request))?;
        let connection = self.connections.get().await?;
        connection.send(&frame).await
    }

    /// Stops the sweep, releases the connection and fails every call still
    /// waiting for a response with a closed-connection error.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(sweeper) = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            sweeper.abort();
        }
        self.connections.close();
        let failed = self
            .correlator
            .fail_all(&format!("client for {} closed", self.address.uri()));
        info!(
            "Client for {} closed ({} pending call(s) failed)",
            self.address.socket_addr(),
            failed
        );
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(MoonrpcError::Closed(format!("client for {} closed", self.address.uri())));
        }
        Ok(())
    }
}

impl Drop for TransportClient {
    fn drop(&mut self) {
        if let Some(sweeper) = self
            .sweeper
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            sweeper.abort();
        }
    }
}
