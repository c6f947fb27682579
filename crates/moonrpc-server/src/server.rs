use moonrpc_common::address::Address;
use moonrpc_common::protocol::error::{MoonrpcError, Result};
use moonrpc_common::protocol::{Message, Request, Response};
use moonrpc_common::transport::{read_frame, write_frame, Codec, DefaultCodec, MessageType};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::router::MessageRouter;
use crate::worker_pool::WorkerPool;

/// Outbound frames buffered per connection before request tasks wait.
const WRITE_QUEUE_DEPTH: usize = 1024;

/// Framed TCP server for one bind address.
///
/// Each accepted connection gets a reader task and a writer task. The
/// reader decodes request frames and hands them to the shared
/// [`WorkerPool`]; finished responses travel to the writer over a channel,
/// so the network tasks never run business code.
pub struct TransportServer {
    url: Address,
    router: Arc<MessageRouter>,
    pool: Arc<WorkerPool>,
    codec: Arc<dyn Codec>,
    config: ServerConfig,
    connections: Arc<AtomicUsize>,
    closed: AtomicBool,
    acceptor: Mutex<Option<JoinHandle<()>>>,
}

impl TransportServer {
    /// Binds `url`'s host and port and starts accepting connections.
    ///
    /// Port 0 binds an ephemeral port; [`url`](Self::url) reports the
    /// actual one.
    pub async fn bind(url: &Address, config: ServerConfig) -> Result<Arc<Self>> {
        Self::bind_with_codec(url, config, Arc::new(DefaultCodec::new())).await
    }

    pub async fn bind_with_codec(url: &Address, config: ServerConfig, codec: Arc<dyn Codec>) -> Result<Arc<Self>> {
        config.validate().map_err(MoonrpcError::Config)?;
        let pool = Arc::new(WorkerPool::new(config.pool.clone())?);

        let bind_addr = url.socket_addr();
        let listener = TcpListener::bind(&bind_addr)
            .await
            .map_err(|e| MoonrpcError::Connection(format!("Failed to bind to {}: {}", bind_addr, e)))?;
        let local = listener
            .local_addr()
            .map_err(|e| MoonrpcError::Connection(format!("Failed to get local addr: {}", e)))?;

        let server = Arc::new(Self {
            url: url.clone().with_port(local.port()),
            router: Arc::new(MessageRouter::new()),
            pool,
            codec,
            config,
            connections: Arc::new(AtomicUsize::new(0)),
            closed: AtomicBool::new(false),
            acceptor: Mutex::new(None),
        });

        let acceptor = tokio::spawn(accept_loop(listener, server.connection_context()));
        *server.acceptor.lock().unwrap_or_else(PoisonError::into_inner) = Some(acceptor);

        info!("Rpc server bound to {}", server.url.socket_addr());
        Ok(server)
    }

    /// The bind address with the real port filled in.
    pub fn url(&self) -> &Address {
        &self.url
    }

    pub fn router(&self) -> &Arc<MessageRouter> {
        &self.router
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Connections currently open.
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stops accepting connections and shuts the worker pool down.
    ///
    /// Established connections end when their peers disconnect; requests
    /// they send afterwards are answered with a busy error.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(acceptor) = self.acceptor.lock().unwrap_or_else(PoisonError::into_inner).take() {
            acceptor.abort();
        }
        self.pool.shutdown();
        info!("Rpc server on {} closed", self.url.socket_addr());
    }

    fn connection_context(&self) -> ConnectionContext {
        ConnectionContext {
            url: self.url.clone(),
            router: self.router.clone(),
            pool: self.pool.clone(),
            codec: self.codec.clone(),
            max_frame_size: self.config.max_frame_size,
            connections: self.connections.clone(),
        }
    }
}

impl Drop for TransportServer {
    fn drop(&mut self) {
        self.close();
    }
}

/// Everything a connection task needs, detached from the server handle so
/// the server can be dropped while connections drain.
#[derive(Clone)]
struct ConnectionContext {
    url: Address,
    router: Arc<MessageRouter>,
    pool: Arc<WorkerPool>,
    codec: Arc<dyn Codec>,
    max_frame_size: usize,
    connections: Arc<AtomicUsize>,
}

async fn accept_loop(listener: TcpListener, context: ConnectionContext) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!("Failed to accept connection: {}", e);
                continue;
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY for {}: {}", peer, e);
        }

        debug!("Connection established from {}", peer);
        let context = context.clone();
        tokio::spawn(async move {
            context.connections.fetch_add(1, Ordering::AcqRel);
            if let Err(e) = handle_connection(stream, &context).await {
                warn!("Connection from {} failed: {}", peer, e);
            }
            context.connections.fetch_sub(1, Ordering::AcqRel);
            debug!("Connection from {} closed", peer);
        });
    }
}

/// Reads request frames until the peer disconnects or sends garbage.
async fn handle_connection(stream: TcpStream, context: &ConnectionContext) -> Result<()> {
    let (mut reader, writer) = stream.into_split();
    let (tx, rx) = mpsc::channel::<Vec<u8>>(WRITE_QUEUE_DEPTH);
    let writer_task = tokio::spawn(write_loop(writer, rx));

    let outcome = loop {
        let frame = match read_frame(&mut reader, context.max_frame_size).await {
            Ok(Some(frame)) => frame,
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        };

        if frame.header.message_type != MessageType::Request {
            warn!("Ignoring non-request frame {} on {}", frame.header.request_id, context.url.socket_addr());
            continue;
        }

        let request = match context.codec.decode_frame(&context.url, &frame) {
            Ok(Message::Request(request)) => request,
            Ok(Message::Response(_)) => continue,
            Err(e) => {
                warn!("Failed to decode request {}: {}", frame.header.request_id, e);
                let response = Response::error(frame.header.request_id, &e);
                send_response(context, &tx, response).await;
                continue;
            }
        };

        dispatch(context, &tx, request).await;
    };

    // The writer ends once every in-flight request has released its sender.
    drop(tx);
    let _ = writer_task.await;
    outcome
}

/// Submits `request` to the worker pool, answering immediately with a busy
/// error when the pool rejects it.
async fn dispatch(context: &ConnectionContext, tx: &mpsc::Sender<Vec<u8>>, request: Request) {
    let started = Instant::now();
    let id = request.id;
    let oneway = request.is_oneway();
    debug!("Rpc server received request {}: {}.{}", id, request.interface, request.method);

    let router = context.router.clone();
    match context.pool.try_submit(move || router.handle(&request)) {
        Ok(job) => {
            let context = context.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let response = match job.await {
                    Ok(response) => response,
                    Err(e) => {
                        error!("Request {} failed in worker pool: {}", id, e);
                        Response::error(id, &e)
                    }
                };
                if !oneway {
                    let response = response.with_process_time(elapsed_ms(started));
                    send_response(&context, &tx, response).await;
                }
                debug!("Rpc server processed request {}", id);
            });
        }
        Err(e) => {
            warn!("Rejected request {} on {}: {}", id, context.url.socket_addr(), e);
            if !oneway {
                let response = Response::error(id, &e).with_process_time(elapsed_ms(started));
                send_response(context, tx, response).await;
            }
        }
    }
}

async fn send_response(context: &ConnectionContext, tx: &mpsc::Sender<Vec<u8>>, response: Response) {
    let id = response.id;
    match context.codec.encode_frame(&context.url, &Message::Response(response)) {
        Ok(bytes) => {
            if tx.send(bytes).await.is_err() {
                debug!("Connection closed before response {} was written", id);
            }
        }
        Err(e) => error!("Failed to encode response {}: {}", id, e),
    }
}

async fn write_loop(mut writer: OwnedWriteHalf, mut rx: mpsc::Receiver<Vec<u8>>) {
    while let Some(bytes) = rx.recv().await {
        if let Err(e) = write_frame(&mut writer, &bytes).await {
            warn!("Failed to send response: {}", e);
            return;
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
