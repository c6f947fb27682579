use dashmap::DashSet;
use moonrpc_common::address::Address;
use moonrpc_common::protocol::error::{MoonrpcError, Result};
use moonrpc_common::protocol::{Message, RequestId};
use moonrpc_common::transport::{read_frame, write_frame, Codec, MessageType};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::correlator::RequestCorrelator;

/// Size at which the sent-id set drops ids the correlator already resolved
/// (timed out calls never get a response to clear them).
const SENT_PRUNE_THRESHOLD: usize = 1024;

/// One live TCP connection to a provider.
///
/// Writes are serialized through an async mutex; a background task reads
/// response frames and hands them to the correlator. The connection tracks
/// the ids of the calls written to it, and losing it fails exactly those.
pub struct Connection {
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    alive: Arc<AtomicBool>,
    sent: Arc<DashSet<RequestId>>,
    correlator: Arc<RequestCorrelator>,
    reader: JoinHandle<()>,
}

impl Connection {
    /// Returns false once the read loop has stopped or the connection was
    /// closed.
    pub fn is_active(&self) -> bool {
        self.alive.load(Ordering::SeqCst) && !self.reader.is_finished()
    }

    /// Writes one complete frame that expects no response.
    ///
    /// A failed write marks the connection inactive so the next call
    /// reconnects.
    pub async fn send(&self, frame: &[u8]) -> Result<()> {
        if !self.is_active() {
            return Err(MoonrpcError::Transport("channel not active".to_string()));
        }
        let mut writer = self.writer.lock().await;
        if let Err(e) = write_frame(&mut *writer, frame).await {
            self.alive.store(false, Ordering::SeqCst);
            return Err(MoonrpcError::Transport(format!("send failed: {}", e)));
        }
        Ok(())
    }

    /// Writes the frame of a registered call and ties the call to this
    /// connection, so losing the connection fails it.
    pub async fn send_call(&self, request_id: RequestId, frame: &[u8]) -> Result<()> {
        if self.sent.len() >= SENT_PRUNE_THRESHOLD {
            self.sent.retain(|id| self.correlator.contains(*id));
        }
        self.sent.insert(request_id);
        // The read loop clears `alive` before failing the sent ids, so an id
        // inserted after that sweep is caught here.
        let outcome = self.send(frame).await;
        if outcome.is_err() {
            self.sent.remove(&request_id);
        }
        outcome
    }

    /// Number of calls written to this connection and not yet answered.
    pub fn in_flight(&self) -> usize {
        self.sent.len()
    }

    /// Stops the read loop; the socket is released when the last handle is
    /// dropped.
    pub fn close(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.reader.abort();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Lazily established, reused, reconnecting connection to one address.
///
/// Reconnection happens under a per-manager async lock: concurrent callers
/// that find the connection inactive wait for a single reconnect attempt
/// instead of opening parallel connections. The current connection itself
/// sits behind a plain mutex so `close` can always reach it.
pub struct ConnectionManager {
    address: Address,
    codec: Arc<dyn Codec>,
    correlator: Arc<RequestCorrelator>,
    connect_timeout: Duration,
    max_frame_size: usize,
    current: Mutex<Option<Arc<Connection>>>,
    reconnect: tokio::sync::Mutex<()>,
    closed: AtomicBool,
    connects: AtomicU64,
}

impl ConnectionManager {
    pub fn new(
        address: Address,
        codec: Arc<dyn Codec>,
        correlator: Arc<RequestCorrelator>,
        connect_timeout: Duration,
        max_frame_size: usize,
    ) -> Self {
        Self {
            address,
            codec,
            correlator,
            connect_timeout,
            max_frame_size,
            current: Mutex::new(None),
            reconnect: tokio::sync::Mutex::new(()),
            closed: AtomicBool::new(false),
            connects: AtomicU64::new(0),
        }
    }

    /// Returns the live connection, establishing a new one if there is none
    /// or the previous one went inactive.
    pub async fn get(&self) -> Result<Arc<Connection>> {
        self.ensure_open()?;
        if let Some(connection) = self.active() {
            return Ok(connection);
        }

        let _reconnect = self.reconnect.lock().await;
        self.ensure_open()?;
        if let Some(connection) = self.active() {
            return Ok(connection);
        }
        debug!("Connecting to {}", self.address.socket_addr());

        let connection = Arc::new(self.connect().await?);
        let replaced = self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(connection.clone());
        if let Some(old) = replaced {
            old.close();
        }

        // `close` sets the flag before taking the slot, so either it took
        // this connection or the flag is visible here.
        if self.is_closed() {
            connection.close();
            return Err(MoonrpcError::Closed(format!("client for {} closed", self.address.uri())));
        }
        Ok(connection)
    }

    /// Number of TCP connections established over the manager's lifetime.
    pub fn connect_count(&self) -> u64 {
        self.connects.load(Ordering::Relaxed)
    }

    /// Closes the current connection and refuses further use.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let current = self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(connection) = current {
            connection.close();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn active(&self) -> Option<Arc<Connection>> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .filter(|connection| connection.is_active())
            .cloned()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(MoonrpcError::Closed(format!("client for {} closed", self.address.uri())));
        }
        Ok(())
    }

    async fn connect(&self) -> Result<Connection> {
        let addr = self.address.socket_addr();
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| {
                MoonrpcError::Connection(format!(
                    "connect to {} timed out after {}ms",
                    addr,
                    self.connect_timeout.as_millis()
                ))
            })?
            .map_err(|e| MoonrpcError::Connection(format!("Failed to connect to {}: {}", addr, e)))?;
        stream.set_nodelay(true)?;

        let (read_half, write_half) = stream.into_split();
        let alive = Arc::new(AtomicBool::new(true));
        let sent = Arc::new(DashSet::new());
        let reader = tokio::spawn(read_loop(
            read_half,
            self.address.clone(),
            self.codec.clone(),
            self.correlator.clone(),
            self.max_frame_size,
            alive.clone(),
            sent.clone(),
        ));

        self.connects.fetch_add(1, Ordering::Relaxed);
        info!("Connection established to {}", addr);

        Ok(Connection {
            writer: tokio::sync::Mutex::new(write_half),
            alive,
            sent,
            correlator: self.correlator.clone(),
            reader,
        })
    }
}

/// Reads response frames until the peer closes or a read fails.
async fn read_loop(
    mut reader: OwnedReadHalf,
    address: Address,
    codec: Arc<dyn Codec>,
    correlator: Arc<RequestCorrelator>,
    max_frame_size: usize,
    alive: Arc<AtomicBool>,
    sent: Arc<DashSet<RequestId>>,
) {
    loop {
        let frame = match read_frame(&mut reader, max_frame_size).await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                debug!("Connection to {} closed by peer", address.socket_addr());
                break;
            }
            Err(e) => {
                warn!("Connection to {} failed: {}", address.socket_addr(), e);
                break;
            }
        };

        if frame.header.message_type != MessageType::Response {
            warn!("Ignoring non-response frame {} from {}", frame.header.request_id, address.socket_addr());
            continue;
        }

        sent.remove(&frame.header.request_id);
        match codec.decode_frame(&address, &frame) {
            Ok(Message::Response(response)) => {
                correlator.complete(response);
            }
            Ok(Message::Request(_)) => {
                warn!("Response frame {} carried a request body", frame.header.request_id);
            }
            Err(e) => {
                correlator.fail(frame.header.request_id, e);
            }
        }
    }

    // Nothing more can arrive on this connection. Calls registered on a
    // replacement connection are left alone.
    alive.store(false, Ordering::SeqCst);
    let reason = format!("connection to {} lost", address.socket_addr());
    let ids: Vec<RequestId> = sent.iter().map(|id| *id).collect();
    let mut failed = 0;
    for request_id in ids {
        sent.remove(&request_id);
        if correlator.fail(request_id, MoonrpcError::Closed(reason.clone())) {
            failed += 1;
        }
    }
    if failed > 0 {
        warn!("Failed {} pending call(s) after losing {}", failed, address.socket_addr());
    }
}
