//! Client-side correlation of responses to pending calls.
//!
//! Every sync or async call registers a [`PendingCall`] keyed by its request
//! id before the request frame is written. The entry is resolved by exactly
//! one of three paths, whichever removes it from the table first:
//!
//! - the connection read loop delivering a response with the same id
//! - the periodic timeout sweep finding the entry past its deadline
//! - the client closing (or losing) its connection
//!
//! Losers of that race find no entry and do nothing.

use dashmap::DashMap;
use moonrpc_common::protocol::error::{MoonrpcError, Result};
use moonrpc_common::protocol::{RequestId, Response};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Default period of the timeout sweep.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// One call awaiting its response.
pub struct PendingCall {
    deadline: Instant,
    timeout_ms: u64,
    sender: oneshot::Sender<Result<Response>>,
}

impl PendingCall {
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    fn resolve(self, outcome: Result<Response>) {
        // The caller may have dropped its future; nothing to deliver then.
        let _ = self.sender.send(outcome);
    }
}

/// Handle to the eventual outcome of a registered call.
///
/// Awaiting it yields the response, a timeout error from the sweep, or a
/// closed-connection error.
pub struct ResponseFuture {
    request_id: RequestId,
    receiver: oneshot::Receiver<Result<Response>>,
}

impl ResponseFuture {
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }
}

impl Future for ResponseFuture {
    type Output = Result<Response>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(MoonrpcError::Closed(format!(
                "pending call {} dropped without a result",
                self.request_id
            )))),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Concurrent table of pending calls.
#[derive(Default)]
pub struct RequestCorrelator {
    pending: DashMap<RequestId, PendingCall>,
}

impl RequestCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a call that must resolve within `timeout`.
    pub fn register(&self, request_id: RequestId, timeout: Duration) -> ResponseFuture {
        let (sender, receiver) = oneshot::channel();
        let call = PendingCall {
            deadline: Instant::now() + timeout,
            timeout_ms: timeout.as_millis() as u64,
            sender,
        };
        if let Some(previous) = self.pending.insert(request_id, call) {
            warn!("Request id {} registered twice; failing the earlier call", request_id);
            previous.resolve(Err(MoonrpcError::Transport(format!(
                "request id {} reused",
                request_id
            ))));
        }
        ResponseFuture {
            request_id,
            receiver,
        }
    }

    /// Delivers a response to its pending call.
    ///
    /// Returns false if no call was waiting for this id (already timed out,
    /// closed, oneway, or unknown); the response is dropped in that case.
    pub fn complete(&self, response: Response) -> bool {
        match self.pending.remove(&response.id) {
            Some((_, call)) => {
                call.resolve(Ok(response));
                true
            }
            None => {
                debug!("Dropping response {} with no pending call", response.id);
                false
            }
        }
    }

    /// Fails one pending call. Returns false if it was already resolved.
    pub fn fail(&self, request_id: RequestId, error: MoonrpcError) -> bool {
        match self.pending.remove(&request_id) {
            Some((_, call)) => {
                call.resolve(Err(error));
                true
            }
            None => false,
        }
    }

    /// Removes a call without resolving it, e.g. after its frame could not
    /// be sent and the caller reports the failure directly.
    pub fn cancel(&self, request_id: RequestId) -> bool {
        self.pending.remove(&request_id).is_some()
    }

    /// Resolves every call whose deadline is at or before `now` with a
    /// timeout error. Returns how many were resolved.
    pub fn sweep(&self, now: Instant) -> usize {
        // Collect first: removing while iterating would deadlock on the shard.
        let expired: Vec<RequestId> = self
            .pending
            .iter()
            .filter(|entry| entry.value().deadline <= now)
            .map(|entry| *entry.key())
            .collect();

        let mut resolved = 0;
        for request_id in expired {
            if let Some((_, call)) = self.pending.remove_if(&request_id, |_, call| call.deadline <= now) {
                let timeout_ms = call.timeout_ms;
                call.resolve(Err(MoonrpcError::Timeout(timeout_ms)));
                resolved += 1;
            }
        }
        if resolved > 0 {
            debug!("Timeout sweep resolved {} pending call(s)", resolved);
        }
        resolved
    }

    /// Fails every outstanding call with a closed-connection error.
    pub fn fail_all(&self, reason: &str) -> usize {
        let ids: Vec<RequestId> = self.pending.iter().map(|entry| *entry.key()).collect();
        let mut failed = 0;
        for request_id in ids {
            if self.fail(request_id, MoonrpcError::Closed(reason.to_string())) {
                failed += 1;
            }
        }
        failed
    }

    pub fn contains(&self, request_id: RequestId) -> bool {
        self.pending.contains_key(&request_id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Starts the periodic timeout sweep.
    ///
    /// The task holds only a weak reference and exits once the correlator is
    /// dropped; callers abort the handle to stop it earlier.
    ///
    /// # Errors
    ///
    /// Returns [`MoonrpcError::Config`] when called outside a tokio runtime.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> Result<JoinHandle<()>> {
        let runtime = Handle::try_current()
            .map_err(|_| MoonrpcError::Config("timeout sweep requires a tokio runtime".to_string()))?;
        let correlator: Weak<Self> = Arc::downgrade(self);
        Ok(runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match correlator.upgrade() {
                    Some(correlator) => {
                        correlator.sweep(Instant::now());
                    }
                    None => break,
                }
            }
        }))
    }
}
