//! Loopback provider used by the client tests.

use moonrpc_common::address::Address;
use moonrpc_common::protocol::{Message, Request, Response};
use moonrpc_common::transport::{read_frame, write_frame, Codec, DefaultCodec, DEFAULT_MAX_FRAME_SIZE};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// What the fake provider does with one request.
pub enum Reply {
    Respond(Response),
    RespondAfter(Duration, Response),
    Silent,
    Hangup,
}

pub struct FakeProvider {
    pub address: Address,
    pub received: Arc<AtomicUsize>,
    pub accepted: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

impl FakeProvider {
    pub async fn start<F>(handler: F) -> FakeProvider
    where
        F: Fn(Request) -> Reply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let address = Address::new("moon", "127.0.0.1", port, "demo.EchoService");
        let handler = Arc::new(handler);
        let received = Arc::new(AtomicUsize::new(0));
        let accepted = Arc::new(AtomicUsize::new(0));

        let task_address = address.clone();
        let task_received = received.clone();
        let task_accepted = accepted.clone();
        let handle = tokio::spawn(async move {
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(_) => return,
                };
                task_accepted.fetch_add(1, Ordering::SeqCst);
                let handler = handler.clone();
                let address = task_address.clone();
                let received = task_received.clone();
                tokio::spawn(async move {
                    let codec = DefaultCodec::new();
                    let (mut reader, writer) = stream.into_split();
                    let writer = Arc::new(tokio::sync::Mutex::new(writer));
                    while let Ok(Some(frame)) = read_frame(&mut reader, DEFAULT_MAX_FRAME_SIZE).await {
                        received.fetch_add(1, Ordering::SeqCst);
                        let request = match codec.decode_frame(&address, &frame) {
                            Ok(Message::Request(request)) => request,
                            _ => continue,
                        };
                        let (delay, response) = match handler(request) {
                            Reply::Respond(response) => (Duration::ZERO, response),
                            Reply::RespondAfter(delay, response) => (delay, response),
                            Reply::Silent => continue,
                            Reply::Hangup => return,
                        };
                        let bytes = codec
                            .encode_frame(&address, &Message::Response(response))
                            .unwrap();
                        let writer = writer.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(delay).await;
                            let mut writer = writer.lock().await;
                            let _ = write_frame(&mut *writer, &bytes).await;
                        });
                    }
                });
            }
        });

        FakeProvider {
            address,
            received,
            accepted,
            handle,
        }
    }

    /// Replies to every request by echoing its first argument.
    pub async fn echo() -> FakeProvider {
        FakeProvider::start(|request| {
            let value = request.args.first().cloned().unwrap_or_default();
            Reply::Respond(Response::success(request.id, value))
        })
        .await
    }

    pub fn received(&self) -> usize {
        self.received.load(Ordering::SeqCst)
    }

    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

impl Drop for FakeProvider {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
