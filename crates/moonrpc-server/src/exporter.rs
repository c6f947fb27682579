use moonrpc_common::address::Address;
use moonrpc_common::protocol::error::{MoonrpcError, Result};
use moonrpc_common::transport::{Codec, DefaultCodec};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::provider::Provider;
use crate::server::TransportServer;

#[derive(Default)]
struct ExportState {
    /// Servers by bound `host:port`.
    servers: HashMap<String, Arc<TransportServer>>,
    /// Protocol keys of live exports.
    exported: HashSet<String>,
}

/// Provider side of the `moon` protocol.
///
/// Keeps one [`TransportServer`] per bound `host:port`; every service
/// exported on that address shares its router and worker pool. The pool
/// bounds come from the parameters of the first export that opens the
/// server.
pub struct ServerProtocol {
    codec: Arc<dyn Codec>,
    state: Mutex<ExportState>,
}

impl ServerProtocol {
    pub const NAME: &'static str = "moon";

    pub fn new() -> Self {
        Self::with_codec(Arc::new(DefaultCodec::new()))
    }

    pub fn with_codec(codec: Arc<dyn Codec>) -> Self {
        Self {
            codec,
            state: Mutex::new(ExportState::default()),
        }
    }

    /// Process-wide protocol instance, created on first use.
    pub fn global() -> Arc<ServerProtocol> {
        static GLOBAL: OnceLock<Arc<ServerProtocol>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(ServerProtocol::new())).clone()
    }

    /// Exports `provider` at `url`.
    ///
    /// Starts a server for `url`'s host and port unless one is already
    /// running there. A `url` with port 0 always starts a new server on an
    /// ephemeral port. The returned exporter reports the bound address.
    ///
    /// # Errors
    ///
    /// Fails if the service is already exported at that address, or if
    /// binding fails.
    pub async fn export(self: &Arc<Self>, url: &Address, provider: Arc<dyn Provider>) -> Result<Exporter> {
        if url.protocol() != Self::NAME {
            return Err(MoonrpcError::Config(format!(
                "protocol '{}' cannot export {}",
                url.protocol(),
                url
            )));
        }

        let mut state = self.state.lock().await;
        let existing = if url.port() == 0 {
            None
        } else {
            state.servers.get(&url.socket_addr()).cloned()
        };

        let (server, opened) = match existing {
            Some(server) => (server, false),
            None => {
                let config = ServerConfig::from_address(url);
                let server = TransportServer::bind_with_codec(url, config, self.codec.clone()).await?;
                (server, true)
            }
        };

        let bound = url.clone().with_port(server.url().port());
        let key = bound.protocol_key();
        if state.exported.contains(&key) {
            return Err(MoonrpcError::Config(format!("service already exist, url={}", bound)));
        }
        if let Err(e) = server.router().add_provider(&bound, provider) {
            if opened {
                server.close();
            }
            return Err(e);
        }

        state.exported.insert(key.clone());
        if opened {
            state.servers.insert(server.url().socket_addr(), server.clone());
        }
        info!("Exported {} on {}", bound.path(), bound.socket_addr());

        Ok(Exporter {
            url: bound,
            key,
            server,
            protocol: self.clone(),
            unexported: AtomicBool::new(false),
        })
    }

    /// Number of services currently exported.
    pub async fn exported_count(&self) -> usize {
        self.state.lock().await.exported.len()
    }

    /// Server bound at `host:port`, if any.
    pub async fn server(&self, socket_addr: &str) -> Option<Arc<TransportServer>> {
        self.state.lock().await.servers.get(socket_addr).cloned()
    }

    async fn unexport(&self, exporter: &Exporter) {
        let mut state = self.state.lock().await;
        state.exported.remove(&exporter.key);
        exporter.server.router().remove_provider(&exporter.url);

        if exporter.server.router().is_empty() {
            let addr = exporter.server.url().socket_addr();
            if let Some(server) = state.servers.remove(&addr) {
                server.close();
            }
            info!("Last service on {} unexported, server closed", addr);
        }
    }
}

impl Default for ServerProtocol {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle for one exported service.
pub struct Exporter {
    url: Address,
    key: String,
    server: Arc<TransportServer>,
    protocol: Arc<ServerProtocol>,
    unexported: AtomicBool,
}

impl std::fmt::Debug for Exporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Exporter")
            .field("url", &self.url)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl Exporter {
    /// Export address with the bound port.
    pub fn url(&self) -> &Address {
        &self.url
    }

    pub fn server(&self) -> &Arc<TransportServer> {
        &self.server
    }

    pub fn is_exported(&self) -> bool {
        !self.unexported.load(Ordering::Acquire)
    }

    /// Withdraws the service from its server; the last service on an
    /// address closes the server.
    pub async fn unexport(&self) {
        if self.unexported.swap(true, Ordering::AcqRel) {
            warn!("Service {} already unexported", self.url);
            return;
        }
        self.protocol.unexport(self).await;
    }
}
