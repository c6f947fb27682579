use moonrpc_common::address::{param, Address};
use moonrpc_common::protocol::error::{MoonrpcError, Result};
use moonrpc_common::protocol::{Request, Response};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{error, info};

use crate::provider::Provider;

/// Service key a request is routed by: `group/interface/version`, taken from
/// the request attachments with the address defaults applied.
pub fn request_service_key(request: &Request) -> String {
    let group = match request.attachment(param::GROUP) {
        Some(group) if !group.is_empty() => group,
        _ => param::DEFAULT_GROUP,
    };
    let version = match request.attachment(param::VERSION) {
        Some(version) if !version.is_empty() => version,
        _ => param::DEFAULT_VERSION,
    };
    format!("{}/{}/{}", group, request.interface, version)
}

/// Maps service keys to providers for one server.
///
/// Every exported service on a server address shares one router.
#[derive(Default)]
pub struct MessageRouter {
    providers: RwLock<HashMap<String, Arc<dyn Provider>>>,
}

impl MessageRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `provider` under the service key of `url`.
    ///
    /// Fails with a configuration error if the key is already taken.
    pub fn add_provider(&self, url: &Address, provider: Arc<dyn Provider>) -> Result<()> {
        let key = url.service_key();
        let mut providers = self.providers.write().unwrap_or_else(PoisonError::into_inner);
        if providers.contains_key(&key) {
            return Err(MoonrpcError::Config(format!("provider already exist: {}", key)));
        }
        providers.insert(key, provider);
        info!("Router added provider: url={}", url);
        Ok(())
    }

    /// Returns true if a provider was registered under the key of `url`.
    pub fn remove_provider(&self, url: &Address) -> bool {
        let removed = self
            .providers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&url.service_key())
            .is_some();
        if removed {
            info!("Router removed provider: url={}", url);
        }
        removed
    }

    pub fn contains(&self, url: &Address) -> bool {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&url.service_key())
    }

    pub fn len(&self) -> usize {
        self.providers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Routes `request` to its provider.
    ///
    /// An unknown service key produces a framework error response.
    pub fn handle(&self, request: &Request) -> Response {
        let key = request_service_key(request);
        let provider = self
            .providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned();

        match provider {
            Some(provider) => provider.invoke(request),
            None => {
                error!("Router cannot route request {}: provider not exist serviceKey={}", request.id, key);
                Response::error(request.id, &MoonrpcError::ServiceNotFound(key))
            }
        }
    }
}
