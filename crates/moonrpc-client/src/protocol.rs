use moonrpc_common::address::Address;
use moonrpc_common::protocol::error::Result;
use moonrpc_common::transport::{Codec, DefaultCodec};
use std::sync::Arc;

use crate::client::ClientConfig;
use crate::endpoint::{Endpoint, ReferenceEndpoint};

/// Creates endpoints for a transport protocol.
pub trait Protocol: Send + Sync {
    fn name(&self) -> &str;

    /// Builds and initialises an endpoint that calls `service_url` using the
    /// call parameters of `url`.
    fn refer(&self, url: &Address, service_url: &Address) -> Result<Arc<dyn Endpoint>>;
}

/// The framed TCP protocol (`moon://`).
pub struct MoonProtocol {
    config: ClientConfig,
    codec: Arc<dyn Codec>,
}

impl MoonProtocol {
    pub const NAME: &'static str = "moon";

    pub fn new(config: ClientConfig) -> Self {
        Self::with_codec(config, Arc::new(DefaultCodec::new()))
    }

    pub fn with_codec(config: ClientConfig, codec: Arc<dyn Codec>) -> Self {
        Self { config, codec }
    }
}

impl Default for MoonProtocol {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}

impl Protocol for MoonProtocol {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn refer(&self, url: &Address, service_url: &Address) -> Result<Arc<dyn Endpoint>> {
        let endpoint = ReferenceEndpoint::with_codec(
            url.clone(),
            service_url.clone(),
            self.config.clone(),
            self.codec.clone(),
        );
        endpoint.init()?;
        Ok(Arc::new(endpoint))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeProvider;
    use moonrpc_common::protocol::Request;
    use serde_json::json;

    #[tokio::test]
    async fn test_refer_returns_initialised_endpoint() {
        let provider = FakeProvider::echo().await;
        let protocol = MoonProtocol::default();
        assert_eq!(protocol.name(), "moon");

        let endpoint = protocol.refer(&provider.address, &provider.address).unwrap();
        assert!(endpoint.is_available());
        assert_eq!(endpoint.url(), &provider.address);

        let request = Request::new("demo.EchoService", "echo").with_arg("string", json!("hi"));
        let response = endpoint.call(request).await.unwrap();
        assert_eq!(response.result, Some(json!("hi")));
        endpoint.destroy();
    }

    #[tokio::test]
    async fn test_refer_rejects_invalid_config() {
        let provider = FakeProvider::echo().await;
        let protocol = MoonProtocol::new(ClientConfig::default().with_max_frame_size(0));
        assert!(protocol.refer(&provider.address, &provider.address).is_err());
    }
}
