use serde_json::Value;
use std::sync::Arc;

use crate::address::Address;
use crate::extension::{ExtensionLoader, Scope};
use crate::protocol::error::{MoonrpcError, Result};
use crate::protocol::{Message, Request, Response};
use crate::transport::frame::{encode_frame, Frame, MessageType};

/// Pluggable byte mapping for frame bodies.
///
/// Serializers work on the generic [`Value`] tree so they stay object safe;
/// the codec converts protocol messages to and from that tree.
pub trait Serializer: Send + Sync {
    /// Name used in the address `serialization` parameter.
    fn name(&self) -> &'static str;

    fn serialize(&self, value: &Value) -> Result<Vec<u8>>;

    fn deserialize(&self, data: &[u8]) -> Result<Value>;
}

/// JSON serializer, the default body format.
///
/// # Example
///
/// ```
/// use moonrpc_common::transport::{JsonSerializer, Serializer};
/// use serde_json::json;
///
/// let bytes = JsonSerializer.serialize(&json!({"n": 42})).unwrap();
/// assert_eq!(JsonSerializer.deserialize(&bytes).unwrap(), json!({"n": 42}));
/// ```
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn name(&self) -> &'static str {
        "json"
    }

    fn serialize(&self, value: &Value) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn deserialize(&self, data: &[u8]) -> Result<Value> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// A loader pre-populated with the built-in serializers.
pub fn default_serializers() -> ExtensionLoader<dyn Serializer> {
    let loader: ExtensionLoader<dyn Serializer> = ExtensionLoader::new("serializer");
    loader.register("json", Scope::Singleton, || Arc::new(JsonSerializer) as Arc<dyn Serializer>);
    loader
}

/// Turns protocol messages into frame bodies and back.
pub trait Codec: Send + Sync {
    /// Encodes `message` using the serialization selected by `address`.
    fn encode(&self, address: &Address, message: &Message) -> Result<Vec<u8>>;

    /// Decodes a body; `message_type` selects the request or response shape.
    fn decode(&self, address: &Address, message_type: MessageType, data: &[u8]) -> Result<Message>;

    /// Encodes `message` and wraps it into complete frame bytes.
    fn encode_frame(&self, address: &Address, message: &Message) -> Result<Vec<u8>> {
        let message_type = match message {
            Message::Request(_) => MessageType::Request,
            Message::Response(_) => MessageType::Response,
        };
        let body = self.encode(address, message)?;
        encode_frame(message_type, message.id(), &body)
    }

    /// Decodes the body of a frame read off the wire.
    fn decode_frame(&self, address: &Address, frame: &Frame) -> Result<Message> {
        self.decode(address, frame.header.message_type, &frame.body)
    }
}

/// Codec that picks its serializer from the address `serialization`
/// parameter.
///
/// # Example
///
/// ```
/// use moonrpc_common::address::Address;
/// use moonrpc_common::protocol::{Message, Request};
/// use moonrpc_common::transport::{Codec, DefaultCodec, MessageType};
///
/// let codec = DefaultCodec::new();
/// let address = Address::new("moon", "127.0.0.1", 9000, "demo.Echo");
/// let request = Request::new("demo.Echo", "ping");
///
/// let body = codec.encode(&address, &Message::Request(request.clone())).unwrap();
/// let decoded = codec.decode(&address, MessageType::Request, &body).unwrap();
/// assert_eq!(decoded, Message::Request(request));
/// ```
pub struct DefaultCodec {
    serializers: Arc<ExtensionLoader<dyn Serializer>>,
}

impl DefaultCodec {
    pub fn new() -> Self {
        Self::with_serializers(Arc::new(default_serializers()))
    }

    pub fn with_serializers(serializers: Arc<ExtensionLoader<dyn Serializer>>) -> Self {
        Self { serializers }
    }

    fn serializer(&self, address: &Address) -> Result<Arc<dyn Serializer>> {
        self.serializers.get(address.serialization())
    }
}

impl Default for DefaultCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Codec for DefaultCodec {
    fn encode(&self, address: &Address, message: &Message) -> Result<Vec<u8>> {
        let serializer = self.serializer(address)?;
        let value = match message {
            Message::Request(request) => serde_json::to_value(request),
            Message::Response(response) => serde_json::to_value(response),
        }
        .map_err(|e| MoonrpcError::Serialization(e.to_string()))?;
        serializer.serialize(&value)
    }

    fn decode(&self, address: &Address, message_type: MessageType, data: &[u8]) -> Result<Message> {
        let serializer = self.serializer(address)?;
        let value = serializer
            .deserialize(data)
            .map_err(|e| MoonrpcError::Serialization(e.to_string()))?;
        let message = match message_type {
            MessageType::Request => serde_json::from_value::<Request>(value).map(Message::Request),
            MessageType::Response => serde_json::from_value::<Response>(value).map(Message::Response),
        };
        message.map_err(|e| MoonrpcError::Serialization(e.to_string()))
    }
}
