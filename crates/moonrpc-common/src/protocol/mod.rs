pub mod error;
pub mod requests;
pub mod responses;


pub use error::{ErrorKind, MoonrpcError, Result, RpcError};
pub use requests::{next_request_id, CallKind, Request, RequestId, RequestIdGenerator, RpcArgs};
pub use responses::{Response, RpcResult};

/// Either side of an exchange, as carried in one frame body.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(Request),
    Response(Response),
}

impl Message {
    pub fn id(&self) -> RequestId {
        match self {
            Message::Request(request) => request.id,
            Message::Response(response) => response.id,
        }
    }
}
