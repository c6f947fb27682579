//! moonrpc Transport Layer
//!
//! This module provides the wire frame and the codec used by both the
//! client and the server.
//!
//! # Wire Format
//!
//! ```text
//! [16-byte header: magic, version, flag, request id, body length] + [body]
//! ```
//!
//! The body is produced by a [`Codec`]; [`DefaultCodec`] selects a
//! [`Serializer`] by the address `serialization` parameter.
//!
//! # Message Size Limits
//!
//! Readers refuse any frame whose announced body exceeds the configured
//! maximum ([`DEFAULT_MAX_FRAME_SIZE`] unless overridden) before allocating
//! a buffer for it.

pub mod codec;
pub mod frame;

pub use codec::{default_serializers, Codec, DefaultCodec, JsonSerializer, Serializer};
pub use frame::{
    encode_frame, read_frame, write_frame, Frame, FrameHeader, MessageType, DEFAULT_MAX_FRAME_SIZE,
    HEADER_SIZE,
};
