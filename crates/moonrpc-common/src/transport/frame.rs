use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::protocol::error::{MoonrpcError, Result};
use crate::protocol::RequestId;

/// Size of the fixed frame header in bytes.
pub const HEADER_SIZE: usize = 16;

/// Leading marker of every frame ("MN").
pub const MAGIC: u16 = 0x4D4E;

/// Frame layout version written by this implementation.
pub const FRAME_VERSION: u8 = 1;

/// Offset of the 4-byte body length field inside the header.
pub const LENGTH_OFFSET: usize = 12;

/// Maximum frame body size (100 MB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 100 * 1024 * 1024;

/// Message-type flag carried in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Request = 0x01,
    Response = 0x02,
}

impl TryFrom<u8> for MessageType {
    type Error = MoonrpcError;

    fn try_from(flag: u8) -> Result<Self> {
        match flag {
            0x01 => Ok(MessageType::Request),
            0x02 => Ok(MessageType::Response),
            other => Err(MoonrpcError::InvalidFrame(format!("unknown message type flag 0x{:02x}", other))),
        }
    }
}

/// Decoded frame header.
///
/// ```text
/// 0      2         3      4             12            16
/// +------+---------+------+-------------+-------------+------------+
/// | magic| version | flag | request id  | body length | body ...   |
/// | u16  | u8      | u8   | u64         | u32         |            |
/// +------+---------+------+-------------+-------------+------------+
/// ```
///
/// All integers are big-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub message_type: MessageType,
    pub request_id: RequestId,
    pub body_len: u32,
}

impl FrameHeader {
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..2].copy_from_slice(&MAGIC.to_be_bytes());
        buf[2] = FRAME_VERSION;
        buf[3] = self.message_type as u8;
        buf[4..12].copy_from_slice(&self.request_id.to_be_bytes());
        buf[LENGTH_OFFSET..HEADER_SIZE].copy_from_slice(&self.body_len.to_be_bytes());
        buf
    }

    /// Parses a header and validates the announced body length against
    /// `max_frame_size` so callers never allocate an oversized buffer.
    pub fn decode(buf: &[u8; HEADER_SIZE], max_frame_size: usize) -> Result<Self> {
        let magic = u16::from_be_bytes([buf[0], buf[1]]);
        if magic != MAGIC {
            return Err(MoonrpcError::InvalidFrame(format!("bad magic 0x{:04x}", magic)));
        }
        if buf[2] != FRAME_VERSION {
            return Err(MoonrpcError::InvalidFrame(format!("unsupported frame version {}", buf[2])));
        }
        let message_type = MessageType::try_from(buf[3])?;

        let mut id = [0u8; 8];
        id.copy_from_slice(&buf[4..12]);
        let request_id = u64::from_be_bytes(id);

        let mut len = [0u8; 4];
        len.copy_from_slice(&buf[LENGTH_OFFSET..HEADER_SIZE]);
        let body_len = u32::from_be_bytes(len);

        if body_len as usize > max_frame_size {
            return Err(MoonrpcError::FrameTooLarge {
                size: body_len as usize,
                max: max_frame_size,
            });
        }

        Ok(FrameHeader {
            message_type,
            request_id,
            body_len,
        })
    }
}

/// A complete frame as read off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    pub body: Vec<u8>,
}

/// Builds the wire bytes for one frame.
pub fn encode_frame(message_type: MessageType, request_id: RequestId, body: &[u8]) -> Result<Vec<u8>> {
    let body_len = u32::try_from(body.len()).map_err(|_| MoonrpcError::FrameTooLarge {
        size: body.len(),
        max: u32::MAX as usize,
    })?;
    let header = FrameHeader {
        message_type,
        request_id,
        body_len,
    };

    let mut buf = Vec::with_capacity(HEADER_SIZE + body.len());
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(body);
    Ok(buf)
}

/// Reads one frame.
///
/// Returns `Ok(None)` when the peer closed the stream cleanly before a new
/// header started; a stream ending inside a header is an invalid frame.
pub async fn read_frame<R>(reader: &mut R, max_frame_size: usize) -> Result<Option<Frame>>
where
    R: AsyncRead + Unpin,
{
    let mut header_buf = [0u8; HEADER_SIZE];
    let mut filled = 0;
    while filled < HEADER_SIZE {
        let n = reader
            .read(&mut header_buf[filled..])
            .await
            .map_err(|e| map_io_error(e, "reading frame header"))?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(MoonrpcError::InvalidFrame(format!(
                "stream ended after {} of {} header bytes",
                filled, HEADER_SIZE
            )));
        }
        filled += n;
    }

    let header = FrameHeader::decode(&header_buf, max_frame_size)?;

    let mut body = vec![0u8; header.body_len as usize];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|e| map_io_error(e, "reading frame body"))?;

    Ok(Some(Frame { header, body }))
}

/// Writes pre-encoded frame bytes and flushes.
pub async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(frame)
        .await
        .map_err(|e| map_io_error(e, "writing frame"))?;
    writer
        .flush()
        .await
        .map_err(|e| map_io_error(e, "flushing stream"))?;
    Ok(())
}

/// Map IO errors to appropriate MoonrpcError variants
fn map_io_error(err: std::io::Error, context: &str) -> MoonrpcError {
    match err.kind() {
        std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::ConnectionAborted
        | std::io::ErrorKind::BrokenPipe
        | std::io::ErrorKind::NotConnected
        | std::io::ErrorKind::UnexpectedEof => {
            MoonrpcError::Connection(format!("{}: Connection lost", context))
        }
        _ => MoonrpcError::Io(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let header = FrameHeader {
            message_type: MessageType::Response,
            request_id: 0x0102030405060708,
            body_len: 300,
        };
        let bytes = header.encode();
        assert_eq!(&bytes[0..2], &[0x4D, 0x4E]);
        assert_eq!(bytes[3], 0x02);
        assert_eq!(&bytes[LENGTH_OFFSET..], &300u32.to_be_bytes());
        assert_eq!(FrameHeader::decode(&bytes, DEFAULT_MAX_FRAME_SIZE).unwrap(), header);
    }

    #[test]
    fn test_oversized_length_rejected_before_allocation() {
        let header = FrameHeader {
            message_type: MessageType::Request,
            request_id: 1,
            body_len: 2048,
        };
        let err = FrameHeader::decode(&header.encode(), 1024).unwrap_err();
        assert!(matches!(err, MoonrpcError::FrameTooLarge { size: 2048, max: 1024 }));
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut bytes = FrameHeader {
            message_type: MessageType::Request,
            request_id: 1,
            body_len: 0,
        }
        .encode();
        bytes[0] = 0;
        assert!(matches!(
            FrameHeader::decode(&bytes, DEFAULT_MAX_FRAME_SIZE),
            Err(MoonrpcError::InvalidFrame(_))
        ));
    }

    #[test]
    fn test_unknown_flag_rejected() {
        assert!(MessageType::try_from(0x7f).is_err());
    }

    #[tokio::test]
    async fn test_read_frame_over_stream() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let frame = encode_frame(MessageType::Request, 42, b"hello").unwrap();
        write_frame(&mut client, &frame).await.unwrap();
        drop(client);

        let read = read_frame(&mut server, DEFAULT_MAX_FRAME_SIZE).await.unwrap().unwrap();
        assert_eq!(read.header.request_id, 42);
        assert_eq!(read.header.message_type, MessageType::Request);
        assert_eq!(read.body, b"hello");

        // Clean close after a full frame.
        assert!(read_frame(&mut server, DEFAULT_MAX_FRAME_SIZE).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_truncated_body_is_connection_error() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let frame = encode_frame(MessageType::Response, 1, b"abcdef").unwrap();
        write_frame(&mut client, &frame[..HEADER_SIZE + 2]).await.unwrap();
        drop(client);

        let err = read_frame(&mut server, DEFAULT_MAX_FRAME_SIZE).await.unwrap_err();
        assert!(matches!(err, MoonrpcError::Connection(_)));
    }

    #[tokio::test]
    async fn test_truncated_header_is_invalid_frame() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let frame = encode_frame(MessageType::Request, 7, b"abc").unwrap();
        write_frame(&mut client, &frame[..5]).await.unwrap();
        drop(client);

        let err = read_frame(&mut server, DEFAULT_MAX_FRAME_SIZE).await.unwrap_err();
        assert!(matches!(err, MoonrpcError::InvalidFrame(_)));
    }

    #[tokio::test]
    async fn test_empty_stream_is_clean_close() {
        let (client, mut server) = tokio::io::duplex(1024);
        drop(client);
        assert!(read_frame(&mut server, DEFAULT_MAX_FRAME_SIZE).await.unwrap().is_none());
    }
}
