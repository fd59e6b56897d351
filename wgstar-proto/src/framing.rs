use crate::{ProtocolError, Result};
use bytes::{Buf, BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

/// Reserved length-prefix value meaning "credentials rejected, no payload".
pub const INVALID_FRAME_MARKER: u32 = 0xFFFF;

/// Largest legal payload. Anything equal to or above the marker value would
/// be indistinguishable from the rejection sentinel on the wire.
pub const MAX_PAYLOAD_SIZE: usize = (INVALID_FRAME_MARKER - 1) as usize;

/// Outcome of reading one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameRead {
    /// A complete ciphertext payload
    Payload(Vec<u8>),
    /// The peer rejected our credentials; no payload follows
    InvalidMarker,
}

/// Reads a length-prefixed frame from an async reader.
///
/// Blocks until a whole frame arrives, looping over partial reads. A
/// connection that closes before a full frame is delivered yields
/// [`ProtocolError::ConnectionClosed`].
pub async fn read_frame<R>(reader: &mut R) -> Result<FrameRead>
where
    R: AsyncRead + Unpin,
{
    // 4-byte big-endian length prefix
    let length = match reader.read_u32().await {
        Ok(length) => length,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(ProtocolError::ConnectionClosed)
        }
        Err(e) => return Err(e.into()),
    };

    if length == INVALID_FRAME_MARKER {
        debug!("received invalid-credentials marker");
        return Ok(FrameRead::InvalidMarker);
    }

    if length as usize > MAX_PAYLOAD_SIZE {
        warn!(
            "received oversized frame: {} bytes (max: {})",
            length, MAX_PAYLOAD_SIZE
        );
        return Err(ProtocolError::FrameTooLarge(length as usize, MAX_PAYLOAD_SIZE));
    }

    debug!("reading frame of {} bytes", length);

    let mut payload = vec![0u8; length as usize];
    match reader.read_exact(&mut payload).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(ProtocolError::ConnectionClosed)
        }
        Err(e) => return Err(e.into()),
    }

    Ok(FrameRead::Payload(payload))
}

/// Writes a length-prefixed frame to an async writer.
///
/// Fails fast with [`ProtocolError::FrameTooLarge`] if the payload length
/// would collide with the rejection sentinel.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_PAYLOAD_SIZE {
        warn!(
            "refusing to write oversized frame: {} bytes (max: {})",
            payload.len(),
            MAX_PAYLOAD_SIZE
        );
        return Err(ProtocolError::FrameTooLarge(payload.len(), MAX_PAYLOAD_SIZE));
    }

    debug!("writing frame of {} bytes", payload.len());

    writer.write_u32(payload.len() as u32).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;

    Ok(())
}

/// Writes exactly the 4-byte rejection marker and nothing else.
///
/// Tells the peer its credentials were rejected without leaking anything
/// further; contrast with in-band `error_response`, used once the channel
/// has authenticated.
pub async fn send_invalid_marker<W>(writer: &mut W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_u32(INVALID_FRAME_MARKER).await?;
    writer.flush().await?;
    Ok(())
}

/// Codec for use with tokio_util::codec::Framed
#[derive(Debug, Default)]
pub struct FrameCodec;

impl tokio_util::codec::Decoder for FrameCodec {
    type Item = FrameRead;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        // Need at least 4 bytes for the length prefix
        if src.len() < 4 {
            return Ok(None);
        }

        // Peek at length without consuming
        let mut length_bytes = [0u8; 4];
        length_bytes.copy_from_slice(&src[..4]);
        let length = u32::from_be_bytes(length_bytes);

        if length == INVALID_FRAME_MARKER {
            src.advance(4);
            return Ok(Some(FrameRead::InvalidMarker));
        }

        if length as usize > MAX_PAYLOAD_SIZE {
            warn!(
                "received oversized frame: {} bytes (max: {})",
                length, MAX_PAYLOAD_SIZE
            );
            return Err(ProtocolError::FrameTooLarge(length as usize, MAX_PAYLOAD_SIZE));
        }

        // Check if we have the full frame
        let frame_size = 4 + length as usize;
        if src.len() < frame_size {
            src.reserve(frame_size - src.len());
            return Ok(None);
        }

        src.advance(4);
        let payload = src.split_to(length as usize);

        Ok(Some(FrameRead::Payload(payload.to_vec())))
    }
}

impl tokio_util::codec::Encoder<FrameRead> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: FrameRead, dst: &mut BytesMut) -> Result<()> {
        match item {
            FrameRead::Payload(payload) => {
                if payload.len() > MAX_PAYLOAD_SIZE {
                    return Err(ProtocolError::FrameTooLarge(payload.len(), MAX_PAYLOAD_SIZE));
                }
                dst.reserve(4 + payload.len());
                dst.put_u32(payload.len() as u32);
                dst.put_slice(&payload);
            }
            FrameRead::InvalidMarker => {
                dst.reserve(4);
                dst.put_u32(INVALID_FRAME_MARKER);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::ReadBuf;

    /// Delivers its buffer one byte per read call.
    struct TrickleReader {
        data: Vec<u8>,
        pos: usize,
    }

    impl TrickleReader {
        fn new(data: Vec<u8>) -> Self {
            Self { data, pos: 0 }
        }
    }

    impl AsyncRead for TrickleReader {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            let this = self.get_mut();
            if this.pos < this.data.len() && buf.remaining() > 0 {
                buf.put_slice(&this.data[this.pos..this.pos + 1]);
                this.pos += 1;
            }
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_frame_round_trip() {
        let mut buffer = Vec::new();
        write_frame(&mut buffer, b"ciphertext bytes").await.unwrap();

        let mut cursor = std::io::Cursor::new(buffer);
        let frame = read_frame(&mut cursor).await.unwrap();

        assert_eq!(frame, FrameRead::Payload(b"ciphertext bytes".to_vec()));
    }

    #[tokio::test]
    async fn test_empty_payload_round_trip() {
        let mut buffer = Vec::new();
        write_frame(&mut buffer, b"").await.unwrap();

        let mut cursor = std::io::Cursor::new(buffer);
        let frame = read_frame(&mut cursor).await.unwrap();

        assert_eq!(frame, FrameRead::Payload(Vec::new()));
    }

    #[tokio::test]
    async fn test_read_from_one_byte_chunks() {
        let mut buffer = Vec::new();
        write_frame(&mut buffer, b"delivered one byte at a time")
            .await
            .unwrap();

        let mut reader = TrickleReader::new(buffer);
        let frame = read_frame(&mut reader).await.unwrap();

        assert_eq!(
            frame,
            FrameRead::Payload(b"delivered one byte at a time".to_vec())
        );
    }

    #[tokio::test]
    async fn test_invalid_marker_round_trip() {
        let mut buffer = Vec::new();
        send_invalid_marker(&mut buffer).await.unwrap();

        assert_eq!(buffer, INVALID_FRAME_MARKER.to_be_bytes());

        let mut cursor = std::io::Cursor::new(buffer);
        let frame = read_frame(&mut cursor).await.unwrap();

        assert_eq!(frame, FrameRead::InvalidMarker);
    }

    #[tokio::test]
    async fn test_marker_consumes_only_four_bytes() {
        let mut buffer = Vec::new();
        send_invalid_marker(&mut buffer).await.unwrap();
        buffer.extend_from_slice(b"trailing");

        let mut cursor = std::io::Cursor::new(buffer);
        let frame = read_frame(&mut cursor).await.unwrap();

        assert_eq!(frame, FrameRead::InvalidMarker);
        assert_eq!(cursor.position(), 4);
    }

    #[tokio::test]
    async fn test_oversized_write_rejected() {
        let payload = vec![0u8; MAX_PAYLOAD_SIZE + 1];
        let mut buffer = Vec::new();

        let result = write_frame(&mut buffer, &payload).await;

        assert!(matches!(result, Err(ProtocolError::FrameTooLarge(_, _))));
        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn test_max_size_payload_accepted() {
        let payload = vec![0xA5u8; MAX_PAYLOAD_SIZE];
        let mut buffer = Vec::new();
        write_frame(&mut buffer, &payload).await.unwrap();

        let mut cursor = std::io::Cursor::new(buffer);
        let frame = read_frame(&mut cursor).await.unwrap();

        assert_eq!(frame, FrameRead::Payload(payload));
    }

    #[tokio::test]
    async fn test_oversized_length_prefix_rejected() {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(&0x0001_0000u32.to_be_bytes());

        let mut cursor = std::io::Cursor::new(buffer);
        let result = read_frame(&mut cursor).await;

        assert!(matches!(result, Err(ProtocolError::FrameTooLarge(_, _))));
    }

    #[tokio::test]
    async fn test_eof_before_length_is_connection_closed() {
        let mut cursor = std::io::Cursor::new(vec![0u8, 0]);
        let result = read_frame(&mut cursor).await;

        assert!(matches!(result, Err(ProtocolError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_eof_mid_payload_is_connection_closed() {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(&8u32.to_be_bytes());
        buffer.extend_from_slice(b"only3");

        let mut cursor = std::io::Cursor::new(buffer);
        let result = read_frame(&mut cursor).await;

        assert!(matches!(result, Err(ProtocolError::ConnectionClosed)));
    }

    #[test]
    fn test_codec_decode_incomplete() {
        use tokio_util::codec::Decoder;

        let mut codec = FrameCodec;
        let mut buf = BytesMut::new();

        // Only 2 bytes, need 4 for length
        buf.extend_from_slice(&[0, 0]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        // Length says 8 but only 3 payload bytes present
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&8u32.to_be_bytes());
        buf.extend_from_slice(b"abc");
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_codec_round_trip() {
        use tokio_util::codec::{Decoder, Encoder};

        let mut codec = FrameCodec;
        let mut buf = BytesMut::new();

        codec
            .encode(FrameRead::Payload(b"payload".to_vec()), &mut buf)
            .unwrap();
        codec.encode(FrameRead::InvalidMarker, &mut buf).unwrap();

        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(FrameRead::Payload(b"payload".to_vec()))
        );
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(FrameRead::InvalidMarker)
        );
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }
}
