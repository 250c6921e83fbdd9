use crate::{ProtocolError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

/// Maximum frame size (10MB for safety)
pub const MAX_FRAME_SIZE: u32 = 10 * 1024 * 1024;

/// Default maximum frame size for most deployments (1MB)
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 1024 * 1024;

/// Reads one length-prefixed frame of serialized message bytes from an
/// async reader. Payload decoding is the codec's job, not the frame's.
pub async fn read_frame<R>(reader: &mut R, max_frame_size: u32) -> Result<Bytes>
where
    R: AsyncRead + Unpin,
{
    // Read 4-byte big-endian length prefix
    let length = reader.read_u32().await?;

    if length > max_frame_size {
        warn!(
            "Received oversized frame: {} bytes (max: {})",
            length, max_frame_size
        );
        return Err(ProtocolError::FrameTooLarge(length, max_frame_size));
    }

    debug!("Reading frame of {} bytes", length);

    let mut payload = vec![0u8; length as usize];
    reader.read_exact(&mut payload).await?;

    Ok(Bytes::from(payload))
}

/// Writes one length-prefixed frame to an async writer.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let length = payload.len() as u32;

    debug!("Writing frame of {} bytes", length);

    // Write length prefix (4 bytes, big-endian)
    writer.write_u32(length).await?;
    writer.write_all(payload).await?;

    // Flush to ensure data is sent
    writer.flush().await?;

    Ok(())
}

/// Codec for use with tokio_util::codec::Framed
pub struct FrameCodec {
    max_frame_size: u32,
}

impl FrameCodec {
    pub fn new(max_frame_size: u32) -> Self {
        Self { max_frame_size }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl tokio_util::codec::Decoder for FrameCodec {
    type Item = Bytes;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        // Need at least 4 bytes for length prefix
        if src.len() < 4 {
            return Ok(None);
        }

        // Peek at length without consuming
        let mut length_bytes = [0u8; 4];
        length_bytes.copy_from_slice(&src[..4]);
        let length = u32::from_be_bytes(length_bytes);

        if length > self.max_frame_size {
            warn!(
                "Received oversized frame: {} bytes (max: {})",
                length, self.max_frame_size
            );
            return Err(ProtocolError::FrameTooLarge(length, self.max_frame_size));
        }

        // Check if we have the full frame
        let frame_size = 4 + length as usize;
        if src.len() < frame_size {
            // Not enough data yet, reserve space
            src.reserve(frame_size - src.len());
            return Ok(None);
        }

        // We have a complete frame, consume it
        src.advance(4); // Skip length prefix
        let payload = src.split_to(length as usize);

        Ok(Some(payload.freeze()))
    }
}

impl tokio_util::codec::Encoder<Bytes> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<()> {
        let length = item.len() as u32;

        dst.reserve(4 + item.len());
        dst.put_u32(length);
        dst.put_slice(&item);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Codec, JsonCodec, Message};

    #[tokio::test]
    async fn test_frame_roundtrip() {
        let payload = JsonCodec.encode(&Message::hello("realm1")).unwrap();

        let mut buffer = Vec::new();
        write_frame(&mut buffer, &payload).await.unwrap();

        let mut cursor = std::io::Cursor::new(buffer);
        let decoded = read_frame(&mut cursor, DEFAULT_MAX_FRAME_SIZE)
            .await
            .unwrap();

        assert_eq!(payload, decoded);
        assert!(matches!(
            JsonCodec.decode(&decoded).unwrap(),
            Message::Hello { .. }
        ));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let mut buffer = Vec::new();

        // Write a length that exceeds max
        buffer.extend_from_slice(&(DEFAULT_MAX_FRAME_SIZE + 1).to_be_bytes());

        let mut cursor = std::io::Cursor::new(buffer);
        let result = read_frame(&mut cursor, DEFAULT_MAX_FRAME_SIZE).await;

        assert!(matches!(result, Err(ProtocolError::FrameTooLarge(_, _))));
    }

    #[test]
    fn test_codec_decode_incomplete() {
        use tokio_util::codec::Decoder;

        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::new();

        // Only 2 bytes, need 4 for length
        buf.extend_from_slice(&[0, 0]);

        let result = codec.decode(&mut buf).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_codec_frame_roundtrip() {
        use tokio_util::codec::{Decoder, Encoder};

        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::new();

        codec
            .encode(Bytes::from_static(b"[1,\"realm1\",{}]"), &mut buf)
            .unwrap();

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, Bytes::from_static(b"[1,\"realm1\",{}]"));
        assert!(buf.is_empty());
    }
}
