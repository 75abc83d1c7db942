//! Frame decoding from an async byte stream.

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{NsqError, Result};
use crate::protocol::frame::{Frame, FrameType};

/// Read exactly one frame from the stream.
///
/// Reads the 4-byte size, the 4-byte type, then exactly `size - 4`
/// payload bytes. Any short read (stream closed mid-frame, zero bytes)
/// surfaces as [`NsqError::Connection`]; a partial frame is never
/// returned. A frame declaring a payload larger than `max_frame_size`
/// fails with [`NsqError::Protocol`] before any payload read is
/// attempted, so corrupt or adversarial input cannot force an unbounded
/// allocation.
pub async fn read_frame<R>(stream: &mut R, max_frame_size: u32) -> Result<Frame>
where
    R: AsyncRead + Unpin,
{
    let size = read_u32(stream).await?;
    let frame_type_raw = read_u32(stream).await?;
    let frame_type = FrameType::try_from(frame_type_raw)?;

    let payload_len = size.saturating_sub(4);
    if payload_len > max_frame_size {
        return Err(NsqError::Protocol(format!(
            "frame declares {payload_len} byte payload, max is {max_frame_size}"
        )));
    }

    let mut payload = BytesMut::zeroed(payload_len as usize);
    stream
        .read_exact(&mut payload)
        .await
        .map_err(|e| NsqError::Connection(format!("stream closed mid-frame: {e}")))?;

    Ok(Frame::new(frame_type, payload.freeze()))
}

async fn read_u32<R>(stream: &mut R) -> Result<u32>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 4];
    stream
        .read_exact(&mut buf)
        .await
        .map_err(|e| NsqError::Connection(format!("stream closed: {e}")))?;
    Ok(u32::from_be_bytes(buf))
}
