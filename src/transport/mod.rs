//! Framing transport (C1): reads/writes [`Frame`](crate::wire::Frame)s over
//! whatever byte stream connects us to a capture helper, independent of
//! whether that stream is a local subprocess's stdio or a remote TCP/WS
//! connection.

pub mod ipc;
pub mod remote;

use async_trait::async_trait;
use thiserror::Error;

use crate::wire::{Frame, WireError, FRAME_HEADER_LEN, MAX_FRAME_SIZE};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("wire error: {0}")]
    Wire(#[from] WireError),
    #[error("transport closed")]
    Closed,
    #[error("helper process exited: {0}")]
    ProcessExited(String),
}

/// Abstracts "where frames come from", mirroring the teacher's small
/// trait-over-heterogeneous-backends pattern for packet sources.
#[async_trait]
pub trait FrameTransport: Send {
    async fn read_frame(&mut self) -> Result<Frame, TransportError>;
    async fn write_frame(&mut self, frame: &Frame) -> Result<(), TransportError>;
    async fn shutdown(&mut self) -> Result<(), TransportError>;

    /// OS pid of the backing process, if this transport is IPC-backed.
    fn pid(&self) -> Option<u32> {
        None
    }
}

/// Read exactly one frame from an `AsyncRead` stream: header first, then
/// exactly `size` content bytes, handing the whole buffer to
/// [`Frame::decode`].
pub(crate) async fn read_frame_from<R>(reader: &mut R) -> Result<Frame, TransportError>
where
    R: tokio::io::AsyncRead + Unpin,
{
    use tokio::io::AsyncReadExt;

    let mut header = [0u8; FRAME_HEADER_LEN];
    reader.read_exact(&mut header).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            TransportError::Closed
        } else {
            TransportError::Io(e)
        }
    })?;

    let size = u32::from_be_bytes(header[5..9].try_into().unwrap());
    if size > MAX_FRAME_SIZE {
        return Err(TransportError::Wire(WireError::TooLarge(size)));
    }

    let mut buf = Vec::with_capacity(FRAME_HEADER_LEN + size as usize);
    buf.extend_from_slice(&header);
    buf.resize(FRAME_HEADER_LEN + size as usize, 0);
    reader.read_exact(&mut buf[FRAME_HEADER_LEN..]).await?;

    Ok(Frame::decode(&buf)?)
}

pub(crate) async fn write_frame_to<W>(writer: &mut W, frame: &Frame) -> Result<(), TransportError>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    use tokio::io::AsyncWriteExt;
    writer.write_all(&frame.encode()).await?;
    writer.flush().await?;
    Ok(())
}
