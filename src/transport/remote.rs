//! Remote transport: frames over a raw TCP connection or an upgraded
//! axum WebSocket, unified behind [`FrameTransport`] so the engine never
//! needs to know which one it's talking to.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::io::{BufReader, BufWriter};
use tokio::net::TcpStream;

use super::{read_frame_from, write_frame_to, FrameTransport, TransportError};
use crate::wire::Frame;

/// A plain TCP connection from a remote capture helper.
pub struct TcpTransport {
    reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
    writer: BufWriter<tokio::net::tcp::OwnedWriteHalf>,
}

impl TcpTransport {
    pub fn new(stream: TcpStream) -> Self {
        let (read_half, write_half) = stream.into_split();
        Self {
            reader: BufReader::new(read_half),
            writer: BufWriter::new(write_half),
        }
    }
}

#[async_trait]
impl FrameTransport for TcpTransport {
    async fn read_frame(&mut self) -> Result<Frame, TransportError> {
        read_frame_from(&mut self.reader).await
    }

    async fn write_frame(&mut self, frame: &Frame) -> Result<(), TransportError> {
        write_frame_to(&mut self.writer, frame).await
    }

    async fn shutdown(&mut self) -> Result<(), TransportError> {
        use tokio::io::AsyncWriteExt;
        self.writer.get_mut().shutdown().await?;
        Ok(())
    }
}

/// A browser/WS-capable remote capture helper, upgraded by the remote
/// listener. Frames are carried as binary WebSocket messages.
pub struct WsTransport {
    socket: WebSocket,
}

impl WsTransport {
    pub fn new(socket: WebSocket) -> Self {
        Self { socket }
    }
}

#[async_trait]
impl FrameTransport for WsTransport {
    async fn read_frame(&mut self) -> Result<Frame, TransportError> {
        loop {
            match self.socket.next().await {
                Some(Ok(Message::Binary(data))) => return Ok(Frame::decode(&data)?),
                Some(Ok(Message::Close(_))) | None => return Err(TransportError::Closed),
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    return Err(TransportError::Io(std::io::Error::new(
                        std::io::ErrorKind::Other,
                        e,
                    )))
                }
            }
        }
    }

    async fn write_frame(&mut self, frame: &Frame) -> Result<(), TransportError> {
        self.socket
            .send(Message::Binary(frame.encode()))
            .await
            .map_err(|e| TransportError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))
    }

    async fn shutdown(&mut self) -> Result<(), TransportError> {
        let _ = self.socket.send(Message::Close(None)).await;
        Ok(())
    }
}
