//! Byte-stream transport abstraction (spec §6) plus a TCP implementation.
//!
//! BLE pairing and concrete socket management beyond this trait are a
//! non-goal; `TcpTransport` is the one concrete implementation this
//! crate ships, mirroring the teacher's QUIC `ConnectedClient` but
//! framed over `meshcore_proto::frame` instead of a fixed-header frame.

use std::collections::VecDeque;
use std::net::SocketAddr;

use async_trait::async_trait;
use bytes::Bytes;
use meshcore_proto::frame::{FrameDecoder, TcpFrameDecoder, encode_tcp_frame};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::SessionError;

/// A bidirectional byte-stream transport carrying one logical frame per
/// [`Transport::recv_frame`] item (spec §6 Transport interface).
#[async_trait]
pub trait Transport: Send {
    /// Establish the connection.
    async fn connect(&mut self) -> Result<(), SessionError>;

    /// Tear down the connection. Idempotent.
    async fn disconnect(&mut self);

    /// Write one frame payload.
    async fn send(&mut self, frame_payload: Bytes) -> Result<(), SessionError>;

    /// Await the next decoded frame. `Ok(None)` means the peer closed
    /// the stream cleanly.
    async fn recv_frame(&mut self) -> Result<Option<Bytes>, SessionError>;

    /// Whether the transport currently believes it is connected.
    fn is_connected(&self) -> bool;
}

/// TCP transport using the length-prefixed framing of §4.1.
pub struct TcpTransport {
    addr: SocketAddr,
    stream: Option<TcpStream>,
    decoder: TcpFrameDecoder,
    pending: VecDeque<Bytes>,
}

impl TcpTransport {
    /// Create a transport that will connect to `addr` on
    /// [`Transport::connect`].
    #[must_use]
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr, stream: None, decoder: TcpFrameDecoder::new(), pending: VecDeque::new() }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&mut self) -> Result<(), SessionError> {
        let stream = TcpStream::connect(self.addr)
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))?;
        self.stream = Some(stream);
        self.decoder.reset();
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.stream = None;
        self.decoder.reset();
    }

    async fn send(&mut self, frame_payload: Bytes) -> Result<(), SessionError> {
        let stream = self.stream.as_mut().ok_or(SessionError::NotConnected)?;
        let framed = encode_tcp_frame(&frame_payload);
        stream.write_all(&framed).await.map_err(|e| SessionError::Transport(e.to_string()))
    }

    async fn recv_frame(&mut self) -> Result<Option<Bytes>, SessionError> {
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return Ok(Some(frame));
            }
            let stream = self.stream.as_mut().ok_or(SessionError::NotConnected)?;
            let mut chunk = [0u8; 4096];
            let n = stream
                .read(&mut chunk)
                .await
                .map_err(|e| SessionError::Transport(e.to_string()))?;
            if n == 0 {
                return Ok(None);
            }
            self.pending.extend(self.decoder.feed(&chunk[..n]));
        }
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}
