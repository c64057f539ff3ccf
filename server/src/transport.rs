//! Packet transports a session can be built on
//!
//! A session only needs something that yields decoded [`Packet`]s and
//! something that accepts them. [`TcpTransport`] frames bincode-encoded
//! packets with a big-endian `u32` length prefix; [`ChannelTransport`] keeps
//! everything in memory for tests and embedding.

use crate::error::TransportError;
use async_trait::async_trait;
use bincode::{deserialize, serialize};
use shared::Packet;
use std::io::ErrorKind;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

/// Largest frame body accepted from or written to the wire.
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

#[async_trait]
pub trait PacketReader: Send + 'static {
    /// Next packet from the peer, or `None` once the connection is closed.
    async fn read_packet(&mut self) -> Result<Option<Packet>, TransportError>;
}

#[async_trait]
pub trait PacketWriter: Send + 'static {
    async fn write_packet(&mut self, packet: &Packet) -> Result<(), TransportError>;

    /// Flushes and shuts down the outgoing direction.
    async fn shutdown(&mut self) {}
}

pub struct TcpTransport;

impl TcpTransport {
    pub fn split(stream: TcpStream) -> (TcpPacketReader, TcpPacketWriter) {
        let (read_half, write_half) = stream.into_split();
        (
            TcpPacketReader { inner: read_half },
            TcpPacketWriter { inner: write_half },
        )
    }
}

pub struct TcpPacketReader {
    inner: OwnedReadHalf,
}

pub struct TcpPacketWriter {
    inner: OwnedWriteHalf,
}

#[async_trait]
impl PacketReader for TcpPacketReader {
    async fn read_packet(&mut self) -> Result<Option<Packet>, TransportError> {
        let len = match self.inner.read_u32().await {
            Ok(len) => len as usize,
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if len > MAX_FRAME_SIZE {
            return Err(TransportError::FrameTooLarge(len));
        }

        let mut body = vec![0u8; len];
        self.inner.read_exact(&mut body).await?;
        Ok(Some(deserialize::<Packet>(&body)?))
    }
}

#[async_trait]
impl PacketWriter for TcpPacketWriter {
    async fn write_packet(&mut self, packet: &Packet) -> Result<(), TransportError> {
        let data = encode_frame(packet)?;
        self.inner.write_all(&data).await?;
        Ok(())
    }

    async fn shutdown(&mut self) {
        let _ = self.inner.shutdown().await;
    }
}

/// Length-prefixed bincode encoding of `packet`.
pub fn encode_frame(packet: &Packet) -> Result<Vec<u8>, TransportError> {
    let body = serialize(packet)?;
    if body.len() > MAX_FRAME_SIZE {
        return Err(TransportError::FrameTooLarge(body.len()));
    }

    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

pub struct ChannelTransport;

/// The far end of a [`ChannelTransport`]: what a test or embedder uses to
/// act as the remote client.
pub struct ChannelPeer {
    pub to_server: mpsc::Sender<Packet>,
    pub from_server: mpsc::Receiver<Packet>,
}

impl ChannelTransport {
    pub fn pair(capacity: usize) -> (ChannelPacketReader, ChannelPacketWriter, ChannelPeer) {
        let (to_server, inbound) = mpsc::channel(capacity);
        let (outbound, from_server) = mpsc::channel(capacity);
        (
            ChannelPacketReader { inner: inbound },
            ChannelPacketWriter { inner: outbound },
            ChannelPeer {
                to_server,
                from_server,
            },
        )
    }
}

pub struct ChannelPacketReader {
    inner: mpsc::Receiver<Packet>,
}

pub struct ChannelPacketWriter {
    inner: mpsc::Sender<Packet>,
}

#[async_trait]
impl PacketReader for ChannelPacketReader {
    async fn read_packet(&mut self) -> Result<Option<Packet>, TransportError> {
        Ok(self.inner.recv().await)
    }
}

#[async_trait]
impl PacketWriter for ChannelPacketWriter {
    async fn write_packet(&mut self, packet: &Packet) -> Result<(), TransportError> {
        self.inner
            .send(packet.clone())
            .await
            .map_err(|_| TransportError::Closed)
    }
}
