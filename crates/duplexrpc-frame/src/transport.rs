use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::debug;

use crate::codec::{FrameConfig, PacketCodec};
use crate::error::{FrameError, Result};
use crate::packet::Packet;

/// Ordered packet transport.
///
/// `send` and `receive` are each ordered with respect to themselves. `send`
/// may be called concurrently; implementations serialize whole packets so
/// frames never interleave on the wire.
#[async_trait]
pub trait PacketTransport: Send + Sync {
    /// Send one packet.
    async fn send(&self, packet: Packet) -> Result<()>;

    /// Receive the next packet. Returns [`FrameError::ConnectionClosed`] once
    /// the peer has gone away or [`close`](Self::close) was called.
    async fn receive(&self) -> Result<Packet>;

    /// Close the transport. `cause` is informational.
    async fn close(&self, cause: Option<&str>);
}

/// [`PacketTransport`] over any async byte stream, framed with [`PacketCodec`].
pub struct StreamTransport<R, W> {
    reader: Mutex<FramedRead<R, PacketCodec>>,
    writer: Mutex<FramedWrite<W, PacketCodec>>,
    closed: AtomicBool,
}

impl<R, W> StreamTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W, config: FrameConfig) -> Self {
        Self {
            reader: Mutex::new(FramedRead::new(reader, PacketCodec::new(config.clone()))),
            writer: Mutex::new(FramedWrite::new(writer, PacketCodec::new(config))),
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl<S> StreamTransport<ReadHalf<S>, WriteHalf<S>>
where
    S: AsyncRead + AsyncWrite + Send,
{
    /// Split a bidirectional stream (socket, duplex pipe) into a transport.
    pub fn from_stream(stream: S, config: FrameConfig) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self::new(reader, writer, config)
    }
}

#[async_trait]
impl<R, W> PacketTransport for StreamTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn send(&self, packet: Packet) -> Result<()> {
        if self.is_closed() {
            return Err(FrameError::ConnectionClosed);
        }
        let mut writer = self.writer.lock().await;
        writer.send(packet).await
    }

    async fn receive(&self) -> Result<Packet> {
        if self.is_closed() {
            return Err(FrameError::ConnectionClosed);
        }
        let mut reader = self.reader.lock().await;
        match reader.next().await {
            Some(result) => result,
            None => Err(FrameError::ConnectionClosed),
        }
    }

    async fn close(&self, cause: Option<&str>) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(cause = cause.unwrap_or("none"), "closing stream transport");
        let mut writer = self.writer.lock().await;
        let _ = writer.close().await;
    }
}
