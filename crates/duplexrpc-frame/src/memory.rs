//! In-process [`PacketTransport`] pair.
//!
//! Packets are handed over as values, no encoding takes place. Useful for
//! tests and for hosting services inside the same process.

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use crate::error::{FrameError, Result};
use crate::packet::Packet;
use crate::transport::PacketTransport;

/// Packets buffered per direction before `send` waits.
pub const DEFAULT_CAPACITY: usize = 256;

/// One end of an in-process transport pair.
pub struct MemoryTransport {
    tx: parking_lot::Mutex<Option<mpsc::Sender<Packet>>>,
    rx: Mutex<mpsc::Receiver<Packet>>,
}

/// Two connected in-process transports.
pub fn pair() -> (MemoryTransport, MemoryTransport) {
    pair_with_capacity(DEFAULT_CAPACITY)
}

pub fn pair_with_capacity(capacity: usize) -> (MemoryTransport, MemoryTransport) {
    let (a_tx, b_rx) = mpsc::channel(capacity);
    let (b_tx, a_rx) = mpsc::channel(capacity);
    (MemoryTransport::new(a_tx, a_rx), MemoryTransport::new(b_tx, b_rx))
}

impl MemoryTransport {
    fn new(tx: mpsc::Sender<Packet>, rx: mpsc::Receiver<Packet>) -> Self {
        Self {
            tx: parking_lot::Mutex::new(Some(tx)),
            rx: Mutex::new(rx),
        }
    }
}

#[async_trait]
impl PacketTransport for MemoryTransport {
    async fn send(&self, packet: Packet) -> Result<()> {
        let tx = self.tx.lock().clone();
        let Some(tx) = tx else {
            return Err(FrameError::ConnectionClosed);
        };
        tx.send(packet)
            .await
            .map_err(|_| FrameError::ConnectionClosed)
    }

    async fn receive(&self) -> Result<Packet> {
        let mut rx = self.rx.lock().await;
        rx.recv().await.ok_or(FrameError::ConnectionClosed)
    }

    async fn close(&self, cause: Option<&str>) {
        if self.tx.lock().take().is_some() {
            debug!(cause = cause.unwrap_or("none"), "closing memory transport");
        }
        // Refuse further packets from the peer; already queued ones are still delivered.
        if let Ok(mut rx) = self.rx.try_lock() {
            rx.close();
        }
    }
}
