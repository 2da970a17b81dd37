//! Reassembly of chunked binary transfers.
//!
//! Chunks of one transfer may be handled out of order, since every received
//! packet is dispatched on its own task. Each transfer owns an in-memory pipe:
//! chunks are written to its sink in sequence order and the consumer reads the
//! other end. An empty chunk ends the transfer.

use std::collections::{BTreeMap, HashMap};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWriteExt, DuplexStream, ReadBuf};
use tracing::trace;

use crate::call_data::BinaryStream;

/// Table of in-progress incoming transfers, keyed by transfer id.
pub struct BinaryChannels {
    entries: parking_lot::Mutex<Entries>,
    buffer_size: usize,
}

struct Entries {
    open: HashMap<String, Arc<BinaryChannel>>,
    closed: bool,
}

/// One incoming transfer.
struct BinaryChannel {
    /// Read end, until a consumer claims it.
    stream: parking_lot::Mutex<Option<BinaryStream>>,
    claimed: AtomicBool,
    finished: AtomicBool,
    aborted: Arc<parking_lot::Mutex<Option<String>>>,
    state: tokio::sync::Mutex<Reassembly>,
}

struct Reassembly {
    expected: u64,
    pending: BTreeMap<u64, Bytes>,
    sink: Option<DuplexStream>,
}

impl BinaryChannels {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            entries: parking_lot::Mutex::new(Entries {
                open: HashMap::new(),
                closed: false,
            }),
            buffer_size: buffer_size.max(1),
        }
    }

    /// Apply one chunk. Chunks may arrive before the transfer is announced.
    pub async fn handle_chunk(&self, id: &str, sequence: u64, data: Bytes) {
        let Some(channel) = self.get_or_create(id) else {
            trace!(transfer = id, sequence, "dropping chunk after close");
            return;
        };
        channel.apply(id, sequence, data).await;
        self.remove_if_done(id, &channel);
    }

    /// Take the read end of a transfer. Bytes keep streaming in as chunks
    /// arrive. Returns `None` if the transfer was already claimed or the
    /// table is closed.
    pub fn claim(&self, id: &str) -> Option<BinaryStream> {
        let channel = self.get_or_create(id)?;
        let stream = channel.stream.lock().take();
        channel.claimed.store(true, Ordering::SeqCst);
        self.remove_if_done(id, &channel);
        stream
    }

    /// Abort every open transfer; unfinished readers get an error instead of EOF.
    pub fn abort_all(&self, reason: &str) {
        let drained: Vec<Arc<BinaryChannel>> = {
            let mut entries = self.entries.lock();
            entries.closed = true;
            entries.open.drain().map(|(_, channel)| channel).collect()
        };
        for channel in drained {
            channel.abort(reason);
        }
    }

    pub fn open_count(&self) -> usize {
        self.entries.lock().open.len()
    }

    fn get_or_create(&self, id: &str) -> Option<Arc<BinaryChannel>> {
        let mut entries = self.entries.lock();
        if entries.closed {
            return None;
        }
        let channel = entries
            .open
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(BinaryChannel::new(self.buffer_size)));
        Some(channel.clone())
    }

    /// A transfer is removed only once it has both ended and been claimed.
    fn remove_if_done(&self, id: &str, channel: &Arc<BinaryChannel>) {
        if !(channel.finished.load(Ordering::SeqCst) && channel.claimed.load(Ordering::SeqCst)) {
            return;
        }
        let mut entries = self.entries.lock();
        if entries
            .open
            .get(id)
            .is_some_and(|current| Arc::ptr_eq(current, channel))
        {
            entries.open.remove(id);
            trace!(transfer = id, "binary transfer complete");
        }
    }

    #[cfg(test)]
    fn is_finished(&self, id: &str) -> bool {
        self.entries
            .lock()
            .open
            .get(id)
            .is_some_and(|channel| channel.finished.load(Ordering::SeqCst))
    }
}

impl BinaryChannel {
    fn new(buffer_size: usize) -> Self {
        let (sink, source) = tokio::io::duplex(buffer_size);
        let aborted = Arc::new(parking_lot::Mutex::new(None));
        let reader = AbortableReader {
            inner: source,
            aborted: aborted.clone(),
        };
        Self {
            stream: parking_lot::Mutex::new(Some(BinaryStream::from_reader(reader))),
            claimed: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            aborted,
            state: tokio::sync::Mutex::new(Reassembly {
                expected: 0,
                pending: BTreeMap::new(),
                sink: Some(sink),
            }),
        }
    }

    async fn apply(&self, id: &str, sequence: u64, data: Bytes) {
        let mut state = self.state.lock().await;
        if sequence < state.expected || self.finished.load(Ordering::SeqCst) {
            trace!(transfer = id, sequence, "ignoring duplicate chunk");
            return;
        }
        if sequence != state.expected {
            trace!(transfer = id, sequence, expected = state.expected, "buffering out-of-order chunk");
            state.pending.insert(sequence, data);
            return;
        }

        let mut next = Some(data);
        while let Some(chunk) = next.take() {
            state.expected += 1;
            if chunk.is_empty() {
                // Dropping the sink is the reader's EOF.
                state.sink = None;
                state.pending.clear();
                self.finished.store(true, Ordering::SeqCst);
                trace!(transfer = id, chunks = state.expected, "binary transfer ended");
                break;
            }
            if let Some(sink) = state.sink.as_mut() {
                if let Err(err) = sink.write_all(&chunk).await {
                    trace!(transfer = id, error = %err, "binary consumer went away");
                    state.sink = None;
                }
            }
            let expected = state.expected;
            next = state.pending.remove(&expected);
        }
    }

    fn abort(&self, reason: &str) {
        if self.finished.load(Ordering::SeqCst) {
            return;
        }
        *self.aborted.lock() = Some(reason.to_string());
        // A chunk blocked on a full pipe holds the lock; the sink goes away
        // with it once that task is cancelled.
        if let Ok(mut state) = self.state.try_lock() {
            state.sink = None;
            state.pending.clear();
        }
    }
}

/// Read end that reports an aborted transfer as an error rather than EOF.
struct AbortableReader {
    inner: DuplexStream,
    aborted: Arc<parking_lot::Mutex<Option<String>>>,
}

impl AsyncRead for AbortableReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let before = buf.filled().len();
        match Pin::new(&mut self.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) if buf.filled().len() == before => {
                match self.aborted.lock().as_ref() {
                    Some(reason) => Poll::Ready(Err(std::io::Error::new(
                        std::io::ErrorKind::ConnectionAborted,
                        format!("binary transfer aborted: {reason}"),
                    ))),
                    None => Poll::Ready(Ok(())),
                }
            }
            other => other,
        }
    }
}
