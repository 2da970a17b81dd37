//! Response correlation table.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::{Result, RpcError};

/// Matches outgoing calls to their responses by message id.
///
/// Every id is handed out once and resolved at most once. Resolving an id
/// nobody waits on is a silent no-op.
pub struct MultiChannel<V> {
    shared: Arc<Shared<V>>,
}

struct Shared<V> {
    next_id: AtomicU64,
    state: Mutex<State<V>>,
}

struct State<V> {
    pending: HashMap<u64, oneshot::Sender<Result<V>>>,
    closed: Option<String>,
}

impl<V> MultiChannel<V> {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                next_id: AtomicU64::new(1),
                state: Mutex::new(State {
                    pending: HashMap::new(),
                    closed: None,
                }),
            }),
        }
    }

    /// Reserve the next id and install a receiver for it.
    ///
    /// After [`close`](Self::close) the receiver resolves immediately with
    /// [`RpcError::Closed`].
    pub fn allocate_receive(&self) -> (u64, PendingReceive<V>) {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.shared.state.lock();
            match &state.closed {
                Some(reason) => {
                    let _ = tx.send(Err(RpcError::closed(reason.clone())));
                }
                None => {
                    state.pending.insert(id, tx);
                }
            }
        }
        let pending = PendingReceive {
            id,
            rx,
            table: Arc::downgrade(&self.shared),
        };
        (id, pending)
    }

    /// Resolve the receiver for `id`. Returns false if nobody was waiting.
    pub fn send(&self, id: u64, value: V) -> bool {
        let tx = self.shared.state.lock().pending.remove(&id);
        match tx {
            Some(tx) => tx.send(Ok(value)).is_ok(),
            None => false,
        }
    }

    /// Fail every pending receiver and refuse new ones. Only the first
    /// reason is kept.
    pub fn close(&self, reason: impl Into<String>) {
        let (reason, drained) = {
            let mut state = self.shared.state.lock();
            let reason = state.closed.get_or_insert_with(|| reason.into()).clone();
            (reason, std::mem::take(&mut state.pending))
        };
        for (_, tx) in drained {
            let _ = tx.send(Err(RpcError::closed(reason.clone())));
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed.is_some()
    }

    pub fn close_reason(&self) -> Option<String> {
        self.shared.state.lock().closed.clone()
    }

    pub fn pending_count(&self) -> usize {
        self.shared.state.lock().pending.len()
    }
}

impl<V> Default for MultiChannel<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Awaitable response slot. Dropping it abandons the call and frees the id.
pub struct PendingReceive<V> {
    id: u64,
    rx: oneshot::Receiver<Result<V>>,
    table: Weak<Shared<V>>,
}

impl<V> PendingReceive<V> {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl<V> Future for PendingReceive<V> {
    type Output = Result<V>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(RpcError::closed("response table dropped"))),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<V> Drop for PendingReceive<V> {
    fn drop(&mut self) {
        if let Some(shared) = self.table.upgrade() {
            shared.state.lock().pending.remove(&self.id);
        }
    }
}
