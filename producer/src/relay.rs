use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::sync::{Mutex, MutexGuard};

/// Capacity-one, drop-oldest hand-off between the acquisition thread and the
/// processing thread, backed by a `bounded(1)` channel.
///
/// `push` never blocks: a pending item is drained and replaced. `pop` blocks
/// until an item arrives or the queue is closed. Items pushed between two pops
/// are lost except for the newest.
pub struct RelayQueue<T> {
    tx: Mutex<Option<Sender<T>>>,
    rx: Receiver<T>,
}

/// Outcome of a single `push`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Push {
    Stored,
    /// An unconsumed item was discarded to make room.
    Replaced,
    /// The queue is closed; the item was dropped.
    Closed,
}

impl<T> RelayQueue<T> {
    pub fn new() -> Self {
        let (tx, rx) = bounded(1);
        Self {
            tx: Mutex::new(Some(tx)),
            rx,
        }
    }

    fn sender(&self) -> MutexGuard<'_, Option<Sender<T>>> {
        self.tx.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn push(&self, mut item: T) -> Push {
        let guard = self.sender();
        let Some(tx) = guard.as_ref() else {
            return Push::Closed;
        };
        let mut outcome = Push::Stored;
        loop {
            match tx.try_send(item) {
                Ok(()) => return outcome,
                Err(TrySendError::Full(back)) => {
                    // The consumer may have taken it in between; then the retry just stores.
                    if self.rx.try_recv().is_ok() {
                        outcome = Push::Replaced;
                    }
                    item = back;
                }
                Err(TrySendError::Disconnected(_)) => return Push::Closed,
            }
        }
    }

    /// Block until an item is available. Returns `None` once the queue is
    /// closed and drained.
    pub fn pop(&self) -> Option<T> {
        self.rx.recv().ok()
    }

    pub fn try_pop(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Drop the sending side: blocked consumers wake, later pushes are refused.
    pub fn close(&self) {
        self.sender().take();
    }

    pub fn is_closed(&self) -> bool {
        self.sender().is_none()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl<T> Default for RelayQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
