//! Outbound write queue.
//!
//! Frames that could not be flushed in one non-blocking write wait here
//! until the event loop reports the socket writable again. Completion
//! callbacks ride with their frame and fire in send order.

use std::collections::VecDeque;

use crate::connection::SendCallback;

/// One queued frame (or raw buffer) with its completion state.
pub(crate) struct QueuedWrite<T> {
    /// Formatted wire bytes.
    pub bytes: Vec<u8>,
    /// Bytes already accepted by the transport.
    pub offset: usize,
    /// Completion callback, fired once when the write finishes or cancels.
    pub callback: Option<SendCallback<T>>,
    /// Half-close the transport after this write completes. Set on the
    /// outbound CLOSE frame.
    pub shutdown_after: bool,
}

/// FIFO of pending writes.
pub(crate) struct WriteQueue<T> {
    entries: VecDeque<QueuedWrite<T>>,
}

impl<T> WriteQueue<T> {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push(&mut self, entry: QueuedWrite<T>) {
        self.entries.push_back(entry);
    }

    pub fn front_mut(&mut self) -> Option<&mut QueuedWrite<T>> {
        self.entries.front_mut()
    }

    pub fn pop_front(&mut self) -> Option<QueuedWrite<T>> {
        self.entries.pop_front()
    }

    /// Drain all entries in FIFO order for cancellation.
    pub fn drain(&mut self) -> impl Iterator<Item = QueuedWrite<T>> + '_ {
        self.entries.drain(..)
    }
}

impl<T> Default for WriteQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
