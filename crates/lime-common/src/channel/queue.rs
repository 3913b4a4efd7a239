//! Bounded inbound queue with drop-oldest overflow
//!
//! Each channel keeps one of these per envelope kind. The reader task
//! pushes, consumers pop; when a queue is full the oldest envelope is
//! dropped with a logged warning so a slow consumer cannot stall the
//! transport. Closing wakes every waiter; remaining items stay poppable
//! until the queue drains.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::warn;

use crate::error::{LimeError, Result};

pub(crate) struct InboundQueue<T> {
    state: Mutex<QueueState<T>>,
    notify: Notify,
    capacity: usize,
    kind: &'static str,
}

struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
}

impl<T> InboundQueue<T> {
    pub(crate) fn new(capacity: usize, kind: &'static str) -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity.min(64)),
                closed: false,
            }),
            notify: Notify::new(),
            capacity: capacity.max(1),
            kind,
        }
    }

    /// Enqueue an item, dropping the oldest one on overflow
    pub(crate) fn push(&self, item: T) {
        {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            if state.items.len() == self.capacity {
                state.items.pop_front();
                warn!(kind = self.kind, "inbound buffer full, dropping oldest envelope");
            }
            state.items.push_back(item);
        }
        self.notify.notify_one();
    }

    /// Dequeue the next item, waiting for one to arrive
    ///
    /// Returns `ChannelClosed` once the queue is closed and drained.
    pub(crate) async fn pop(&self) -> Result<T> {
        loop {
            {
                let mut state = self.state.lock();
                if let Some(item) = state.items.pop_front() {
                    return Ok(item);
                }
                if state.closed {
                    return Err(LimeError::ChannelClosed);
                }
            }
            self.notify.notified().await;
        }
    }

    /// Close the queue, waking every waiter
    pub(crate) fn close(&self) {
        self.state.lock().closed = true;
        self.notify.notify_waiters();
        // A consumer between its emptiness check and `notified().await`
        // still needs a wakeup
        self.notify.notify_one();
    }
}
