//! Unbounded thread-safe FIFO linking pipeline stages.
//!
//! The lock covers a single enqueue or dequeue step only; callers never hold
//! it across decode work. Items that are discarded in bulk are dropped after
//! the lock has been released.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

struct Inner<T> {
    items: VecDeque<T>,
    enqueued: u64,
    dequeued: u64,
}

/// Lifetime counters of a queue, read under one lock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub enqueued: u64,
    pub dequeued: u64,
    pub len: usize,
}

impl QueueStats {
    /// Every item ever enqueued is either dequeued or still queued.
    pub const fn is_balanced(&self) -> bool {
        self.enqueued == self.dequeued + self.len as u64
    }
}

/// Unbounded FIFO with an optional waiter signalled on enqueue.
pub struct Queue<T> {
    inner: Mutex<Inner<T>>,
    available: Condvar,
}

/// Thread-safe reference to a queue.
pub type SharedQueue<T> = Arc<Queue<T>>;

impl<T> Queue<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                enqueued: 0,
                dequeued: 0,
            }),
            available: Condvar::new(),
        }
    }

    /// Append an item, taking ownership of it.
    pub fn push(&self, item: T) {
        {
            let mut inner = self.inner.lock();
            inner.items.push_back(item);
            inner.enqueued += 1;
        }
        self.available.notify_one();
    }

    /// Remove the head, if any.
    pub fn pop(&self) -> Option<T> {
        let mut inner = self.inner.lock();
        let item = inner.items.pop_front()?;
        inner.dequeued += 1;
        Some(item)
    }

    /// Remove the head only if `pred` accepts it.
    ///
    /// The head is inspected and removed under one lock, so no other
    /// consumer can slip in between the check and the removal.
    pub fn pop_if(&self, pred: impl FnOnce(&T) -> bool) -> Option<T> {
        let mut inner = self.inner.lock();
        if !pred(inner.items.front()?) {
            return None;
        }
        let item = inner.items.pop_front()?;
        inner.dequeued += 1;
        Some(item)
    }

    /// Look at the head without removing it.
    pub fn peek_map<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.inner.lock().items.front().map(f)
    }

    /// Wait up to `timeout` for an item.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let mut inner = self.inner.lock();
        if inner.items.is_empty() {
            let _ = self.available.wait_for(&mut inner, timeout);
        }
        let item = inner.items.pop_front()?;
        inner.dequeued += 1;
        Some(item)
    }

    /// Remove every queued item and hand them to the caller.
    pub fn drain(&self) -> Vec<T> {
        let mut inner = self.inner.lock();
        let items: Vec<T> = inner.items.drain(..).collect();
        inner.dequeued += items.len() as u64;
        items
    }

    /// Discard every queued item, returning how many were dropped.
    pub fn clear(&self) -> usize {
        let items = self.drain();
        let count = items.len();
        drop(items);
        count
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }

    pub fn stats(&self) -> QueueStats {
        let inner = self.inner.lock();
        QueueStats {
            enqueued: inner.enqueued,
            dequeued: inner.dequeued,
            len: inner.items.len(),
        }
    }
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a new shared queue.
pub fn shared_queue<T>() -> SharedQueue<T> {
    Arc::new(Queue::new())
}
