//! FIFO queue of pending job ids shared by the worker pool.
//!
//! Pushes wake one waiting worker; closing wakes everyone so idle workers
//! can exit. The mutex guards queue edits only and is never held across an
//! await point.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::Notify;
use uuid::Uuid;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("pending queue is closed")]
pub struct QueueClosed;

#[derive(Debug, Default)]
struct QueueInner {
    items: VecDeque<Uuid>,
    closed: bool,
}

#[derive(Debug, Default)]
pub struct PendingQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Enqueue a job id at the tail. Fails once the queue is closed for
    /// shutdown.
    pub fn push(&self, id: Uuid) -> Result<(), QueueClosed> {
        {
            let mut inner = self.lock();
            if inner.closed {
                return Err(QueueClosed);
            }
            inner.items.push_back(id);
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Take the oldest id, waiting until one arrives. Returns `None` once
    /// the queue is closed; ids still queued at close are dropped, which
    /// is what shutdown wants.
    pub async fn pop(&self) -> Option<Uuid> {
        loop {
            let notified = self.notify.notified();
            {
                let mut inner = self.lock();
                if inner.closed {
                    return None;
                }
                if let Some(id) = inner.items.pop_front() {
                    return Some(id);
                }
            }
            notified.await;
        }
    }

    /// Drop a queued id. Returns whether it was present.
    pub fn remove(&self, id: Uuid) -> bool {
        let mut inner = self.lock();
        let before = inner.items.len();
        inner.items.retain(|queued| *queued != id);
        inner.items.len() != before
    }

    pub fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }
}
