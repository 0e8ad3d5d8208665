//! Bounded ingestion queue between the capture source and detection workers.
//!
//! The capture collaborator enqueues from its own thread and must never
//! block, so `enqueue` fails fast when the buffer is full. Workers park in
//! `dequeue` until a record arrives or the queue is closed.

use crate::config::DropPolicy;
use crate::packet::PacketRecord;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::Notify;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    /// The queue is at capacity and the drop policy rejects new packets.
    #[error("ingestion queue full (capacity {capacity})")]
    Full { capacity: usize },
    /// The queue has been closed; the capture source should stop.
    #[error("ingestion queue closed")]
    Closed,
}

struct QueueInner {
    buf: VecDeque<PacketRecord>,
    closed: bool,
}

/// Bounded MPMC packet buffer with cooperative shutdown.
///
/// Every lost packet, whether rejected at the tail or evicted from the head,
/// increments the shared `dropped` counter so the loss is visible as a
/// metric.
pub struct IngestQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
    capacity: usize,
    policy: DropPolicy,
    dropped: Arc<AtomicU64>,
}

impl IngestQueue {
    pub fn new(capacity: usize, policy: DropPolicy, dropped: Arc<AtomicU64>) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                buf: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            notify: Notify::new(),
            capacity,
            policy,
            dropped,
        }
    }

    /// Enqueue one packet. Never blocks.
    ///
    /// Under `RejectNewest` a full queue returns [`QueueError::Full`] and the
    /// incoming packet is counted as dropped. Under `DropOldest` the head of
    /// the queue is evicted instead and the enqueue succeeds.
    pub fn enqueue(&self, packet: PacketRecord) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        if inner.closed {
            return Err(QueueError::Closed);
        }

        if inner.buf.len() >= self.capacity {
            match self.policy {
                DropPolicy::RejectNewest => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    return Err(QueueError::Full {
                        capacity: self.capacity,
                    });
                }
                DropPolicy::DropOldest => {
                    inner.buf.pop_front();
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        inner.buf.push_back(packet);
        drop(inner);
        self.notify.notify_one();
        Ok(())
    }

    /// Wait for the next packet. Returns `None` once the queue is closed and
    /// fully drained, signalling the worker to exit.
    pub async fn dequeue(&self) -> Option<PacketRecord> {
        loop {
            // Register interest before checking state so a concurrent
            // enqueue/close cannot slip between the check and the await.
            let notified = self.notify.notified();
            {
                let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
                if let Some(packet) = inner.buf.pop_front() {
                    // There may be more buffered packets and more waiters.
                    if !inner.buf.is_empty() {
                        self.notify.notify_one();
                    }
                    return Some(packet);
                }
                if inner.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Close the queue. Blocked dequeuers wake up; already-buffered packets
    /// are still handed out so workers drain before exiting.
    pub fn close(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.closed = true;
        drop(inner);
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .closed
    }

    /// Number of packets currently buffered.
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .buf
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
