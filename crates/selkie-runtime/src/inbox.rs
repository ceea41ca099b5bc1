//! Per-mailbox inbox
//!
//! TigerStyle: FIFO ordering, no silent drops, cheap emptiness checks.
//!
//! The inbox combines two admission paths: an owner-local queue used when
//! the enqueueing thread already holds the mailbox, and a concurrent queue
//! for every other producer. A single producer always lands on one path for
//! a given burst, so its own order is preserved; interleaving between
//! concurrent producers is unspecified.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam_queue::SegQueue;

use crate::message::Message;

/// FIFO inbox with a zero-contention owner path and a concurrent path
pub(crate) struct Inbox {
    /// Owner-local queue; only the thread holding the mailbox touches it
    local: Mutex<VecDeque<Arc<Message>>>,
    /// Concurrent admission path for every other producer
    shared: SegQueue<Arc<Message>>,
    /// Total messages across both queues; backs `is_non_empty`
    size: AtomicUsize,
}

impl Inbox {
    pub(crate) fn new(local_capacity: usize) -> Self {
        debug_assert!(local_capacity > 0, "local capacity must be positive");

        Self {
            local: Mutex::new(VecDeque::with_capacity(local_capacity)),
            shared: SegQueue::new(),
            size: AtomicUsize::new(0),
        }
    }

    /// Enqueue one message
    ///
    /// `owner_held` selects the local path; callers may only pass true when
    /// the current thread owns the mailbox this inbox belongs to.
    pub(crate) fn enqueue(&self, message: Arc<Message>, owner_held: bool) {
        if owner_held {
            self.local.lock().unwrap().push_back(message);
        } else {
            self.shared.push(message);
        }
        self.size.fetch_add(1, Ordering::SeqCst);
    }

    /// Enqueue a batch through the concurrent path, preserving batch order
    pub(crate) fn enqueue_batch(&self, batch: VecDeque<Arc<Message>>) {
        let count = batch.len();
        for message in batch {
            self.shared.push(message);
        }
        self.size.fetch_add(count, Ordering::SeqCst);
    }

    /// Remove and return the next message
    ///
    /// The owner-local queue is preferred; otherwise one message is popped
    /// from the concurrent queue.
    pub(crate) fn poll(&self) -> Option<Arc<Message>> {
        if let Some(message) = self.local.lock().unwrap().pop_front() {
            self.size.fetch_sub(1, Ordering::SeqCst);
            return Some(message);
        }

        if let Some(message) = self.shared.pop() {
            self.size.fetch_sub(1, Ordering::SeqCst);
            return Some(message);
        }

        None
    }

    /// Cheap emptiness check usable without holding the processing lock
    pub(crate) fn is_non_empty(&self) -> bool {
        self.size.load(Ordering::SeqCst) > 0
    }
}
