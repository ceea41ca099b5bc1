//! Worker-pool scheduler
//!
//! TigerStyle: Fixed pool size, explicit shutdown, no busy waiting.
//!
//! The scheduler runs a fixed set of worker threads over a shared ready
//! queue of mailboxes with pending work. Enqueueing a mailbox releases one
//! wakeup token; an idle worker blocks on the queue, claims the popped
//! mailbox with a compare-and-swap, and runs its drain loop. Claiming
//! deduplicates redundant submissions: a mailbox may be enqueued by several
//! racing producers but is only ever drained by one thread.
//!
//! Migration is the one path that bypasses the queue: a drain loop may hand
//! its thread directly to another reactor, which therefore consumes no
//! wakeup token.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{debug, error, trace};

use selkie_core::config::SchedulerConfig;
use selkie_core::{Error, Result};

use crate::mailbox::{DrainOutcome, Mailbox};

/// Ready-queue item; `None` is a shutdown token, one per worker
type WorkItem = Option<Arc<Mailbox>>;

/// State shared between the scheduler handle and its workers
pub(crate) struct SchedulerShared {
    sender: Sender<WorkItem>,
    closing: AtomicBool,
    worker_count: usize,
}

impl SchedulerShared {
    /// Enqueue a mailbox with pending work and release one wakeup token
    pub(crate) fn execute(&self, mailbox: Arc<Mailbox>) {
        if self.closing.load(Ordering::SeqCst) {
            return;
        }
        // The receiving half lives as long as the workers; a send only
        // fails after close, which the flag above already covers.
        let _ = self.sender.send(Some(mailbox));
    }
}

/// Fixed-size worker-thread pool
pub(crate) struct Scheduler {
    shared: Arc<SchedulerShared>,
    /// Kept for the close-time drain of abandoned queue entries
    receiver: Receiver<WorkItem>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    /// Create the pool and start its worker threads
    pub(crate) fn start(config: &SchedulerConfig) -> Result<Self> {
        debug_assert!(config.worker_threads_count > 0);

        let (sender, receiver) = unbounded();
        let shared = Arc::new(SchedulerShared {
            sender,
            closing: AtomicBool::new(false),
            worker_count: config.worker_threads_count,
        });

        let mut workers = Vec::with_capacity(config.worker_threads_count);
        for index in 0..config.worker_threads_count {
            let mut builder =
                thread::Builder::new().name(format!("{}-{}", config.thread_name_prefix, index));
            if let Some(stack_size) = config.thread_stack_size_bytes {
                builder = builder.stack_size(stack_size);
            }

            let receiver: Receiver<WorkItem> = receiver.clone();
            let shared = shared.clone();
            let handle = builder
                .spawn(move || worker_loop(index, receiver, shared))
                .map_err(|e| Error::internal(format!("failed to spawn worker thread: {}", e)))?;
            workers.push(handle);
        }

        debug!(workers = config.worker_threads_count, "Scheduler started");

        Ok(Self {
            shared,
            receiver,
            workers: Mutex::new(workers),
        })
    }

    pub(crate) fn execute(&self, mailbox: Arc<Mailbox>) {
        self.shared.execute(mailbox);
    }

    /// Stop the pool
    ///
    /// Sets the closing flag, releases one shutdown token per worker, and
    /// joins every worker except the calling thread itself (an actor may
    /// close its own runtime from inside a drain loop).
    pub(crate) fn close(&self) {
        if self.shared.closing.swap(true, Ordering::SeqCst) {
            return;
        }

        for _ in 0..self.shared.worker_count {
            let _ = self.shared.sender.send(None);
        }

        let workers: Vec<JoinHandle<()>> = self.workers.lock().unwrap().drain(..).collect();
        let current = thread::current().id();
        for handle in workers {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                error!("Worker thread panicked during shutdown");
            }
        }

        // Drop queue entries the workers never reached so the mailbox
        // references they hold are released. A shutdown token swept up
        // here may still be owed to the worker this close is running on;
        // put those back.
        let mut tokens_swept = 0;
        while let Ok(item) = self.receiver.try_recv() {
            if item.is_none() {
                tokens_swept += 1;
            }
        }
        for _ in 0..tokens_swept {
            let _ = self.shared.sender.send(None);
        }

        debug!("Scheduler stopped");
    }
}

fn worker_loop(index: usize, receiver: Receiver<WorkItem>, shared: Arc<SchedulerShared>) {
    trace!(worker = index, "Worker thread started");

    while let Ok(item) = receiver.recv() {
        let Some(mailbox) = item else {
            break; // shutdown token
        };
        run_mailbox(mailbox, &shared);
    }

    trace!(worker = index, "Worker thread stopped");
}

/// Claim and drain one mailbox, following migrations
fn run_mailbox(mut mailbox: Arc<Mailbox>, shared: &Arc<SchedulerShared>) {
    if !mailbox.try_claim() {
        // Another thread is already draining; its release-time recheck
        // picks up whatever prompted this submission.
        return;
    }

    loop {
        match mailbox.drain() {
            DrainOutcome::Done => {
                // Messages may land between the drain's final emptiness
                // check and the release; a producer that saw the owner
                // marker still held skips its own submission, so the
                // recheck must come after the release or that message is
                // stranded.
                mailbox.release();
                if mailbox.has_work() {
                    shared.execute(mailbox);
                }
                return;
            }
            DrainOutcome::MigrateTo(target) => {
                // Same handoff rule as above: work is rechecked only
                // after the release.
                let idler = mailbox.has_idle_hook();
                mailbox.release();
                if idler || mailbox.has_work() {
                    shared.execute(mailbox.clone());
                }
                trace!(
                    from = mailbox.id(),
                    to = target.id(),
                    "Continuing drain on migrated reactor"
                );
                if target.try_claim() {
                    mailbox = target;
                    continue;
                }
                // Someone else claimed the target first; they will see the
                // migrated batch.
                return;
            }
        }
    }
}
