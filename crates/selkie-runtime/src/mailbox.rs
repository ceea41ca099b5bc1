//! Mailboxes
//!
//! TigerStyle: Single-threaded-per-mailbox execution, explicit ownership.
//!
//! The mailbox is the serialization unit of the runtime. Ownership is an
//! atomic marker holding the token of the thread currently inside the drain
//! loop, acquired with a compare-and-swap from "absent"; everything else a
//! mailbox owns (outbound batches, the message being processed, the active
//! exception handler) is only touched by that thread.
//!
//! Messages created by a mailbox-owning thread for a different destination
//! are appended to a per-destination batch and delivered when the source
//! goes idle, amortizing cross-mailbox synchronization while preserving
//! per-source FIFO order to each destination.

use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, error, trace, warn};

use selkie_core::config::MailboxConfig;
use selkie_core::{Error, Result};

use crate::caller::Caller;
use crate::inbox::Inbox;
use crate::message::{
    ExceptionHandler, Message, Reply, Request, Response, ResponseCallback, ResponseSink,
};
use crate::runtime::Runtime;

// =============================================================================
// Thread identity
// =============================================================================

static NEXT_THREAD_TOKEN: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Nonzero token identifying this OS thread; 0 always means "absent"
    static THREAD_TOKEN: u64 = NEXT_THREAD_TOKEN.fetch_add(1, Ordering::SeqCst);

    /// Id of the mailbox this thread currently owns, 0 when none
    static OWNED_MAILBOX: std::cell::Cell<u64> = const { std::cell::Cell::new(0) };
}

/// Token identifying the current OS thread
pub(crate) fn thread_token() -> u64 {
    THREAD_TOKEN.with(|token| *token)
}

/// Id of the mailbox the current thread owns, if any
///
/// Backs the `call` self-deadlock check: a thread inside a drain loop must
/// never block on a response that can only be produced by a drain loop.
pub(crate) fn current_thread_owned_mailbox() -> Option<u64> {
    let id = OWNED_MAILBOX.with(|cell| cell.get());
    if id == 0 {
        None
    } else {
        Some(id)
    }
}

// =============================================================================
// Mailbox
// =============================================================================

static NEXT_MAILBOX_ID: AtomicU64 = AtomicU64::new(1);

/// Hook run when a mailbox's inbox drains
pub type IdleHook = Box<dyn Fn() + Send + Sync>;

/// Scheduling flavor of a mailbox
pub(crate) enum MailboxKind {
    /// Pool-scheduled, never migrates the running thread
    Queued,
    /// Pool-scheduled and migration-capable
    Reactor,
    /// Pumped by one external thread; the wakeup runs on every admission
    ThreadBound {
        wakeup: Box<dyn Fn() + Send + Sync>,
        /// Token of the pumping thread, bound on first pump
        bound_thread: AtomicU64,
    },
}

/// Per-destination outbound batch, appended to in send order
pub(crate) struct OutboundBatch {
    target: Arc<Mailbox>,
    messages: VecDeque<Arc<Message>>,
}

/// State only ever touched by the thread that owns the mailbox
///
/// The mutex is uncontended by construction; the owner marker is the real
/// serialization primitive.
pub(crate) struct DrainState {
    /// Outbound batches keyed by destination mailbox id
    send_buffer: HashMap<u64, OutboundBatch>,
    /// The request message currently being processed
    current_message: Option<Arc<Message>>,
    /// Exception handler installed for the current processing step
    exception_handler: Option<ExceptionHandler>,
    closed: bool,
}

/// Result of one run of the drain loop
pub(crate) enum DrainOutcome {
    /// Inbox drained and buffers flushed; release ownership
    Done,
    /// Continue draining the given reactor on this thread, without
    /// returning to the scheduler or consuming a wakeup token
    MigrateTo(Arc<Mailbox>),
}

/// The serialization unit: a FIFO of requests and responses processed by at
/// most one thread at a time
pub struct Mailbox {
    id: u64,
    kind: MailboxKind,
    runtime: Arc<Runtime>,
    inbox: Inbox,
    /// Owner marker: 0 when absent, otherwise the owning thread's token.
    /// Non-zero if and only if some thread is inside the drain loop.
    owner: AtomicU64,
    state: Mutex<DrainState>,
    on_idle: Option<IdleHook>,
    send_batch_capacity: usize,
}

impl Mailbox {
    pub(crate) fn new(
        runtime: Arc<Runtime>,
        kind: MailboxKind,
        on_idle: Option<IdleHook>,
        config: &MailboxConfig,
    ) -> Arc<Self> {
        debug_assert!(config.local_queue_capacity_initial > 0);
        debug_assert!(config.send_batch_capacity_initial > 0);

        Arc::new(Self {
            id: NEXT_MAILBOX_ID.fetch_add(1, Ordering::SeqCst),
            kind,
            runtime,
            inbox: Inbox::new(config.local_queue_capacity_initial),
            owner: AtomicU64::new(0),
            state: Mutex::new(DrainState {
                send_buffer: HashMap::new(),
                current_message: None,
                exception_handler: None,
                closed: false,
            }),
            on_idle,
            send_batch_capacity: config.send_batch_capacity_initial,
        })
    }

    /// Unique id of this mailbox within the process
    pub fn id(&self) -> u64 {
        self.id
    }

    /// True while a thread is inside this mailbox's drain loop
    ///
    /// Thread-bound mailboxes always report true: their processing context
    /// is the bound thread, whether or not it is pumping right now.
    pub fn is_running(&self) -> bool {
        match self.kind {
            MailboxKind::ThreadBound { .. } => true,
            _ => self.owner.load(Ordering::SeqCst) != 0,
        }
    }

    /// True when the inbox has no queued messages
    pub fn is_empty(&self) -> bool {
        !self.inbox.is_non_empty()
    }

    pub(crate) fn has_work(&self) -> bool {
        self.inbox.is_non_empty()
    }

    pub(crate) fn has_idle_hook(&self) -> bool {
        self.on_idle.is_some()
    }

    /// True when migration may continue into this mailbox
    pub(crate) fn accepts_migration(&self) -> bool {
        matches!(self.kind, MailboxKind::Reactor)
    }

    fn may_migrate_from(&self) -> bool {
        matches!(self.kind, MailboxKind::Reactor)
    }

    pub(crate) fn owned_by_current_thread(&self) -> bool {
        self.owner.load(Ordering::SeqCst) == thread_token()
    }

    // =========================================================================
    // Ownership
    // =========================================================================

    /// Attempt to acquire ownership for the current thread
    pub(crate) fn try_claim(&self) -> bool {
        let token = thread_token();
        debug_assert!(token != 0, "thread tokens are nonzero");

        if self
            .owner
            .compare_exchange(0, token, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            OWNED_MAILBOX.with(|cell| cell.set(self.id));
            true
        } else {
            false
        }
    }

    /// Release ownership held by the current thread
    ///
    /// Fatal if the current thread does not hold the marker: that is a
    /// scheduler logic defect, not a recoverable condition.
    pub(crate) fn release(&self) {
        let token = thread_token();
        let previous = self.owner.swap(0, Ordering::SeqCst);
        assert_eq!(
            previous, token,
            "mailbox {} released by thread that does not own it",
            self.id
        );
        OWNED_MAILBOX.with(|cell| cell.set(0));
    }

    // =========================================================================
    // Sending
    // =========================================================================

    /// Fire-and-forget with no source attribution
    ///
    /// Always takes the non-buffered path: with no return address there is
    /// no processing context to buffer against.
    pub fn signal(self: &Arc<Self>, request: Request) {
        let message = Message::new(false, None, None, None, request.0, ResponseSink::Discard);
        self.add_message(None, message, false);
    }

    /// Fire-and-forget attributed to a source mailbox
    ///
    /// Eligible for outbound buffering and the owner-local fast path.
    /// Errors if the source is not currently processing.
    pub fn signal_from(self: &Arc<Self>, source: &Arc<Mailbox>, request: Request) -> Result<()> {
        if !source.is_running() {
            return Err(Error::SourceMailboxIdle);
        }

        let (parent, handler) = source.capture_send_context();
        let message = Message::new(
            false,
            Some(source.clone()),
            parent,
            handler,
            request.0,
            ResponseSink::Discard,
        );
        let local = self.owned_by_current_thread();
        self.add_message(Some(source), message, local);
        Ok(())
    }

    /// The general asynchronous call
    ///
    /// `on_response` runs later on the source mailbox's thread, in the
    /// exception-handler context that was active at this send.
    pub fn send(
        self: &Arc<Self>,
        source: &Arc<Mailbox>,
        request: Request,
        on_response: ResponseCallback,
    ) -> Result<()> {
        if !source.is_running() {
            return Err(Error::SourceMailboxIdle);
        }

        let foreign = !Arc::ptr_eq(self, source) && self.runtime.id() != source.runtime.id();
        let (parent, handler) = source.capture_send_context();
        let message = Message::new(
            foreign,
            Some(source.clone()),
            parent,
            handler,
            request.0,
            ResponseSink::Callback(on_response),
        );
        let local = self.owned_by_current_thread();
        self.add_message(Some(source), message, local);
        Ok(())
    }

    /// Block the calling external thread until a response or error arrives
    ///
    /// Rejected when invoked from a thread that owns a mailbox: the drain
    /// loop this thread is running may be the only one able to produce the
    /// response, so blocking here would deadlock.
    pub fn call(self: &Arc<Self>, request: Request) -> Result<Response> {
        if let Some(mailbox_id) = current_thread_owned_mailbox() {
            return Err(Error::BlockingCallFromMailboxThread { mailbox_id });
        }

        let caller = Caller::new();
        // Call messages are foreign: they cross from outside any runtime
        // into this one and must be failed, not dropped, at close.
        let message = Message::new(
            true,
            None,
            None,
            None,
            request.0,
            ResponseSink::Latch(caller.sender()),
        );
        self.add_message(None, message, false);
        caller.wait()
    }

    /// Execute request logic synchronously on the calling thread
    ///
    /// Valid only when the caller already owns this mailbox; used for
    /// nested same-thread calls that must see current actor state with no
    /// messaging overhead.
    pub fn local<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        if !self.owned_by_current_thread() {
            return Err(Error::LocalRequiresOwnership);
        }
        f()
    }

    /// Replace the exception handler for the current processing step
    ///
    /// Returns the previous handler so callers can restore it before
    /// returning. Errors if the mailbox is idle.
    pub fn set_exception_handler(
        &self,
        handler: Option<ExceptionHandler>,
    ) -> Result<Option<ExceptionHandler>> {
        if !self.is_running() {
            return Err(Error::HandlerOutsideProcessing);
        }

        let mut state = self.state.lock().unwrap();
        Ok(std::mem::replace(&mut state.exception_handler, handler))
    }

    fn capture_send_context(&self) -> (Option<Arc<Message>>, Option<ExceptionHandler>) {
        let state = self.state.lock().unwrap();
        (
            state.current_message.clone(),
            state.exception_handler.clone(),
        )
    }

    // =========================================================================
    // Admission
    // =========================================================================

    /// Route a new message: owner-local fast path, outbound buffer, or
    /// direct concurrent admission
    fn add_message(self: &Arc<Self>, source: Option<&Arc<Mailbox>>, message: Arc<Message>, local: bool) {
        if let Some(source) = source {
            if !local && source.buffer_outbound(&message, self) {
                return;
            }
        }
        self.add_unbuffered(message, local);
    }

    /// Append a message to this (source) mailbox's batch for `target`
    ///
    /// Returns false when buffering is unavailable (closing or closed) and
    /// the message must be delivered directly.
    fn buffer_outbound(&self, message: &Arc<Message>, target: &Arc<Mailbox>) -> bool {
        if self.runtime.is_closing() {
            return false;
        }

        let mut state = self.state.lock().unwrap();
        if state.closed {
            return false;
        }
        let capacity = self.send_batch_capacity;
        let batch = state
            .send_buffer
            .entry(target.id)
            .or_insert_with(|| OutboundBatch {
                target: target.clone(),
                messages: VecDeque::with_capacity(capacity),
            });
        batch.messages.push_back(message.clone());
        true
    }

    /// Admit one message directly into the inbox
    pub(crate) fn add_unbuffered(self: &Arc<Self>, message: Arc<Message>, local: bool) {
        if self.runtime.is_closing() {
            fail_if_foreign_pending(&message);
            return;
        }

        self.inbox.enqueue(message, local);
        self.after_add();
    }

    /// Admit a whole batch, preserving batch order
    ///
    /// Returns false when the batch was consumed by a closing runtime.
    /// `submit` is false only on the migration path, where the caller is
    /// about to continue draining this mailbox itself.
    pub(crate) fn add_unbuffered_batch(
        self: &Arc<Self>,
        mut batch: VecDeque<Arc<Message>>,
        submit: bool,
    ) -> bool {
        if self.runtime.is_closing() {
            for message in batch.drain(..) {
                fail_if_foreign_pending(&message);
            }
            return false;
        }

        self.inbox.enqueue_batch(batch);
        if submit {
            self.after_add();
        }
        true
    }

    /// Called after admission; makes the mailbox runnable
    fn after_add(self: &Arc<Self>) {
        match &self.kind {
            MailboxKind::ThreadBound { wakeup, .. } => wakeup(),
            _ => {
                // At-least-once readiness: racing producers may both submit,
                // the CAS claim in the worker deduplicates.
                if self.owner.load(Ordering::SeqCst) == 0 {
                    self.runtime.scheduler().execute(self.clone());
                }
            }
        }
    }

    // =========================================================================
    // Drain loop
    // =========================================================================

    /// Process queued messages until the inbox drains
    ///
    /// Caller must own the mailbox. On `MigrateTo` the inbox emptiness
    /// recheck is skipped; the scheduler re-enqueues this mailbox if work
    /// remains.
    pub(crate) fn drain(self: &Arc<Self>) -> DrainOutcome {
        debug_assert!(self.owned_by_current_thread(), "drain without ownership");

        loop {
            match self.inbox.poll() {
                Some(message) => {
                    if message.is_pending() {
                        self.process_request(message);
                    } else {
                        self.process_response(message);
                    }
                }
                None => {
                    let may_migrate = self.may_migrate_from();

                    if let Some(hook) = &self.on_idle {
                        let (_, migrate) = self.flush_buffers(may_migrate);
                        if let Some(target) = migrate {
                            return DrainOutcome::MigrateTo(target);
                        }
                        hook();
                    }

                    let (_, migrate) = self.flush_buffers(may_migrate);
                    if let Some(target) = migrate {
                        return DrainOutcome::MigrateTo(target);
                    }

                    if self.inbox.is_non_empty() {
                        continue;
                    }
                    return DrainOutcome::Done;
                }
            }
        }
    }

    /// Pump a thread-bound mailbox from its bound thread
    ///
    /// The first pump binds the calling thread; pumping from any other
    /// thread afterwards is an error. Reentrant pumps (the wakeup firing
    /// while the bound thread is already draining) are no-ops.
    pub fn pump(self: &Arc<Self>) -> Result<()> {
        let MailboxKind::ThreadBound { bound_thread, .. } = &self.kind else {
            return Err(Error::internal(format!(
                "mailbox {} is pool-scheduled, not thread-bound",
                self.id
            )));
        };

        let token = thread_token();
        match bound_thread.compare_exchange(0, token, Ordering::SeqCst, Ordering::SeqCst) {
            Ok(_) => {}
            Err(bound) if bound == token => {}
            Err(bound) => {
                return Err(Error::ThreadBindingViolation {
                    mailbox_id: self.id,
                    bound_thread: bound,
                    pumping_thread: token,
                });
            }
        }

        let outer = OWNED_MAILBOX.with(|cell| cell.get());
        while self.try_claim() {
            // Thread-bound mailboxes never migrate.
            let _ = self.drain();
            self.release();
            if !self.inbox.is_non_empty() {
                break;
            }
        }
        OWNED_MAILBOX.with(|cell| cell.set(outer));
        Ok(())
    }

    // =========================================================================
    // Flushing
    // =========================================================================

    /// Deliver all buffered outbound batches to their destinations
    ///
    /// Returns whether anything was delivered.
    pub fn flush(self: &Arc<Self>) -> bool {
        self.flush_buffers(false).0
    }

    /// Flush with an optional migration candidate
    ///
    /// When `may_migrate` is set and the last destination is an idle,
    /// migration-capable reactor of the same runtime, it is returned so the
    /// draining thread can continue into it directly; that destination is
    /// then not submitted to the scheduler, keeping the wakeup-token count
    /// balanced.
    fn flush_buffers(self: &Arc<Self>, may_migrate: bool) -> (bool, Option<Arc<Mailbox>>) {
        let batches: Vec<OutboundBatch> = {
            let mut state = self.state.lock().unwrap();
            if state.send_buffer.is_empty() {
                return (false, None);
            }
            state.send_buffer.drain().map(|(_, batch)| batch).collect()
        };

        let last_index = batches.len() - 1;
        let mut migrate = None;

        for (index, batch) in batches.into_iter().enumerate() {
            let target = batch.target;
            let candidate = may_migrate
                && index == last_index
                && target.accepts_migration()
                && target.runtime.id() == self.runtime.id()
                && target.owner.load(Ordering::SeqCst) == 0;

            let delivered = target.add_unbuffered_batch(batch.messages, !candidate);
            if candidate && delivered {
                trace!(from = self.id, to = target.id, "Migration candidate selected");
                migrate = Some(target);
            }
        }

        (true, migrate)
    }

    // =========================================================================
    // Close
    // =========================================================================

    /// Close this mailbox
    ///
    /// Buffered batches for destinations in other runtimes are re-routed to
    /// their true destinations rather than dropped; same-runtime batches are
    /// discarded with the rest of the closing runtime. Every foreign pending
    /// message still queued is failed with `ServiceClosed`. Idempotent.
    pub fn close(self: &Arc<Self>) {
        let batches: Vec<OutboundBatch> = {
            let mut state = self.state.lock().unwrap();
            if state.closed {
                return;
            }
            state.closed = true;
            state.send_buffer.drain().map(|(_, batch)| batch).collect()
        };

        debug!(mailbox = self.id, "Closing mailbox");

        for batch in batches {
            if batch.target.runtime.id() != self.runtime.id() {
                batch.target.add_unbuffered_batch(batch.messages, true);
            }
        }

        let mut drained = 0;
        while let Some(message) = self.inbox.poll() {
            fail_if_foreign_pending(&message);
            drained += 1;
            if drained >= selkie_core::MAILBOX_CLOSE_DRAIN_COUNT_MAX {
                warn!(
                    mailbox = self.id,
                    drained, "Close drain limit reached with producers still racing"
                );
                break;
            }
        }
    }

    // =========================================================================
    // Message processing
    // =========================================================================

    /// Dispatch a request message to its logic
    fn process_request(self: &Arc<Self>, message: Arc<Message>) {
        if message.foreign && !self.runtime.register_pending(message.clone()) {
            // The caller was already told the service closed; running the
            // request body now would still apply its side effects.
            return;
        }

        {
            let mut state = self.state.lock().unwrap();
            state.exception_handler = None;
            state.current_message = Some(message.clone());
        }

        let request = message.take_request();
        debug_assert!(request.is_some(), "request dispatched twice");

        if let Some(request) = request {
            let reply = Reply::new(message.clone(), self.clone());
            if let Err(error) = run_guarded("request", move || request(reply)) {
                self.process_thrown(error);
            }
        }

        let mut state = self.state.lock().unwrap();
        state.current_message = None;
    }

    /// Hand a response message to its sink in the context of the original send
    fn process_response(self: &Arc<Self>, message: Arc<Message>) {
        {
            let mut state = self.state.lock().unwrap();
            state.exception_handler = message.handler.clone();
            state.current_message = message.parent.clone();
        }

        let response = message.take_response();
        match response {
            Some(Ok(value)) => {
                if let Some(ResponseSink::Callback(callback)) = message.take_sink() {
                    if let Err(error) = run_guarded("response callback", move || callback(value)) {
                        self.process_thrown(error);
                    }
                }
            }
            Some(Err(error)) => self.process_thrown(error),
            None => debug_assert!(false, "response message without a response"),
        }

        let mut state = self.state.lock().unwrap();
        state.current_message = None;
    }

    /// Walk the exception-handler chain for an error raised in the current
    /// processing context
    ///
    /// The active handler is tried first, then the handler snapshots along
    /// the current message's ancestor chain. A handler that synthesizes a
    /// value completes the current message normally; a handler that fails
    /// contributes its error as the new one and the walk continues. With no
    /// handler left the error becomes the delivered response, or a log line
    /// for fire-and-forget messages.
    fn process_thrown(self: &Arc<Self>, thrown: Error) {
        let (context, active_handler) = {
            let mut state = self.state.lock().unwrap();
            (
                state.current_message.clone(),
                state.exception_handler.take(),
            )
        };

        let Some(context) = context else {
            error!(error = %thrown, "Error raised outside of any message context");
            return;
        };
        if !context.is_pending() {
            return;
        }

        let mut current = thrown;
        let mut handler = active_handler;
        let mut ancestor = Some(context.clone());

        loop {
            if let Some(h) = handler.take() {
                let attempt = catch_unwind(AssertUnwindSafe(move || (*h)(current)));
                match attempt {
                    Ok(Ok(value)) => {
                        self.deliver_response(&context, Ok(value));
                        return;
                    }
                    Ok(Err(next)) => {
                        debug!(error = %next, "Exception handler rethrew");
                        current = next;
                    }
                    Err(payload) => {
                        let reason = panic_message(payload.as_ref());
                        error!(reason = %reason, "Exception handler panicked");
                        current = Error::internal(format!("exception handler panicked: {}", reason));
                    }
                }
            }

            match ancestor.take() {
                Some(message) => {
                    handler = message.handler.clone();
                    ancestor = message.parent.clone();
                }
                None => break,
            }
        }

        self.deliver_response(&context, Err(current));
    }

    /// Complete a message this mailbox is processing
    ///
    /// Deregisters foreign pending accounting, then routes through the
    /// message's sink. Delivering twice is a no-op.
    pub(crate) fn deliver_response(self: &Arc<Self>, message: &Arc<Message>, result: Result<Response>) {
        if message.foreign {
            self.runtime.deregister_pending(message.id);
        }
        complete_message(message, result);
    }
}

/// Route a result into a message's sink
///
/// The winning pending->set transition decides who delivers; later calls
/// are no-ops.
pub(crate) fn complete_message(message: &Arc<Message>, result: Result<Response>) {
    if !message.clear_pending() {
        return;
    }

    if message.sink_is_callback() {
        // The envelope itself becomes the response message, routed back to
        // the source mailbox; the callback runs there.
        message.store_response(result);
        let Some(source) = message.source.clone() else {
            debug_assert!(false, "callback sink without a source mailbox");
            return;
        };
        let local = source.owned_by_current_thread();
        source.add_unbuffered(message.clone(), local);
        return;
    }

    match message.take_sink() {
        Some(ResponseSink::Latch(sender)) => {
            let _ = sender.send(result);
        }
        Some(ResponseSink::Discard) => {
            if let Err(error) = result {
                warn!(error = %error, "Uncaught error from fire-and-forget request");
            }
        }
        Some(ResponseSink::Callback(_)) | None => {
            debug_assert!(false, "sink consumed while response pending");
        }
    }
}

/// Fail a foreign pending message with `ServiceClosed`; others are dropped
pub(crate) fn fail_if_foreign_pending(message: &Arc<Message>) {
    if message.foreign && message.is_pending() {
        complete_message(message, Err(Error::ServiceClosed));
    }
}

/// Run user code, converting panics into internal errors
fn run_guarded<T>(what: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(Error::internal(format!(
            "{} panicked: {}",
            what,
            panic_message(payload.as_ref())
        ))),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Runtime;
    use selkie_core::SelkieConfig;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn test_runtime(workers: usize) -> Arc<Runtime> {
        let mut config = SelkieConfig::default();
        config.scheduler.worker_threads_count = workers;
        Runtime::new(config).unwrap()
    }

    #[test]
    fn test_send_from_idle_source_fails() {
        let runtime = test_runtime(2);
        let source = runtime.create_mailbox().unwrap();
        let target = runtime.create_mailbox().unwrap();

        let result = target.send(
            &source,
            Request::sync(|| Ok(0u64)),
            Box::new(|_response| Ok(())),
        );
        assert!(matches!(result, Err(Error::SourceMailboxIdle)));

        let result = target.signal_from(&source, Request::sync(|| Ok(0u64)));
        assert!(matches!(result, Err(Error::SourceMailboxIdle)));

        runtime.close();
    }

    #[test]
    fn test_exception_handler_requires_processing_context() {
        let runtime = test_runtime(2);
        let mailbox = runtime.create_mailbox().unwrap();

        let result = mailbox.set_exception_handler(None);
        assert!(matches!(result, Err(Error::HandlerOutsideProcessing)));

        runtime.close();
    }

    #[test]
    fn test_local_requires_ownership() {
        let runtime = test_runtime(2);
        let mailbox = runtime.create_reactor().unwrap();

        let result = mailbox.local(|| Ok(1u64));
        assert!(matches!(result, Err(Error::LocalRequiresOwnership)));

        assert!(mailbox.try_claim());
        assert_eq!(mailbox.local(|| Ok(1u64)).unwrap(), 1);
        mailbox.release();

        runtime.close();
    }

    #[test]
    fn test_second_response_is_noop() {
        let (sender, receiver) = crossbeam_channel::bounded(2);
        let message = Message::new(
            false,
            None,
            None,
            None,
            Box::new(|_reply| Ok(())),
            ResponseSink::Latch(sender),
        );

        complete_message(&message, Ok(Box::new(1u64)));
        complete_message(&message, Ok(Box::new(2u64)));

        let first = receiver.recv().unwrap().unwrap();
        assert_eq!(*first.downcast::<u64>().unwrap(), 1);
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn test_owner_marker_claims_once() {
        let runtime = test_runtime(2);
        let mailbox = runtime.create_mailbox().unwrap();

        assert!(!mailbox.is_running());
        assert!(mailbox.try_claim());
        assert!(mailbox.is_running());
        assert!(mailbox.owned_by_current_thread());
        // A second claim from any thread fails while held.
        assert!(!mailbox.try_claim());
        mailbox.release();
        assert!(!mailbox.is_running());

        runtime.close();
    }

    #[test]
    fn test_buffered_sends_flush_in_order() {
        let runtime = test_runtime(2);
        let source = runtime.create_mailbox().unwrap();
        let target = runtime.create_mailbox().unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);

        assert!(source.try_claim());
        for value in 0..32u64 {
            let seen = seen.clone();
            let done_tx = done_tx.clone();
            target
                .signal_from(
                    &source,
                    Request::new(move |reply| {
                        let mut seen = seen.lock().unwrap();
                        seen.push(value);
                        if seen.len() == 32 {
                            done_tx.send(()).unwrap();
                        }
                        reply.respond(());
                        Ok(())
                    }),
                )
                .unwrap();
        }
        // Nothing delivered while buffered.
        assert!(target.is_empty());

        assert!(source.flush());
        source.release();

        done_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("flushed batch was not processed");
        let seen = seen.lock().unwrap();
        assert_eq!(*seen, (0..32).collect::<Vec<u64>>());

        runtime.close();
    }

    #[test]
    fn test_drain_migrates_into_idle_reactor() {
        let runtime = test_runtime(2);
        let source = runtime.create_reactor().unwrap();
        let target = runtime.create_reactor().unwrap();

        let processed = Arc::new(AtomicUsize::new(0));

        assert!(source.try_claim());
        for _ in 0..4 {
            let processed = processed.clone();
            target
                .signal_from(
                    &source,
                    Request::new(move |reply| {
                        processed.fetch_add(1, Ordering::SeqCst);
                        reply.respond(());
                        Ok(())
                    }),
                )
                .unwrap();
        }

        // The drain goes idle, flushes, and hands this thread the target.
        let outcome = source.drain();
        let DrainOutcome::MigrateTo(migrated) = outcome else {
            panic!("expected migration into the idle target reactor");
        };
        assert_eq!(migrated.id(), target.id());
        assert!(target.has_work());
        assert_eq!(processed.load(Ordering::SeqCst), 0);
        source.release();

        // Continue exactly as the worker would.
        assert!(migrated.try_claim());
        assert!(matches!(migrated.drain(), DrainOutcome::Done));
        migrated.release();
        assert_eq!(processed.load(Ordering::SeqCst), 4);

        runtime.close();
    }

    #[test]
    fn test_queued_mailbox_never_migrates() {
        let runtime = test_runtime(2);
        let source = runtime.create_mailbox().unwrap();
        let target = runtime.create_reactor().unwrap();

        assert!(source.try_claim());
        target
            .signal_from(&source, Request::sync(|| Ok(())))
            .unwrap();

        // A plain queued mailbox flushes without offering its thread.
        assert!(matches!(source.drain(), DrainOutcome::Done));
        source.release();

        runtime.close();
    }

    #[test]
    fn test_close_reroutes_cross_runtime_batches() {
        let local_runtime = test_runtime(2);
        let remote_runtime = test_runtime(2);

        let source = local_runtime.create_mailbox().unwrap();
        let target = remote_runtime.create_mailbox().unwrap();

        let (seen_tx, seen_rx) = crossbeam_channel::bounded(1);

        assert!(source.try_claim());
        target
            .signal_from(
                &source,
                Request::new(move |reply| {
                    seen_tx.send(()).unwrap();
                    reply.respond(());
                    Ok(())
                }),
            )
            .unwrap();

        // Closing the source must hand the buffered batch to its true
        // destination in the other runtime, not drop it.
        source.close();
        source.release();

        seen_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("cross-runtime batch was dropped at close");

        local_runtime.close();
        remote_runtime.close();
    }

    #[test]
    fn test_mailbox_close_is_idempotent() {
        let runtime = test_runtime(2);
        let mailbox = runtime.create_mailbox().unwrap();
        mailbox.close();
        mailbox.close();
        runtime.close();
    }
}
