//! Runtime coordinator
//!
//! TigerStyle: Single entry point, explicit configuration, clean shutdown.
//!
//! A `Runtime` owns one scheduler pool and every mailbox created through
//! it. Messages that cross from one runtime into another ("foreign"
//! messages) are tracked while a response is outstanding so that closing
//! the runtime fails each of them with `ServiceClosed` instead of leaving
//! the other side hanging.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, info};

use selkie_core::{Error, Result, SelkieConfig};

use crate::mailbox::{complete_message, IdleHook, Mailbox, MailboxKind};
use crate::message::Message;
use crate::scheduler::Scheduler;

static NEXT_RUNTIME_ID: AtomicU64 = AtomicU64::new(1);

/// Options applied to a newly created mailbox
#[derive(Default)]
pub struct MailboxOptions {
    on_idle: Option<IdleHook>,
}

impl MailboxOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run a hook whenever the mailbox's inbox drains
    ///
    /// Outbound buffers are flushed before and after the hook runs.
    pub fn with_on_idle(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_idle = Some(Box::new(hook));
        self
    }
}

/// The runtime: scheduler pool plus mailbox factory
pub struct Runtime {
    id: u64,
    config: SelkieConfig,
    scheduler: Scheduler,
    closing: AtomicBool,
    /// Every mailbox created by this runtime, closed with it
    mailboxes: Mutex<Vec<Weak<Mailbox>>>,
    /// Foreign messages with an outstanding response, failed at close
    pending_foreign: Mutex<HashMap<u64, Arc<Message>>>,
}

impl Runtime {
    /// Create a runtime with the given configuration
    pub fn new(config: SelkieConfig) -> Result<Arc<Self>> {
        config.validate()?;

        let scheduler = Scheduler::start(&config.scheduler)?;
        let id = NEXT_RUNTIME_ID.fetch_add(1, Ordering::SeqCst);

        info!(
            runtime = id,
            workers = config.scheduler.worker_threads_count,
            "Runtime started"
        );

        Ok(Arc::new(Self {
            id,
            config,
            scheduler,
            closing: AtomicBool::new(false),
            mailboxes: Mutex::new(Vec::new()),
            pending_foreign: Mutex::new(HashMap::new()),
        }))
    }

    /// Create a runtime with default configuration
    pub fn with_defaults() -> Result<Arc<Self>> {
        Self::new(SelkieConfig::default())
    }

    /// Runtime identity; messages between runtimes with different ids are
    /// foreign
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// The configuration this runtime was started with
    pub fn config(&self) -> &SelkieConfig {
        &self.config
    }

    /// True once close has begun
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    // =========================================================================
    // Mailbox factory
    // =========================================================================

    /// Create a pool-scheduled mailbox that never migrates its thread
    pub fn create_mailbox(self: &Arc<Self>) -> Result<Arc<Mailbox>> {
        self.create(MailboxKind::Queued, MailboxOptions::default())
    }

    /// Create a pool-scheduled mailbox with options
    pub fn create_mailbox_with(self: &Arc<Self>, options: MailboxOptions) -> Result<Arc<Mailbox>> {
        self.create(MailboxKind::Queued, options)
    }

    /// Create a migration-capable reactor
    pub fn create_reactor(self: &Arc<Self>) -> Result<Arc<Mailbox>> {
        self.create(MailboxKind::Reactor, MailboxOptions::default())
    }

    /// Create a migration-capable reactor with options
    pub fn create_reactor_with(self: &Arc<Self>, options: MailboxOptions) -> Result<Arc<Mailbox>> {
        self.create(MailboxKind::Reactor, options)
    }

    /// Create a mailbox pumped by one external thread
    ///
    /// `wakeup` is invoked on every admission; it should prompt the bound
    /// thread (a UI or I/O loop) to call [`Mailbox::pump`].
    pub fn create_thread_bound_mailbox(
        self: &Arc<Self>,
        wakeup: impl Fn() + Send + Sync + 'static,
    ) -> Result<Arc<Mailbox>> {
        self.create(
            MailboxKind::ThreadBound {
                wakeup: Box::new(wakeup),
                bound_thread: AtomicU64::new(0),
            },
            MailboxOptions::default(),
        )
    }

    fn create(self: &Arc<Self>, kind: MailboxKind, options: MailboxOptions) -> Result<Arc<Mailbox>> {
        if self.is_closing() {
            return Err(Error::ServiceClosed);
        }

        let mailbox = Mailbox::new(self.clone(), kind, options.on_idle, &self.config.mailbox);
        self.mailboxes.lock().unwrap().push(Arc::downgrade(&mailbox));
        debug!(runtime = self.id, mailbox = mailbox.id(), "Mailbox created");
        Ok(mailbox)
    }

    // =========================================================================
    // Foreign pending accounting
    // =========================================================================

    /// Track a foreign message until its response is delivered
    ///
    /// Returns false when the runtime is already closing: the message has
    /// been failed with `ServiceClosed` and must not be dispatched.
    pub(crate) fn register_pending(&self, message: Arc<Message>) -> bool {
        if self.is_closing() {
            complete_message(&message, Err(Error::ServiceClosed));
            return false;
        }
        self.pending_foreign.lock().unwrap().insert(message.id, message);
        true
    }

    pub(crate) fn deregister_pending(&self, message_id: u64) {
        self.pending_foreign.lock().unwrap().remove(&message_id);
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    /// Close the runtime
    ///
    /// Stops the scheduler (joining every worker except the calling
    /// thread), closes every mailbox, then fails each remaining foreign
    /// pending message with `ServiceClosed`. Idempotent.
    pub fn close(&self) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }

        info!(runtime = self.id, "Closing runtime");

        self.scheduler.close();

        let mailboxes: Vec<Weak<Mailbox>> = self.mailboxes.lock().unwrap().drain(..).collect();
        for weak in mailboxes {
            if let Some(mailbox) = weak.upgrade() {
                mailbox.close();
            }
        }

        let pending: Vec<Arc<Message>> = {
            let mut registry = self.pending_foreign.lock().unwrap();
            registry.drain().map(|(_, message)| message).collect()
        };
        if !pending.is_empty() {
            debug!(
                runtime = self.id,
                count = pending.len(),
                "Failing foreign pending messages at close"
            );
        }
        for message in pending {
            complete_message(&message, Err(Error::ServiceClosed));
        }

        info!(runtime = self.id, "Runtime closed");
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Request, Response};

    fn test_config(workers: usize) -> SelkieConfig {
        let mut config = SelkieConfig::default();
        config.scheduler.worker_threads_count = workers;
        config
    }

    fn downcast_u64(response: Response) -> u64 {
        *response.downcast::<u64>().unwrap()
    }

    #[test]
    fn test_runtime_call_round_trip() {
        let runtime = Runtime::new(test_config(2)).unwrap();
        let mailbox = runtime.create_mailbox().unwrap();

        let response = mailbox.call(Request::sync(|| Ok(21u64 * 2))).unwrap();
        assert_eq!(downcast_u64(response), 42);

        runtime.close();
    }

    #[test]
    fn test_runtime_close_is_idempotent() {
        let runtime = Runtime::new(test_config(2)).unwrap();
        runtime.close();
        runtime.close();
        assert!(runtime.is_closing());
    }

    #[test]
    fn test_create_after_close_fails() {
        let runtime = Runtime::new(test_config(2)).unwrap();
        runtime.close();

        let result = runtime.create_mailbox();
        assert!(matches!(result, Err(Error::ServiceClosed)));
    }

    #[test]
    fn test_signal_is_processed() {
        let runtime = Runtime::new(test_config(2)).unwrap();
        let mailbox = runtime.create_mailbox().unwrap();

        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        mailbox.signal(Request::new(move |reply| {
            done_tx.send(()).unwrap();
            reply.respond(());
            Ok(())
        }));

        done_rx
            .recv_timeout(std::time::Duration::from_secs(5))
            .expect("signal was not processed");
        runtime.close();
    }

    #[test]
    fn test_idle_hook_runs_after_drain() {
        let runtime = Runtime::new(test_config(2)).unwrap();

        let (idle_tx, idle_rx) = crossbeam_channel::unbounded();
        let options = MailboxOptions::new().with_on_idle(move || {
            let _ = idle_tx.send(());
        });
        let mailbox = runtime.create_mailbox_with(options).unwrap();

        mailbox.signal(Request::sync(|| Ok(())));

        idle_rx
            .recv_timeout(std::time::Duration::from_secs(5))
            .expect("idle hook never ran after the inbox drained");

        runtime.close();
    }

    #[test]
    fn test_call_rejected_from_mailbox_thread() {
        let runtime = Runtime::new(test_config(2)).unwrap();
        let outer = runtime.create_mailbox().unwrap();
        let inner = runtime.create_mailbox().unwrap();

        let probe = inner.clone();
        let response = outer
            .call(Request::new(move |reply| {
                // This thread owns `outer` right now; blocking here could
                // deadlock, so the runtime refuses.
                let result = probe.call(Request::sync(|| Ok(0u64)));
                reply.respond(matches!(
                    result,
                    Err(Error::BlockingCallFromMailboxThread { .. })
                ));
                Ok(())
            }))
            .unwrap();

        assert!(*response.downcast::<bool>().unwrap());
        runtime.close();
    }

    #[test]
    fn test_call_into_closed_runtime_fails() {
        let runtime = Runtime::new(test_config(2)).unwrap();
        let mailbox = runtime.create_mailbox().unwrap();
        runtime.close();

        let result = mailbox.call(Request::sync(|| Ok(1u64)));
        assert!(result.unwrap_err().is_service_closed());
    }

    #[test]
    fn test_thread_bound_mailbox_pump() {
        let runtime = Runtime::new(test_config(2)).unwrap();

        let (wake_tx, wake_rx) = crossbeam_channel::unbounded();
        let mailbox = runtime
            .create_thread_bound_mailbox(move || {
                let _ = wake_tx.send(());
            })
            .unwrap();

        let (seen_tx, seen_rx) = crossbeam_channel::bounded(1);
        mailbox.signal(Request::new(move |reply| {
            seen_tx.send(thread_token_for_test()).unwrap();
            reply.respond(());
            Ok(())
        }));

        // The wakeup fired; pump from this thread.
        wake_rx
            .recv_timeout(std::time::Duration::from_secs(5))
            .expect("wakeup did not fire");
        mailbox.pump().unwrap();

        let processed_on = seen_rx
            .recv_timeout(std::time::Duration::from_secs(5))
            .expect("message not processed by pump");
        assert_eq!(processed_on, thread_token_for_test());

        runtime.close();
    }

    #[test]
    fn test_thread_bound_mailbox_rejects_other_threads() {
        let runtime = Runtime::new(test_config(2)).unwrap();
        let mailbox = runtime.create_thread_bound_mailbox(|| {}).unwrap();

        // Bind to this thread.
        mailbox.pump().unwrap();

        let remote = mailbox.clone();
        let result = std::thread::spawn(move || remote.pump()).join().unwrap();
        assert!(matches!(
            result,
            Err(Error::ThreadBindingViolation { .. })
        ));

        runtime.close();
    }

    fn thread_token_for_test() -> u64 {
        crate::mailbox::thread_token()
    }
}
