//! Message envelopes
//!
//! TigerStyle: One envelope per request or response, immutable routing
//! fields, a response slot that transitions pending -> set exactly once.
//!
//! A message carries its request payload to the target mailbox and, for
//! response-bearing sends, travels back to the source mailbox as the
//! response once the slot is set. The envelope also snapshots the
//! exception-handler context active at send time so that errors raised
//! later in the chain propagate through the handlers of the original call
//! path rather than those of the actor that happens to be running.

use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use selkie_core::{Error, Result};

use crate::mailbox::Mailbox;

/// An opaque response value
pub type Response = Box<dyn Any + Send>;

/// Callback invoked on the source mailbox's thread when a response arrives
///
/// Errors returned here are routed through the exception-handler chain of
/// the originating send, never back to the callback itself.
pub type ResponseCallback = Box<dyn FnOnce(Response) -> Result<()> + Send>;

/// A dynamically-scoped exception handler
///
/// Given an error raised during request processing, the handler either
/// synthesizes a response value (`Ok`), completing the current message
/// normally, or rethrows (`Err`), passing the error to the next handler in
/// the ancestor chain.
pub type ExceptionHandler = Arc<dyn Fn(Error) -> Result<Response> + Send + Sync>;

pub(crate) type RequestFn = Box<dyn FnOnce(Reply) -> Result<()> + Send>;

/// A unit of work delivered to a mailbox
///
/// The closure runs on the target mailbox's thread with exclusive access to
/// whatever state it captured. It may complete the [`Reply`] before
/// returning, or stash it and complete it from a later processing step.
pub struct Request(pub(crate) RequestFn);

impl Request {
    /// Create a request that controls when its reply is delivered
    pub fn new(f: impl FnOnce(Reply) -> Result<()> + Send + 'static) -> Self {
        Self(Box::new(f))
    }

    /// Create a request that replies with the closure's return value
    pub fn sync<T, F>(f: F) -> Self
    where
        T: Any + Send,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        Self::new(move |reply| {
            let value = f()?;
            reply.respond(value);
            Ok(())
        })
    }
}

/// Where a response value ends up
pub(crate) enum ResponseSink {
    /// Routed back to the source mailbox and handed to the callback there
    Callback(ResponseCallback),
    /// Fire-and-forget: values are dropped, errors are logged
    Discard,
    /// One-shot latch releasing a blocked external caller
    Latch(crossbeam_channel::Sender<Result<Response>>),
}

static NEXT_MESSAGE_ID: AtomicU64 = AtomicU64::new(1);

/// Envelope for one request or one response
///
/// Routing fields are set at construction and never change. The mutable
/// parts (`request`, `sink`, `response`) are each taken exactly once, by the
/// thread that owns the mailbox processing the message at that point in its
/// lifecycle.
pub(crate) struct Message {
    pub(crate) id: u64,
    /// True when the message crosses a runtime boundary; foreign pending
    /// messages are registered for drain-on-close accounting.
    pub(crate) foreign: bool,
    /// Source mailbox the response routes back to, if any
    pub(crate) source: Option<Arc<Mailbox>>,
    /// The message that was being processed when this one was created
    pub(crate) parent: Option<Arc<Message>>,
    /// Exception handler active at send time
    pub(crate) handler: Option<ExceptionHandler>,
    pub(crate) request: Mutex<Option<RequestFn>>,
    pub(crate) sink: Mutex<Option<ResponseSink>>,
    pub(crate) pending: AtomicBool,
    pub(crate) response: Mutex<Option<Result<Response>>>,
}

impl Message {
    pub(crate) fn new(
        foreign: bool,
        source: Option<Arc<Mailbox>>,
        parent: Option<Arc<Message>>,
        handler: Option<ExceptionHandler>,
        request: RequestFn,
        sink: ResponseSink,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_MESSAGE_ID.fetch_add(1, Ordering::SeqCst),
            foreign,
            source,
            parent,
            handler,
            request: Mutex::new(Some(request)),
            sink: Mutex::new(Some(sink)),
            pending: AtomicBool::new(true),
            response: Mutex::new(None),
        })
    }

    /// True while no response has been set
    pub(crate) fn is_pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }

    /// Transition pending -> set; false when a response was already set
    ///
    /// The caller that wins this transition is the one that delivers the
    /// response; everyone else backs off, which is what makes a second
    /// delivery a no-op rather than an error.
    pub(crate) fn clear_pending(&self) -> bool {
        self.pending
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub(crate) fn take_request(&self) -> Option<RequestFn> {
        self.request.lock().unwrap().take()
    }

    pub(crate) fn take_sink(&self) -> Option<ResponseSink> {
        self.sink.lock().unwrap().take()
    }

    pub(crate) fn take_response(&self) -> Option<Result<Response>> {
        self.response.lock().unwrap().take()
    }

    pub(crate) fn store_response(&self, result: Result<Response>) {
        let mut slot = self.response.lock().unwrap();
        debug_assert!(slot.is_none(), "response slot set twice");
        *slot = Some(result);
    }

    /// True when the sink routes back through the source mailbox
    pub(crate) fn sink_is_callback(&self) -> bool {
        matches!(&*self.sink.lock().unwrap(), Some(ResponseSink::Callback(_)))
    }
}

/// One-shot completion handle for an in-flight request
///
/// Handed to the request closure on dispatch. Completing it delivers the
/// response to wherever the message's sink points; completing a message
/// twice is a no-op. A `Reply` may outlive the request closure that received
/// it: stash it in actor state and complete it from a later message.
pub struct Reply {
    message: Arc<Message>,
    processing: Arc<Mailbox>,
}

impl Reply {
    pub(crate) fn new(message: Arc<Message>, processing: Arc<Mailbox>) -> Self {
        Self {
            message,
            processing,
        }
    }

    /// The mailbox processing the request this reply belongs to
    pub fn mailbox(&self) -> &Arc<Mailbox> {
        &self.processing
    }

    /// Complete with a value
    pub fn respond<T: Any + Send>(self, value: T) {
        self.deliver(Ok(Box::new(value)));
    }

    /// Complete with an error
    pub fn fail(self, error: Error) {
        self.deliver(Err(error));
    }

    /// Complete with an already-boxed result
    pub fn deliver(self, result: Result<Response>) {
        self.processing.deliver_response(&self.message, result);
    }
}
