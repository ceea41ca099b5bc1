//! Selkie Runtime
//!
//! Mailboxes, worker-pool scheduling, and message plumbing for the Selkie
//! actor runtime.
//!
//! # Overview
//!
//! Actors are plain state reachable only through a [`Mailbox`]. A fixed
//! pool of worker threads drains mailboxes one message at a time, so actor
//! state needs no locking of its own. Sends between mailboxes are buffered
//! per destination and flushed when the sender goes idle; responses travel
//! back as messages and run on the sender's thread; errors propagate along
//! the chain of exception handlers captured at each send.
//!
//! # Example
//!
//! ```
//! use selkie_runtime::{Request, Runtime};
//! use selkie_core::SelkieConfig;
//!
//! let mut config = SelkieConfig::default();
//! config.scheduler.worker_threads_count = 2;
//!
//! let runtime = Runtime::new(config)?;
//! let echo = runtime.create_mailbox()?;
//!
//! let response = echo.call(Request::sync(|| Ok(21u64 * 2)))?;
//! assert_eq!(*response.downcast::<u64>().unwrap(), 42);
//!
//! runtime.close();
//! # Ok::<(), selkie_runtime::Error>(())
//! ```
//!
//! # TigerStyle
//!
//! Explicit ownership (a CAS-acquired owner marker per mailbox), explicit
//! limits, bounded iteration, assertions on the invariants the scheduler
//! depends on.

mod caller;
mod inbox;
pub mod mailbox;
pub mod message;
pub mod runtime;
mod scheduler;

pub use mailbox::{IdleHook, Mailbox};
pub use message::{ExceptionHandler, Reply, Request, Response, ResponseCallback};
pub use runtime::{MailboxOptions, Runtime};

pub use selkie_core::{Error, Result};
