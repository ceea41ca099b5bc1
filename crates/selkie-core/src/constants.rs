//! TigerStyle constants for Selkie
//!
//! All limits are explicit, use big-endian naming (most significant first),
//! and include units in the name.

// =============================================================================
// Scheduler Limits
// =============================================================================

/// Default number of worker threads in the scheduler pool
pub const SCHEDULER_THREADS_COUNT_DEFAULT: usize = 20;

/// Maximum number of worker threads in the scheduler pool
pub const SCHEDULER_THREADS_COUNT_MAX: usize = 1024;

/// Default worker thread name prefix
pub const SCHEDULER_THREAD_NAME_PREFIX_DEFAULT: &str = "selkie-worker";

/// Minimum worker thread stack size in bytes (64 KB)
pub const SCHEDULER_THREAD_STACK_SIZE_BYTES_MIN: usize = 64 * 1024;

// =============================================================================
// Mailbox Limits
// =============================================================================

/// Initial capacity of a mailbox's owner-local inbox queue
pub const MAILBOX_LOCAL_QUEUE_CAPACITY_INITIAL: usize = 16;

/// Initial capacity of a per-destination outbound send batch
pub const MAILBOX_SEND_BATCH_CAPACITY_INITIAL: usize = 16;

/// Maximum messages drained from an inbox during close
///
/// Close is bounded iteration: a producer racing with close cannot keep the
/// drain loop alive forever.
pub const MAILBOX_CLOSE_DRAIN_COUNT_MAX: usize = 1_000_000;

// Compile-time assertions for constant validity
const _: () = {
    assert!(SCHEDULER_THREADS_COUNT_DEFAULT >= 1);
    assert!(SCHEDULER_THREADS_COUNT_DEFAULT <= SCHEDULER_THREADS_COUNT_MAX);
    assert!(MAILBOX_LOCAL_QUEUE_CAPACITY_INITIAL > 0);
    assert!(MAILBOX_SEND_BATCH_CAPACITY_INITIAL > 0);
    assert!(MAILBOX_CLOSE_DRAIN_COUNT_MAX >= 1024);
};
