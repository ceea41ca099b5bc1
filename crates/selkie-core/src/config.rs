//! Configuration for Selkie
//!
//! TigerStyle: Explicit defaults, validation, reasonable limits.

use crate::constants::*;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Main configuration for Selkie
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelkieConfig {
    /// Scheduler configuration
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Mailbox configuration
    #[serde(default)]
    pub mailbox: MailboxConfig,
}

impl SelkieConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.scheduler.validate()?;
        self.mailbox.validate()?;
        Ok(())
    }
}

/// Scheduler (worker-thread pool) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Number of worker threads in the pool
    #[serde(default = "default_worker_threads")]
    pub worker_threads_count: usize,

    /// Worker thread name prefix
    #[serde(default = "default_thread_name_prefix")]
    pub thread_name_prefix: String,

    /// Worker thread stack size in bytes (platform default if not set)
    #[serde(default)]
    pub thread_stack_size_bytes: Option<usize>,
}

fn default_worker_threads() -> usize {
    SCHEDULER_THREADS_COUNT_DEFAULT
}

fn default_thread_name_prefix() -> String {
    SCHEDULER_THREAD_NAME_PREFIX_DEFAULT.to_string()
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_threads_count: default_worker_threads(),
            thread_name_prefix: default_thread_name_prefix(),
            thread_stack_size_bytes: None,
        }
    }
}

impl SchedulerConfig {
    fn validate(&self) -> Result<()> {
        if self.worker_threads_count == 0 {
            return Err(Error::invalid_configuration(
                "scheduler.worker_threads_count",
                "must be at least 1",
            ));
        }

        if self.worker_threads_count > SCHEDULER_THREADS_COUNT_MAX {
            return Err(Error::invalid_configuration(
                "scheduler.worker_threads_count",
                format!(
                    "{} exceeds limit {}",
                    self.worker_threads_count, SCHEDULER_THREADS_COUNT_MAX
                ),
            ));
        }

        if let Some(stack_size) = self.thread_stack_size_bytes {
            if stack_size < SCHEDULER_THREAD_STACK_SIZE_BYTES_MIN {
                return Err(Error::invalid_configuration(
                    "scheduler.thread_stack_size_bytes",
                    format!(
                        "{} below minimum {}",
                        stack_size, SCHEDULER_THREAD_STACK_SIZE_BYTES_MIN
                    ),
                ));
            }
        }

        if self.thread_name_prefix.is_empty() {
            return Err(Error::invalid_configuration(
                "scheduler.thread_name_prefix",
                "must not be empty",
            ));
        }

        Ok(())
    }
}

/// Mailbox configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailboxConfig {
    /// Initial capacity of the owner-local inbox queue
    #[serde(default = "default_local_queue_capacity")]
    pub local_queue_capacity_initial: usize,

    /// Initial capacity of a per-destination outbound batch
    #[serde(default = "default_send_batch_capacity")]
    pub send_batch_capacity_initial: usize,
}

fn default_local_queue_capacity() -> usize {
    MAILBOX_LOCAL_QUEUE_CAPACITY_INITIAL
}

fn default_send_batch_capacity() -> usize {
    MAILBOX_SEND_BATCH_CAPACITY_INITIAL
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            local_queue_capacity_initial: default_local_queue_capacity(),
            send_batch_capacity_initial: default_send_batch_capacity(),
        }
    }
}

impl MailboxConfig {
    fn validate(&self) -> Result<()> {
        if self.local_queue_capacity_initial == 0 {
            return Err(Error::invalid_configuration(
                "mailbox.local_queue_capacity_initial",
                "must be positive",
            ));
        }

        if self.send_batch_capacity_initial == 0 {
            return Err(Error::invalid_configuration(
                "mailbox.send_batch_capacity_initial",
                "must be positive",
            ));
        }

        Ok(())
    }
}
