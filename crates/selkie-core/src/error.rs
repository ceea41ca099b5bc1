//! Error types for Selkie
//!
//! TigerStyle: Explicit error types with context, using thiserror.

use thiserror::Error;

/// Result type alias for Selkie operations
pub type Result<T> = std::result::Result<T, Error>;

/// Selkie error types
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Messaging Errors
    // =========================================================================
    #[error("source mailbox is idle: sending requires an active processing context")]
    SourceMailboxIdle,

    #[error("cannot set an exception handler on an idle mailbox")]
    HandlerOutsideProcessing,

    #[error("local execution requires ownership of the mailbox")]
    LocalRequiresOwnership,

    #[error("blocking call invoked from a thread that owns mailbox {mailbox_id}")]
    BlockingCallFromMailboxThread { mailbox_id: u64 },

    // =========================================================================
    // Lifecycle Errors
    // =========================================================================
    #[error("service closed")]
    ServiceClosed,

    #[error("mailbox {mailbox_id} is bound to thread {bound_thread}, pumped from thread {pumping_thread}")]
    ThreadBindingViolation {
        mailbox_id: u64,
        bound_thread: u64,
        pumping_thread: u64,
    },

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("invalid configuration: {field}, reason: {reason}")]
    InvalidConfiguration { field: String, reason: String },

    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("internal error: {message}")]
    Internal { message: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create an invalid-configuration error
    pub fn invalid_configuration(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create an application-level error from any displayable value
    ///
    /// Application request logic uses this for errors that should travel
    /// through the exception-handler chain rather than crash the runtime.
    pub fn app(message: impl std::fmt::Display) -> Self {
        Self::Other(anyhow::anyhow!("{}", message))
    }

    /// Check whether this error reports a closed runtime or mailbox
    pub fn is_service_closed(&self) -> bool {
        matches!(self, Self::ServiceClosed)
    }
}
