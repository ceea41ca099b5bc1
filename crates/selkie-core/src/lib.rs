//! Selkie Core
//!
//! Core types, errors, and constants for the Selkie actor runtime.
//!
//! # Overview
//!
//! Selkie is an in-process actor runtime: independent units of state
//! communicate only through messages delivered to per-actor mailboxes,
//! each drained by at most one thread at a time from a shared worker pool.
//!
//! # TigerStyle
//!
//! This crate follows [TigerStyle](https://github.com/tigerbeetle/tigerbeetle/blob/main/docs/TIGER_STYLE.md)
//! engineering principles:
//! - Safety > Performance > Developer Experience
//! - Explicit limits with big-endian naming (e.g., `SCHEDULER_THREADS_COUNT_MAX`)
//! - Bounded iteration, explicit assertions

pub mod config;
pub mod constants;
pub mod error;
pub mod telemetry;

pub use config::{MailboxConfig, SchedulerConfig, SelkieConfig};
pub use constants::*;
pub use error::{Error, Result};
pub use telemetry::{init_telemetry, TelemetryConfig, TelemetryGuard};
