//! Telemetry infrastructure
//!
//! TigerStyle: Explicit telemetry configuration, structured logging only.
//!
//! Sets up the `tracing` subscriber the runtime logs through. Exporters and
//! metrics backends are deliberately out of scope; everything the runtime
//! reports goes through structured `tracing` events.

use crate::error::{Error, Result};

/// Default log level filter
const LOG_LEVEL_DEFAULT: &str = "info";

/// Telemetry configuration
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name recorded on startup
    pub service_name: String,
    /// Log level filter (overridden by RUST_LOG when set)
    pub log_level: String,
    /// Whether to emit log lines to stdout
    pub stdout_enabled: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "selkie".to_string(),
            log_level: LOG_LEVEL_DEFAULT.to_string(),
            stdout_enabled: true,
        }
    }
}

impl TelemetryConfig {
    /// Create a new configuration with the given service name
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    /// Set the log level filter
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Disable stdout logging
    pub fn without_stdout(mut self) -> Self {
        self.stdout_enabled = false;
        self
    }

    /// Create from environment variables
    ///
    /// Reads:
    /// - `SELKIE_SERVICE_NAME`: Service name (default: "selkie")
    /// - `RUST_LOG`: Log level filter (default: "info")
    pub fn from_env() -> Self {
        let service_name =
            std::env::var("SELKIE_SERVICE_NAME").unwrap_or_else(|_| "selkie".to_string());

        let log_level =
            std::env::var("RUST_LOG").unwrap_or_else(|_| LOG_LEVEL_DEFAULT.to_string());

        Self {
            service_name,
            log_level,
            stdout_enabled: true,
        }
    }
}

/// Initialize telemetry
///
/// Installs a `tracing` subscriber with an env filter. Safe to call once per
/// process; a second call reports an error from the subscriber registry.
///
/// # Example
///
/// ```rust,ignore
/// use selkie_core::telemetry::{init_telemetry, TelemetryConfig};
///
/// let config = TelemetryConfig::new("my-service").with_log_level("debug");
/// let _guard = init_telemetry(config)?;
/// ```
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard> {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let fmt_layer = if config.stdout_enabled {
        Some(tracing_subscriber::fmt::layer())
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| Error::Internal {
            message: format!("failed to initialize tracing subscriber: {}", e),
        })?;

    tracing::info!(service = %config.service_name, "Telemetry initialized");

    Ok(TelemetryGuard {})
}

/// Guard returned by [`init_telemetry`]
///
/// Held for the lifetime of the process; nothing to tear down today, the
/// type exists so exporters can be added without changing call sites.
pub struct TelemetryGuard {}
