//! Subscriber installation.
//!
//! [`init_logging`] installs one global `tracing-subscriber` registry: an
//! `EnvFilter` built from [`LogConfig::filter`] in front of a single
//! formatting layer.
//!
//! # Example
//!
//! ```rust,no_run
//! use wavegate_telemetry::logging::{init_logging, LogConfig};
//!
//! init_logging(&LogConfig::production().level_from_env())?;
//! tracing::info!(connection_id = "0190b7c2", "connection accepted");
//! # Ok::<(), wavegate_telemetry::TelemetryError>(())
//! ```

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::error::TelemetryError;
use crate::TelemetryResult;

/// Environment variable read by [`LogConfig::level_from_env`].
pub const LOG_ENV_VAR: &str = "RUST_LOG";

/// How events are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per line.
    Json,
    /// Multi-line human-readable output.
    Pretty,
}

/// What [`init_logging`] installs.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// `EnvFilter` directives, e.g. `"info,wavegate_server=debug"`.
    pub filter: String,
    /// Output format.
    pub format: LogFormat,
    /// Emit an event when a span (such as a connection) opens and closes.
    pub span_events: bool,
    /// Include the source file and line of each event.
    pub source_location: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::production()
    }
}

impl LogConfig {
    /// Pretty output at `debug`, with span events and source locations.
    #[must_use]
    pub fn development() -> Self {
        Self {
            filter: "debug".to_owned(),
            format: LogFormat::Pretty,
            span_events: true,
            source_location: true,
        }
    }

    /// JSON output at `info`.
    #[must_use]
    pub fn production() -> Self {
        Self {
            filter: "info".to_owned(),
            format: LogFormat::Json,
            span_events: false,
            source_location: false,
        }
    }

    /// Takes the filter directives from `RUST_LOG` when it is set and not
    /// blank.
    #[must_use]
    pub fn level_from_env(self) -> Self {
        self.with_filter_override(std::env::var(LOG_ENV_VAR).ok())
    }

    fn with_filter_override(mut self, filter: Option<String>) -> Self {
        if let Some(filter) = filter.filter(|f| !f.trim().is_empty()) {
            self.filter = filter;
        }
        self
    }
}

/// Installs the global subscriber described by `config`.
///
/// # Errors
///
/// Returns [`TelemetryError::InvalidConfig`] if the filter directives do not
/// parse, and [`TelemetryError::LoggingInit`] if a global subscriber is
/// already installed.
pub fn init_logging(config: &LogConfig) -> TelemetryResult<()> {
    let filter = EnvFilter::try_new(&config.filter).map_err(|e| {
        TelemetryError::InvalidConfig(format!("invalid log filter {:?}: {e}", config.filter))
    })?;

    let span_events = if config.span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };
    let fmt = tracing_subscriber::fmt::layer()
        .with_span_events(span_events)
        .with_file(config.source_location)
        .with_line_number(config.source_location);
    let fmt = match config.format {
        LogFormat::Json => fmt.json().boxed(),
        LogFormat::Pretty => fmt.pretty().boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt)
        .try_init()
        .map_err(|e| TelemetryError::LoggingInit(e.to_string()))
}
