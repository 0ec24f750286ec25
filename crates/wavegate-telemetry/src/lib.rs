//! Logging setup for wavegate.
//!
//! The wavegate library crates only emit `tracing` events. This crate
//! installs a `tracing-subscriber` pipeline for binaries that host a server:
//!
//! - JSON output for production, pretty output for development
//! - level filtering through an `EnvFilter` directive string, overridable
//!   with `RUST_LOG`
//!
//! # Example
//!
//! ```rust,no_run
//! use wavegate_telemetry::{init_logging, LogConfig};
//!
//! init_logging(&LogConfig::development())?;
//! tracing::info!(addr = "127.0.0.1:8080", "listening");
//! # Ok::<(), wavegate_telemetry::TelemetryError>(())
//! ```

#![forbid(unsafe_code)]

pub mod error;
pub mod logging;

pub use error::TelemetryError;
pub use logging::{init_logging, LogConfig, LogFormat};

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;
