//! Mission Computer Common Library
//!
//! This crate provides shared types and utilities for the mission computer:
//!
//! - [`telemetry`] - Telemetry data model (`TelemetrySnapshot`, `TelemetryRecord`, `Category`)
//! - [`serialization`] - Output rendering (JSON, pretty JSON, text) and record decoding
//! - [`config`] - Configuration loading (JSON5 format) and logging settings
//! - [`error`] - Error types

pub mod config;
pub mod error;
pub mod serialization;
pub mod telemetry;

// Re-export commonly used types at the crate root
pub use config::{LogFormat, LoggingConfig, load_config, parse_config};
pub use error::{Error, Result};
pub use serialization::{Format, decode_record, format_local_time, render};
pub use telemetry::{
    Category, Metrics, TelemetryRecord, TelemetrySnapshot, TelemetryValue,
    current_timestamp_millis,
};

/// Initialize tracing with the given configuration.
///
/// Logs always go to stderr; stdout is reserved for telemetry output.
///
/// Supports two output formats:
/// - `LogFormat::Text` (default): Human-readable text format
/// - `LogFormat::Json`: Structured JSON format for log aggregation systems
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(std::io::stderr))
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
    }

    Ok(())
}
