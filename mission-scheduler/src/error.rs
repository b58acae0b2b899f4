//! Error types for the sampling scheduler.
//!
//! The taxonomy follows how far a failure is allowed to travel:
//! - [`SourceError`] stays inside the sampling iteration that produced it.
//! - [`EmitError`] stays inside the owning task.
//! - [`SpawnError`] fails one group's `start()` and is handed to the orchestrator.

use thiserror::Error;

/// Result type alias using [`SchedulerError`].
pub type Result<T> = std::result::Result<T, SchedulerError>;

/// A single sampling attempt failed.
#[derive(Error, Debug)]
pub enum SourceError {
    /// The underlying provider could not be queried.
    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    /// The provider answered but the sample could not be built.
    #[error("Sample failed: {0}")]
    Sample(String),
}

impl SourceError {
    /// Create an unavailable-provider error.
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Create a sample-construction error.
    pub fn sample(msg: impl Into<String>) -> Self {
        Self::Sample(msg.into())
    }
}

/// The output sink rejected a record.
#[derive(Error, Debug)]
pub enum EmitError {
    /// The record could not be rendered.
    #[error("Failed to render record: {0}")]
    Render(#[from] mission_common::Error),

    /// The sink write failed (closed stream, broken pipe).
    #[error("Sink write failed: {0}")]
    Write(#[from] std::io::Error),

    /// A writer panicked while holding the sink.
    #[error("Sink lock poisoned")]
    Poisoned,
}

/// A worker group could not start one of its tasks.
#[derive(Error, Debug)]
pub enum SpawnError {
    /// The group was cancelled and cannot be restarted.
    #[error("Group '{group}' was cancelled and cannot be restarted")]
    Cancelled { group: String },

    /// The isolated worker process could not be created.
    #[error("Failed to spawn worker '{identity}': {source}")]
    Process {
        identity: String,
        #[source]
        source: std::io::Error,
    },

    /// The worker process was created without the expected pipes.
    #[error("Worker '{identity}' has no {pipe} pipe")]
    Pipe {
        identity: String,
        pipe: &'static str,
    },
}

/// Errors surfaced by the scheduler outside the per-sample path.
#[derive(Error, Debug)]
pub enum SchedulerError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file not found.
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Configuration parse error.
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(String),

    /// Configuration validation error.
    #[error("Configuration validation failed: {0}")]
    ConfigValidation(String),

    /// A group failed to start and the sequence was aborted.
    #[error("Spawn error: {0}")]
    Spawn(#[from] SpawnError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SchedulerError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a configuration validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ConfigValidation(msg.into())
    }
}

impl From<mission_common::Error> for SchedulerError {
    fn from(err: mission_common::Error) -> Self {
        match err {
            mission_common::Error::Io(e) => Self::Io(e),
            mission_common::Error::Config(msg) => Self::ConfigParse(msg),
            other => Self::Config(other.to_string()),
        }
    }
}
