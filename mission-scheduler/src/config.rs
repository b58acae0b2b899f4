//! Configuration traits and scheduler settings.

use std::path::Path;
use std::time::Duration;

use mission_common::{Format, LoggingConfig, load_config, parse_config};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SchedulerError};

/// Scheduler behavior shared by every binary built on this crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// Output format for telemetry written to the sink.
    #[serde(default)]
    pub format: Format,

    /// Consecutive emit failures after which a task stops itself (0 = never).
    #[serde(default = "default_emit_failure_limit")]
    pub emit_failure_limit: u32,

    /// Time an isolated worker gets to exit after being asked to stop.
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,

    /// Extra attempts to start a group after a spawn failure.
    #[serde(default)]
    pub spawn_retries: u32,

    /// Abort the whole sequence when a group cannot be started.
    #[serde(default)]
    pub abort_on_spawn_failure: bool,

    /// Run each stage for this long; unset means until interrupted.
    #[serde(default)]
    pub stage_duration_secs: Option<u64>,
}

fn default_emit_failure_limit() -> u32 {
    3
}

fn default_grace_period_ms() -> u64 {
    2000
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            format: Format::default(),
            emit_failure_limit: default_emit_failure_limit(),
            grace_period_ms: default_grace_period_ms(),
            spawn_retries: 0,
            abort_on_spawn_failure: false,
            stage_duration_secs: None,
        }
    }
}

impl SchedulerSettings {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn stage_duration(&self) -> Option<Duration> {
        self.stage_duration_secs.map(Duration::from_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.stage_duration_secs == Some(0) {
            return Err(SchedulerError::validation(
                "scheduler.stage_duration_secs must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Trait for binary configuration types.
///
/// Implement it for the binary's configuration struct to get JSON5 loading,
/// validation, and access to the common sections.
///
/// # Example
///
/// ```ignore
/// use serde::Deserialize;
/// use mission_scheduler::{LoggingConfig, RunnerConfig, SchedulerSettings};
///
/// #[derive(Debug, Default, Deserialize)]
/// pub struct MyConfig {
///     #[serde(default)]
///     pub scheduler: SchedulerSettings,
///     #[serde(default)]
///     pub logging: LoggingConfig,
/// }
///
/// impl RunnerConfig for MyConfig {
///     fn logging(&self) -> &LoggingConfig {
///         &self.logging
///     }
///
///     fn scheduler(&self) -> &SchedulerSettings {
///         &self.scheduler
///     }
/// }
/// ```
pub trait RunnerConfig: Sized + DeserializeOwned {
    /// Get the logging configuration.
    fn logging(&self) -> &LoggingConfig;

    /// Get the scheduler settings.
    fn scheduler(&self) -> &SchedulerSettings;

    /// Validate the configuration.
    ///
    /// Called automatically after loading. Override to add custom validation,
    /// and keep calling the scheduler check.
    fn validate(&self) -> Result<()> {
        self.scheduler().validate()
    }

    /// Load configuration from a file path.
    ///
    /// Supports JSON5 format. Calls [`validate`](Self::validate) after loading.
    fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(SchedulerError::ConfigNotFound {
                path: path.display().to_string(),
            });
        }

        let config: Self = load_config(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a JSON5 string and validate it.
    fn parse(content: &str) -> Result<Self> {
        let config: Self = parse_config(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `explicit` if given (it must exist), else `default_path` if it
    /// exists, else the built-in defaults.
    fn load_or_default(explicit: Option<&Path>, default_path: impl AsRef<Path>) -> Result<Self>
    where
        Self: Default,
    {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        let default_path = default_path.as_ref();
        if default_path.exists() {
            return Self::load(default_path);
        }

        let config = Self::default();
        config.validate()?;
        Ok(config)
    }
}
