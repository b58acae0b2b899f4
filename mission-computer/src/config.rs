//! Configuration for the mission computer.

use std::collections::HashSet;
use std::time::Duration;

use mission_common::{Category, LoggingConfig};
use mission_scheduler::{RunnerConfig, SchedulerError, SchedulerSettings};
use serde::{Deserialize, Serialize};

/// Default configuration file, used when present and no `--config` is given.
pub const DEFAULT_CONFIG_PATH: &str = "mission.json5";

/// Complete mission computer configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MissionComputerConfig {
    /// What to sample and under which names.
    #[serde(default)]
    pub mission: MissionConfig,

    /// Scheduler behavior.
    #[serde(default)]
    pub scheduler: SchedulerSettings,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Sampling setup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionConfig {
    /// Identity tag of the in-process computer.
    /// Use "auto" to take the host name.
    #[serde(default = "default_shared_identity")]
    pub shared_identity: String,

    /// Worker processes are tagged `<prefix>-1`, `<prefix>-2`, ...
    #[serde(default = "default_isolated_prefix")]
    pub isolated_prefix: String,

    /// Tasks to run, in order.
    #[serde(default = "default_tasks")]
    pub tasks: Vec<TaskConfig>,

    /// Simulated environment sensor.
    #[serde(default)]
    pub environment: EnvironmentConfig,
}

fn default_shared_identity() -> String {
    "Threaded-Computer".to_string()
}

fn default_isolated_prefix() -> String {
    "Process".to_string()
}

fn default_tasks() -> Vec<TaskConfig> {
    vec![
        TaskConfig::new(Category::Info, 20),
        TaskConfig::new(Category::Load, 20),
        TaskConfig::new(Category::Environment, 5),
    ]
}

impl Default for MissionConfig {
    fn default() -> Self {
        Self {
            shared_identity: default_shared_identity(),
            isolated_prefix: default_isolated_prefix(),
            tasks: default_tasks(),
            environment: EnvironmentConfig::default(),
        }
    }
}

impl MissionConfig {
    /// Identity of the in-process computer, resolving "auto" if needed.
    pub fn shared_identity(&self) -> String {
        if self.shared_identity == "auto" {
            hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(default_shared_identity)
        } else {
            self.shared_identity.clone()
        }
    }

    /// Identity of the n-th worker process (1-based).
    pub fn isolated_identity(&self, n: usize) -> String {
        format!("{}-{}", self.isolated_prefix, n)
    }
}

/// Longest accepted task cadence (one week).
pub const MAX_CADENCE_SECS: u64 = 7 * 24 * 60 * 60;

/// One sampling task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskConfig {
    pub category: Category,
    pub cadence_secs: u64,
}

impl TaskConfig {
    pub fn new(category: Category, cadence_secs: u64) -> Self {
        Self {
            category,
            cadence_secs,
        }
    }

    pub fn cadence(&self) -> Duration {
        Duration::from_secs(self.cadence_secs)
    }
}

/// Fields reported by the simulated environment sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    #[serde(default = "default_fields")]
    pub fields: Vec<FieldRange>,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            fields: default_fields(),
        }
    }
}

/// A simulated reading drawn uniformly from `[min, max]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRange {
    pub name: String,
    pub min: f64,
    pub max: f64,
    /// Decimal places kept after rounding.
    #[serde(default = "default_precision")]
    pub precision: u32,
}

fn default_precision() -> u32 {
    2
}

/// Most decimal places an `f64` reading can meaningfully keep.
pub const MAX_PRECISION: u32 = 15;

impl FieldRange {
    pub fn new(name: impl Into<String>, min: f64, max: f64, precision: u32) -> Self {
        Self {
            name: name.into(),
            min,
            max,
            precision,
        }
    }

    /// Check that readings can be drawn from this range and serialized.
    pub fn check(&self) -> Result<(), String> {
        if !self.min.is_finite() || !self.max.is_finite() {
            return Err(format!(
                "Field '{}' bounds must be finite numbers (min {}, max {})",
                self.name, self.min, self.max
            ));
        }
        if self.min > self.max {
            return Err(format!(
                "Field '{}' has min {} above max {}",
                self.name, self.min, self.max
            ));
        }
        if !(self.max - self.min).is_finite() {
            return Err(format!(
                "Field '{}' spans a range too wide to sample",
                self.name
            ));
        }
        if self.precision > MAX_PRECISION {
            return Err(format!(
                "Field '{}' precision {} exceeds {}",
                self.name, self.precision, MAX_PRECISION
            ));
        }
        Ok(())
    }
}

fn default_fields() -> Vec<FieldRange> {
    vec![
        FieldRange::new("mars_base_internal_temperature", 18.0, 30.0, 2),
        FieldRange::new("mars_base_external_temperature", 0.0, 21.0, 2),
        FieldRange::new("mars_base_internal_humidity", 50.0, 60.0, 2),
        FieldRange::new("mars_base_external_illuminance", 500.0, 715.0, 2),
        FieldRange::new("mars_base_internal_co2", 0.02, 0.1, 3),
        FieldRange::new("mars_base_internal_oxygen", 4.0, 7.0, 2),
    ]
}

impl RunnerConfig for MissionComputerConfig {
    fn logging(&self) -> &LoggingConfig {
        &self.logging
    }

    fn scheduler(&self) -> &SchedulerSettings {
        &self.scheduler
    }

    fn validate(&self) -> mission_scheduler::Result<()> {
        self.scheduler.validate()?;

        let mission = &self.mission;
        if mission.tasks.is_empty() {
            return Err(SchedulerError::validation(
                "At least one task must be configured",
            ));
        }
        for task in &mission.tasks {
            if task.cadence_secs == 0 || task.cadence_secs > MAX_CADENCE_SECS {
                return Err(SchedulerError::validation(format!(
                    "Cadence of the {} task must be between 1 and {} seconds",
                    task.category, MAX_CADENCE_SECS
                )));
            }
        }

        if mission.shared_identity.trim().is_empty() {
            return Err(SchedulerError::validation("shared_identity must not be empty"));
        }
        if mission.isolated_prefix.trim().is_empty() {
            return Err(SchedulerError::validation("isolated_prefix must not be empty"));
        }

        let mut names = HashSet::new();
        for field in &mission.environment.fields {
            field.check().map_err(SchedulerError::validation)?;
            if !names.insert(field.name.as_str()) {
                return Err(SchedulerError::validation(format!(
                    "Field '{}' is defined twice",
                    field.name
                )));
            }
        }

        Ok(())
    }
}
