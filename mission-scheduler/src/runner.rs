//! Runner for the scheduler lifecycle.

use std::sync::Arc;

use mission_common::{Format, init_tracing};
use tokio::task::JoinHandle;

use crate::RunnerArgs;
use crate::config::{RunnerConfig, SchedulerSettings};
use crate::emitter::{Emitter, StreamEmitter};
use crate::error::{Result, SchedulerError};
use crate::isolated::{IsolatedWorkerGroup, WorkerCommand};
use crate::orchestrator::{Orchestrator, SequenceReport, SpawnPolicy, Stage};
use crate::shared::SharedWorkerGroup;

/// Runner that manages the lifecycle of a scheduler binary.
///
/// Handles:
/// - Logging initialization
/// - The shared stdout emitter
/// - Group construction with the configured settings
/// - Stage sequencing, with Ctrl+C advancing to the next stage
///
/// # Example
///
/// ```ignore
/// use mission_scheduler::{MissionRunner, RunnerArgs, RunnerConfig, Stage};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let args = RunnerArgs::default();
///     let config = MyConfig::load_or_default(args.config.as_deref(), "my.json5")?;
///
///     let runner = MissionRunner::new_with_args("my-computer", config, &args)?;
///     let group = runner.shared_group("Threaded").with_task("sensor", cadence, my_source());
///
///     runner.run_sequence(vec![Stage::new(group)]).await?;
///     Ok(())
/// }
/// ```
pub struct MissionRunner<C: RunnerConfig> {
    /// Runner name for logging.
    name: String,
    /// Runner version.
    version: String,
    /// The loaded configuration.
    config: C,
    /// Output format actually in use.
    format: Format,
    /// Emitter shared by every group.
    emitter: Arc<dyn Emitter>,
    /// Stage sequencing and cancellation.
    orchestrator: Orchestrator,
    /// Ctrl+C listener.
    signals: Option<JoinHandle<()>>,
}

impl<C: RunnerConfig> MissionRunner<C> {
    /// Create a new runner.
    pub fn new(name: impl Into<String>, config: C) -> Result<Self> {
        Self::new_with_args(name, config, &RunnerArgs::default())
    }

    /// Create a new runner with CLI overrides for log level and format.
    ///
    /// This will:
    /// 1. Initialize logging based on config (with optional CLI override)
    /// 2. Create the stdout emitter
    /// 3. Start translating Ctrl+C into stage interrupts
    pub fn new_with_args(name: impl Into<String>, config: C, args: &RunnerArgs) -> Result<Self> {
        let name = name.into();
        let version = env!("CARGO_PKG_VERSION").to_string();

        let log_config = config.logging().with_level_override(args.log_level.as_deref());
        init_tracing(&log_config).map_err(|e| SchedulerError::config(e.to_string()))?;

        tracing::info!(runner = %name, version = %version, "Starting mission computer");

        let format = args.format.unwrap_or(config.scheduler().format);
        let emitter: Arc<dyn Emitter> = Arc::new(StreamEmitter::stdout(format));

        let orchestrator =
            Orchestrator::new().with_spawn_policy(SpawnPolicy::from(config.scheduler()));
        let signals = Some(orchestrator.listen_for_ctrl_c());

        Ok(Self {
            name,
            version,
            config,
            format,
            emitter,
            orchestrator,
            signals,
        })
    }

    /// Get the runner name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the runner version.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Get a reference to the configuration.
    pub fn config(&self) -> &C {
        &self.config
    }

    /// Get the output format in use.
    pub fn format(&self) -> Format {
        self.format
    }

    /// Get a clone of the shared emitter.
    pub fn emitter(&self) -> Arc<dyn Emitter> {
        self.emitter.clone()
    }

    /// Get the orchestrator.
    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    fn settings(&self) -> &SchedulerSettings {
        self.config.scheduler()
    }

    /// An empty in-process group using the shared emitter and settings.
    pub fn shared_group(&self, name: impl Into<String>) -> SharedWorkerGroup {
        SharedWorkerGroup::new(name, self.emitter.clone())
            .with_emit_failure_limit(self.settings().emit_failure_limit)
    }

    /// An empty process-per-task group using the shared emitter and settings.
    pub fn isolated_group(
        &self,
        name: impl Into<String>,
        command: WorkerCommand,
    ) -> IsolatedWorkerGroup {
        IsolatedWorkerGroup::new(name, command, self.emitter.clone())
            .with_emit_failure_limit(self.settings().emit_failure_limit)
            .with_grace_period(self.settings().grace_period())
    }

    /// A stage using the configured stage duration.
    pub fn stage(&self, group: impl Into<crate::WorkerGroup>) -> Stage {
        Stage::new(group).with_duration(self.settings().stage_duration())
    }

    /// Run the stages in order, then shut down.
    pub async fn run_sequence(mut self, stages: Vec<Stage>) -> Result<SequenceReport> {
        tracing::info!(
            runner = %self.name,
            stages = stages.len(),
            "Running. Press Ctrl+C to advance to the next stage."
        );

        let result = self.orchestrator.run_sequence(stages).await;
        self.shutdown();

        match &result {
            Ok(report) => tracing::info!(
                runner = %self.name,
                emitted = report.total_emitted(),
                "Goodbye!"
            ),
            Err(e) => tracing::error!(runner = %self.name, error = %e, "Run aborted"),
        }

        result
    }

    fn shutdown(&mut self) {
        self.orchestrator.shutdown();
        if let Some(signals) = self.signals.take() {
            signals.abort();
        }
    }
}
