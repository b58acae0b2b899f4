//! Decides which worker groups run, in what order, and when they stop.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::SchedulerSettings;
use crate::error::{Result, SpawnError};
use crate::group::{GroupMode, WorkerGroup};
use crate::stats::GroupReport;

/// What to do when a group fails to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpawnPolicy {
    /// Extra start attempts after the first failure.
    pub retries: u32,
    /// Pause between attempts.
    pub retry_delay: Duration,
    /// Abort the whole run instead of moving on to the next stage.
    pub abort_on_failure: bool,
}

impl Default for SpawnPolicy {
    fn default() -> Self {
        Self {
            retries: 0,
            retry_delay: Duration::from_millis(500),
            abort_on_failure: false,
        }
    }
}

impl From<&SchedulerSettings> for SpawnPolicy {
    fn from(settings: &SchedulerSettings) -> Self {
        Self {
            retries: settings.spawn_retries,
            abort_on_failure: settings.abort_on_spawn_failure,
            ..Self::default()
        }
    }
}

/// One step of a sequence: a group and how long to run it.
pub struct Stage {
    group: WorkerGroup,
    run_for: Option<Duration>,
}

impl Stage {
    /// Run `group` until interrupted.
    pub fn new(group: impl Into<WorkerGroup>) -> Self {
        Self {
            group: group.into(),
            run_for: None,
        }
    }

    /// Stop the stage after `duration` unless something stops it sooner.
    pub fn run_for(mut self, duration: Duration) -> Self {
        self.run_for = Some(duration);
        self
    }

    /// Optional form of [`run_for`](Self::run_for).
    pub fn with_duration(mut self, duration: Option<Duration>) -> Self {
        self.run_for = duration;
        self
    }
}

/// Why a stage stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The orchestrator was shut down.
    Shutdown,
    /// Operator interrupt; the sequence moves on.
    Interrupted,
    /// The stage duration elapsed.
    Elapsed,
    /// Every task of the stage ended on its own.
    TasksEnded,
}

/// Result of one stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum StageOutcome {
    Completed { stop: StopReason, report: GroupReport },
    SpawnFailed { error: String },
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageReport {
    pub group: String,
    pub mode: GroupMode,
    pub outcome: StageOutcome,
}

impl StageReport {
    /// The group report, if the stage ran.
    pub fn report(&self) -> Option<&GroupReport> {
        match &self.outcome {
            StageOutcome::Completed { report, .. } => Some(report),
            _ => None,
        }
    }

    /// Why the stage stopped, if it ran.
    pub fn stop(&self) -> Option<StopReason> {
        match &self.outcome {
            StageOutcome::Completed { stop, .. } => Some(*stop),
            _ => None,
        }
    }
}

/// Outcome of every stage, in order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SequenceReport {
    pub stages: Vec<StageReport>,
}

impl SequenceReport {
    /// Find a stage by group name.
    pub fn stage(&self, group: &str) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.group == group)
    }

    /// Records emitted across every stage that ran.
    pub fn total_emitted(&self) -> u64 {
        self.stages
            .iter()
            .filter_map(StageReport::report)
            .map(GroupReport::total_emitted)
            .sum()
    }
}

/// Sends operator interrupts to an [`Orchestrator`].
#[derive(Debug, Clone)]
pub struct InterruptHandle {
    notify: Arc<Notify>,
}

impl InterruptHandle {
    /// Stop the current stage, as Ctrl+C would.
    pub fn interrupt(&self) {
        self.notify.notify_one();
    }
}

/// Top-level owner of worker groups and the cancellation entry point.
///
/// An operator interrupt stops the current stage and the sequence moves on;
/// a second one while the stage is still stopping kills its workers.
/// [`shutdown`](Self::shutdown) stops the current stage and skips the rest.
/// Cancelling one group never touches another: every group owns its token.
#[derive(Debug, Default)]
pub struct Orchestrator {
    shutdown: CancellationToken,
    interrupts: Arc<Notify>,
    policy: SpawnPolicy,
}

impl Orchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_spawn_policy(mut self, policy: SpawnPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn spawn_policy(&self) -> SpawnPolicy {
        self.policy
    }

    /// Token that, once cancelled, ends the run.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// End the run: stop the current stage and skip the remaining ones.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn interrupt_handle(&self) -> InterruptHandle {
        InterruptHandle {
            notify: self.interrupts.clone(),
        }
    }

    /// Translate every Ctrl+C into an interrupt until shutdown.
    pub fn listen_for_ctrl_c(&self) -> JoinHandle<()> {
        let handle = self.interrupt_handle();
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    result = tokio::signal::ctrl_c() => {
                        if let Err(e) = result {
                            error!(error = %e, "Failed to listen for Ctrl+C");
                            break;
                        }
                        info!("Received interrupt signal");
                        handle.interrupt();
                    }
                }
            }
        })
    }

    /// Run the stages one after another.
    ///
    /// Each stage is started, left running until it is stopped, then
    /// cancelled and joined before the next one starts.
    pub async fn run_sequence(&self, stages: Vec<Stage>) -> Result<SequenceReport> {
        let total = stages.len();
        let mut reports = Vec::with_capacity(total);

        for (index, stage) in stages.into_iter().enumerate() {
            let Stage { mut group, run_for } = stage;
            let name = group.name().to_string();
            let mode = group.mode();

            if self.shutdown.is_cancelled() {
                info!(group = %name, "Skipping stage after shutdown");
                group.cancel_all();
                reports.push(StageReport {
                    group: name,
                    mode,
                    outcome: StageOutcome::Skipped,
                });
                continue;
            }

            info!(
                stage = index + 1,
                stages = total,
                group = %name,
                mode = %mode,
                tasks = group.task_count(),
                "Starting stage"
            );

            if let Err(e) = self.start_group(&mut group).await {
                error!(group = %name, error = %e, "Stage failed to start");
                group.cancel_all();
                group.await_all().await;
                if self.policy.abort_on_failure {
                    return Err(e.into());
                }
                reports.push(StageReport {
                    group: name,
                    mode,
                    outcome: StageOutcome::SpawnFailed {
                        error: e.to_string(),
                    },
                });
                continue;
            }

            let stop = self.wait_for_stop(group.finished(), run_for).await;
            info!(group = %name, stop = ?stop, "Stopping stage");

            group.cancel_all();
            self.wind_down(&[&group]).await;
            let report = group.await_all().await;

            reports.push(StageReport {
                group: name,
                mode,
                outcome: StageOutcome::Completed { stop, report },
            });
        }

        Ok(SequenceReport { stages: reports })
    }

    /// Run every group at the same time and stop them together.
    pub async fn run_concurrent(
        &self,
        groups: Vec<WorkerGroup>,
        run_for: Option<Duration>,
    ) -> Result<SequenceReport> {
        if self.shutdown.is_cancelled() {
            let stages = groups
                .into_iter()
                .map(|group| StageReport {
                    group: group.name().to_string(),
                    mode: group.mode(),
                    outcome: StageOutcome::Skipped,
                })
                .collect();
            return Ok(SequenceReport { stages });
        }

        let mut entries: Vec<(WorkerGroup, Option<String>)> = Vec::with_capacity(groups.len());

        for mut group in groups {
            match self.start_group(&mut group).await {
                Ok(()) => entries.push((group, None)),
                Err(e) => {
                    error!(group = %group.name(), error = %e, "Group failed to start");
                    group.cancel_all();
                    if self.policy.abort_on_failure {
                        for (running, _) in &mut entries {
                            running.cancel_all();
                            running.await_all().await;
                        }
                        return Err(e.into());
                    }
                    entries.push((group, Some(e.to_string())));
                }
            }
        }

        info!(groups = entries.len(), "Running groups concurrently");

        let finished = async {
            for (group, failure) in &entries {
                if failure.is_none() {
                    group.finished().await;
                }
            }
        };
        let stop = self.wait_for_stop(finished, run_for).await;
        info!(stop = ?stop, "Stopping all groups");

        for (group, _) in &entries {
            group.cancel_all();
        }
        let running: Vec<&WorkerGroup> = entries.iter().map(|(group, _)| group).collect();
        self.wind_down(&running).await;

        let mut stages = Vec::with_capacity(entries.len());
        for (mut group, failure) in entries {
            let outcome = match failure {
                None => StageOutcome::Completed {
                    stop,
                    report: group.await_all().await,
                },
                Some(error) => StageOutcome::SpawnFailed { error },
            };
            stages.push(StageReport {
                group: group.name().to_string(),
                mode: group.mode(),
                outcome,
            });
        }

        Ok(SequenceReport { stages })
    }

    async fn start_group(&self, group: &mut WorkerGroup) -> std::result::Result<(), SpawnError> {
        let mut attempt = 0;
        loop {
            match group.start() {
                Ok(()) => return Ok(()),
                Err(e @ SpawnError::Cancelled { .. }) => return Err(e),
                Err(e) if attempt < self.policy.retries && !self.shutdown.is_cancelled() => {
                    attempt += 1;
                    warn!(
                        group = %group.name(),
                        attempt,
                        retries = self.policy.retries,
                        error = %e,
                        "Group failed to start, retrying"
                    );
                    tokio::select! {
                        _ = self.shutdown.cancelled() => return Err(e),
                        _ = tokio::time::sleep(self.policy.retry_delay) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Wait for cancelled groups to exit. Another interrupt meanwhile kills them.
    async fn wind_down(&self, groups: &[&WorkerGroup]) {
        let finished = async {
            for group in groups {
                group.finished().await;
            }
        };

        tokio::select! {
            _ = finished => {}
            _ = self.interrupts.notified() => {
                warn!(groups = groups.len(), "Interrupted while stopping, killing workers");
                for group in groups {
                    group.kill_all();
                }
            }
        }
    }

    async fn wait_for_stop(
        &self,
        finished: impl Future<Output = ()>,
        run_for: Option<Duration>,
    ) -> StopReason {
        let elapsed = async {
            match run_for {
                Some(duration) => tokio::time::sleep(duration).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => StopReason::Shutdown,
            _ = self.interrupts.notified() => StopReason::Interrupted,
            _ = elapsed => StopReason::Elapsed,
            _ = finished => StopReason::TasksEnded,
        }
    }
}
