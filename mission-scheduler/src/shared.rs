//! Worker group running every task inside this process.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info};

use crate::emitter::Emitter;
use crate::error::SpawnError;
use crate::group::GroupMode;
use crate::source::SensorSource;
use crate::stats::{GroupReport, TaskExit, TaskReport, TaskStats};
use crate::task::SamplingTask;

/// Runs its tasks as concurrent tokio tasks in one address space.
///
/// Every task owns its own [`SensorSource`]; the only thing the tasks share
/// is the emitter, which serializes writes to the sink.
pub struct SharedWorkerGroup {
    name: String,
    emitter: Arc<dyn Emitter>,
    emit_failure_limit: u32,
    pending: Vec<SamplingTask>,
    stats: Vec<Arc<TaskStats>>,
    handles: Vec<(Arc<TaskStats>, JoinHandle<TaskReport>)>,
    cancel: CancellationToken,
    tracker: TaskTracker,
    started: bool,
}

impl SharedWorkerGroup {
    /// Create an empty group writing to `emitter`.
    pub fn new(name: impl Into<String>, emitter: Arc<dyn Emitter>) -> Self {
        Self {
            name: name.into(),
            emitter,
            emit_failure_limit: 0,
            pending: Vec::new(),
            stats: Vec::new(),
            handles: Vec::new(),
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
            started: false,
        }
    }

    /// Emit-failure limit applied to tasks added after this call.
    pub fn with_emit_failure_limit(mut self, limit: u32) -> Self {
        self.emit_failure_limit = limit;
        self
    }

    /// Add a task built from an (identity, cadence, source) triple.
    pub fn with_task(
        mut self,
        identity: impl Into<String>,
        cadence: Duration,
        source: impl SensorSource,
    ) -> Self {
        self.add_task(identity, cadence, source);
        self
    }

    /// Add a task built from an (identity, cadence, source) triple.
    pub fn add_task(
        &mut self,
        identity: impl Into<String>,
        cadence: Duration,
        source: impl SensorSource,
    ) {
        let task = SamplingTask::new(identity, cadence, source, self.emitter.clone())
            .with_emit_failure_limit(self.emit_failure_limit);
        self.push_task(task);
    }

    /// Add a fully built task.
    pub fn push_task(&mut self, task: SamplingTask) {
        self.stats.push(task.stats());
        self.pending.push(task);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> GroupMode {
        GroupMode::Shared
    }

    pub fn task_count(&self) -> usize {
        self.stats.len()
    }

    /// Live stats for every task, in the order tasks were added.
    pub fn task_stats(&self) -> Vec<Arc<TaskStats>> {
        self.stats.clone()
    }

    /// Spawn every task. Calling it again after a successful start does nothing.
    pub fn start(&mut self) -> Result<(), SpawnError> {
        if self.cancel.is_cancelled() {
            return Err(SpawnError::Cancelled {
                group: self.name.clone(),
            });
        }
        if self.started {
            return Ok(());
        }

        for task in self.pending.drain(..) {
            let stats = task.stats();
            let handle = self.tracker.spawn(task.run(self.cancel.child_token()));
            self.handles.push((stats, handle));
        }
        self.tracker.close();
        self.started = true;

        info!(
            group = %self.name,
            mode = %GroupMode::Shared,
            tasks = self.handles.len(),
            "Worker group started"
        );

        Ok(())
    }

    /// Propagate cancellation to every task. Further calls are no-ops.
    pub fn cancel_all(&self) {
        if !self.cancel.is_cancelled() {
            info!(group = %self.name, "Cancelling worker group");
            self.cancel.cancel();
        }
        // Tasks that never started can never run now.
        if !self.started {
            for stats in &self.stats {
                stats.mark_cancelled();
            }
        }
    }

    /// Resolves once every spawned task has ended, without consuming results.
    ///
    /// Resolves immediately for a group that was never started.
    pub async fn finished(&self) {
        if self.started {
            self.tracker.wait().await;
        }
    }

    /// Wait for every task to finish and collect their reports.
    ///
    /// Tasks run until cancelled, so this only returns on its own after
    /// [`cancel_all`](Self::cancel_all) or once every task stopped itself.
    pub async fn await_all(&mut self) -> GroupReport {
        let mut tasks = Vec::with_capacity(self.stats.len());

        for (stats, handle) in self.handles.drain(..) {
            let report = match handle.await {
                Ok(report) => report,
                Err(e) => {
                    error!(
                        group = %self.name,
                        task = %stats.identity(),
                        error = %e,
                        "Sampling task panicked"
                    );
                    stats.mark_cancelled();
                    stats.report(TaskExit::Panicked {
                        message: e.to_string(),
                    })
                }
            };
            tasks.push(report);
        }

        // Tasks that were never spawned.
        for task in self.pending.drain(..) {
            let stats = task.stats();
            stats.mark_cancelled();
            tasks.push(stats.report(TaskExit::Cancelled));
        }

        info!(group = %self.name, tasks = tasks.len(), "Worker group joined");

        GroupReport {
            group: self.name.clone(),
            mode: GroupMode::Shared,
            tasks,
        }
    }
}
