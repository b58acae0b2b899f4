//! Worker group running every task in its own OS process.
//!
//! The parent launches one child per task with a [`WorkerCommand`]. Only a
//! [`TaskSpec`] (identity, category, cadence) crosses the process boundary,
//! as command-line flags; the child builds its own sensor source. Each child
//! writes one JSON record per line to stdout, and the parent re-emits those
//! records through its own [`Emitter`], which keeps the shared sink's single
//! serialization point.
//!
//! Stopping is cooperative first: the parent closes the child's stdin and the
//! child treats end-of-input as cancellation (see [`serve_worker`]). A child
//! that is still alive after the grace period is killed.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use mission_common::{Category, decode_record};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::emitter::Emitter;
use crate::error::SpawnError;
use crate::group::GroupMode;
use crate::stats::{GroupReport, TaskExit, TaskReport, TaskStats};
use crate::task::SamplingTask;

/// Default time a worker gets to exit after its stdin is closed.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(2);

/// How long to keep reading a worker's output after it exited on its own.
const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Task parameters passed to a worker process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub identity: String,
    pub category: Category,
    pub cadence_ms: u64,
}

impl TaskSpec {
    pub fn new(identity: impl Into<String>, category: Category, cadence: Duration) -> Self {
        Self {
            identity: identity.into(),
            category,
            cadence_ms: u64::try_from(cadence.as_millis()).unwrap_or(u64::MAX),
        }
    }

    pub fn cadence(&self) -> Duration {
        Duration::from_millis(self.cadence_ms)
    }

    /// Command-line flags understood by the worker entry point.
    pub fn to_args(&self) -> Vec<String> {
        vec![
            "--identity".to_string(),
            self.identity.clone(),
            "--category".to_string(),
            self.category.as_str().to_string(),
            "--cadence-ms".to_string(),
            self.cadence_ms.to_string(),
        ]
    }
}

/// Program and leading arguments used to launch a worker process.
///
/// The [`TaskSpec`] flags are appended after the leading arguments.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    program: PathBuf,
    args: Vec<String>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Re-launch the running executable.
    pub fn current_exe() -> io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?))
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn command_for(&self, spec: &TaskSpec) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).args(spec.to_args());
        cmd
    }
}

struct WorkerHandle {
    stats: Arc<TaskStats>,
    pid: Option<u32>,
    kill: CancellationToken,
    handle: JoinHandle<TaskReport>,
}

/// Runs each task in its own worker process.
pub struct IsolatedWorkerGroup {
    name: String,
    command: WorkerCommand,
    emitter: Arc<dyn Emitter>,
    emit_failure_limit: u32,
    grace_period: Duration,
    specs: Vec<TaskSpec>,
    stats: Vec<Arc<TaskStats>>,
    workers: Vec<WorkerHandle>,
    cancel: CancellationToken,
    tracker: TaskTracker,
    started: bool,
}

impl IsolatedWorkerGroup {
    /// Create an empty group launching workers with `command`.
    pub fn new(name: impl Into<String>, command: WorkerCommand, emitter: Arc<dyn Emitter>) -> Self {
        Self {
            name: name.into(),
            command,
            emitter,
            emit_failure_limit: 0,
            grace_period: DEFAULT_GRACE_PERIOD,
            specs: Vec::new(),
            stats: Vec::new(),
            workers: Vec::new(),
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
            started: false,
        }
    }

    /// Stop relaying a worker after this many consecutive emit failures (0 = never).
    pub fn with_emit_failure_limit(mut self, limit: u32) -> Self {
        self.emit_failure_limit = limit;
        self
    }

    /// Time a worker gets to exit cooperatively before it is killed.
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn with_task(mut self, spec: TaskSpec) -> Self {
        self.add_task(spec);
        self
    }

    pub fn add_task(&mut self, spec: TaskSpec) {
        self.stats
            .push(Arc::new(TaskStats::new(spec.identity.clone(), spec.category)));
        self.specs.push(spec);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> GroupMode {
        GroupMode::Isolated
    }

    pub fn task_count(&self) -> usize {
        self.specs.len()
    }

    pub fn task_stats(&self) -> Vec<Arc<TaskStats>> {
        self.stats.clone()
    }

    /// Process ids of the running workers, by identity.
    pub fn pids(&self) -> Vec<(String, Option<u32>)> {
        self.workers
            .iter()
            .map(|w| (w.stats.identity().to_string(), w.pid))
            .collect()
    }

    /// Launch one worker process per task.
    ///
    /// If any launch fails, the workers already launched by this call are
    /// killed and the error is returned; the group can be started again.
    pub fn start(&mut self) -> Result<(), SpawnError> {
        if self.cancel.is_cancelled() {
            return Err(SpawnError::Cancelled {
                group: self.name.clone(),
            });
        }
        if self.started {
            return Ok(());
        }

        match self.spawn_all() {
            Ok(workers) => {
                self.workers = workers;
                self.tracker.close();
                self.started = true;
                info!(
                    group = %self.name,
                    mode = %GroupMode::Isolated,
                    tasks = self.workers.len(),
                    "Worker group started"
                );
                Ok(())
            }
            Err(e) => {
                error!(group = %self.name, error = %e, "Worker group failed to start");
                // Fresh counters for a retry.
                self.stats = self
                    .specs
                    .iter()
                    .map(|s| Arc::new(TaskStats::new(s.identity.clone(), s.category)))
                    .collect();
                Err(e)
            }
        }
    }

    fn spawn_all(&self) -> Result<Vec<WorkerHandle>, SpawnError> {
        let mut workers: Vec<WorkerHandle> = Vec::with_capacity(self.specs.len());

        for (spec, stats) in self.specs.iter().zip(&self.stats) {
            match self.spawn_worker(spec, stats.clone()) {
                Ok(worker) => workers.push(worker),
                Err(e) => {
                    for worker in &workers {
                        worker.kill.cancel();
                    }
                    return Err(e);
                }
            }
        }

        Ok(workers)
    }

    fn spawn_worker(&self, spec: &TaskSpec, stats: Arc<TaskStats>) -> Result<WorkerHandle, SpawnError> {
        let mut cmd = self.command.command_for(spec);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| SpawnError::Process {
            identity: spec.identity.clone(),
            source,
        })?;

        let Some(stdout) = child.stdout.take() else {
            let _ = child.start_kill();
            return Err(SpawnError::Pipe {
                identity: spec.identity.clone(),
                pipe: "stdout",
            });
        };
        let stdin = child.stdin.take();
        let pid = child.id();

        stats.mark_running();
        info!(
            worker = %spec.identity,
            category = %spec.category,
            cadence_ms = spec.cadence_ms,
            pid = ?pid,
            "Worker process started"
        );

        let kill = CancellationToken::new();
        let process = WorkerProcess {
            identity: spec.identity.clone(),
            child,
            stdin,
            stdout,
            stats: stats.clone(),
            emitter: self.emitter.clone(),
            emit_failure_limit: self.emit_failure_limit,
            grace_period: self.grace_period,
        };
        let handle = self
            .tracker
            .spawn(supervise(process, self.cancel.child_token(), kill.clone()));

        Ok(WorkerHandle {
            stats,
            pid,
            kill,
            handle,
        })
    }

    /// Forcibly kill one worker. Other workers keep running.
    ///
    /// Returns false if no running worker has that identity.
    pub fn terminate(&self, identity: &str) -> bool {
        match self.workers.iter().find(|w| w.stats.identity() == identity) {
            Some(worker) => {
                worker.kill.cancel();
                true
            }
            None => false,
        }
    }

    /// Ask every worker to stop. Further calls are no-ops.
    pub fn cancel_all(&self) {
        if !self.cancel.is_cancelled() {
            info!(group = %self.name, "Cancelling worker group");
            self.cancel.cancel();
        }
        if !self.started {
            for stats in &self.stats {
                stats.mark_cancelled();
            }
        }
    }

    /// Hard-stop every worker without waiting for the grace period.
    pub fn kill_all(&self) {
        for worker in &self.workers {
            worker.kill.cancel();
        }
    }

    /// Resolves once every worker has exited. Immediate if never started.
    pub async fn finished(&self) {
        if self.started {
            self.tracker.wait().await;
        }
    }

    /// Wait for every worker to exit and collect their reports.
    pub async fn await_all(&mut self) -> GroupReport {
        let mut tasks = Vec::with_capacity(self.specs.len());

        if self.started {
            for worker in self.workers.drain(..) {
                let report = match worker.handle.await {
                    Ok(report) => report,
                    Err(e) => {
                        error!(
                            group = %self.name,
                            worker = %worker.stats.identity(),
                            error = %e,
                            "Worker supervisor panicked"
                        );
                        worker.stats.mark_cancelled();
                        worker.stats.report(TaskExit::Panicked {
                            message: e.to_string(),
                        })
                    }
                };
                tasks.push(report);
            }
        } else {
            for stats in &self.stats {
                stats.mark_cancelled();
                tasks.push(stats.report(TaskExit::Cancelled));
            }
        }

        info!(group = %self.name, tasks = tasks.len(), "Worker group joined");

        GroupReport {
            group: self.name.clone(),
            mode: GroupMode::Isolated,
            tasks,
        }
    }
}

struct WorkerProcess {
    identity: String,
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: ChildStdout,
    stats: Arc<TaskStats>,
    emitter: Arc<dyn Emitter>,
    emit_failure_limit: u32,
    grace_period: Duration,
}

/// Relay a worker's records until it exits, stopping it on cancel or kill.
async fn supervise(
    process: WorkerProcess,
    cancel: CancellationToken,
    kill: CancellationToken,
) -> TaskReport {
    let WorkerProcess {
        identity,
        mut child,
        mut stdin,
        stdout,
        stats,
        emitter,
        emit_failure_limit,
        grace_period,
    } = process;

    let mut lines = BufReader::new(stdout).lines();
    let mut stdout_open = true;
    let mut stop_requested = false;
    let mut killed = false;
    let mut deadline: Option<Instant> = None;
    let mut escalated: Option<u32> = None;

    let status = loop {
        tokio::select! {
            biased;
            _ = kill.cancelled(), if !killed => {
                warn!(worker = %identity, "Killing worker process");
                killed = true;
                if let Err(e) = child.start_kill() {
                    warn!(worker = %identity, error = %e, "Failed to kill worker process");
                }
            }
            _ = cancel.cancelled(), if !stop_requested => {
                stop_requested = true;
                // End of input tells the worker to stop.
                drop(stdin.take());
                deadline = Some(Instant::now() + grace_period);
                debug!(worker = %identity, "Asked worker process to stop");
            }
            _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() && !killed => {
                warn!(
                    worker = %identity,
                    grace_ms = u64::try_from(grace_period.as_millis()).unwrap_or(u64::MAX),
                    "Worker did not stop within grace period, killing"
                );
                killed = true;
                if let Err(e) = child.start_kill() {
                    warn!(worker = %identity, error = %e, "Failed to kill worker process");
                }
            }
            line = lines.next_line(), if stdout_open => match line {
                Ok(Some(line)) => {
                    if let Some(consecutive) =
                        relay(&identity, &line, emitter.as_ref(), &stats, emit_failure_limit)
                    {
                        warn!(
                            worker = %identity,
                            limit = emit_failure_limit,
                            "Emit failure limit reached, stopping worker"
                        );
                        escalated = Some(consecutive);
                        stop_requested = true;
                        killed = true;
                        drop(stdin.take());
                        if let Err(e) = child.start_kill() {
                            warn!(worker = %identity, error = %e, "Failed to kill worker process");
                        }
                    }
                }
                Ok(None) => stdout_open = false,
                Err(e) => {
                    warn!(worker = %identity, error = %e, "Failed to read worker output");
                    stdout_open = false;
                }
            },
            status = child.wait() => break status,
        }
    };

    // Records written just before a clean exit may still be buffered.
    if stdout_open && !killed {
        let drain = async {
            while let Ok(Some(line)) = lines.next_line().await {
                relay(&identity, &line, emitter.as_ref(), &stats, 0);
            }
        };
        let _ = tokio::time::timeout(DRAIN_TIMEOUT, drain).await;
    }

    stats.mark_cancelled();

    let exit = match (status, escalated) {
        (_, Some(consecutive)) => TaskExit::EmitFailures { consecutive },
        _ if killed => TaskExit::Killed,
        (Ok(_), None) if stop_requested => TaskExit::Cancelled,
        (Ok(status), None) => {
            warn!(worker = %identity, status = %status, "Worker process exited unexpectedly");
            TaskExit::ProcessExited {
                code: status.code(),
            }
        }
        (Err(e), None) => {
            warn!(worker = %identity, error = %e, "Failed to wait for worker process");
            TaskExit::ProcessExited { code: None }
        }
    };

    info!(worker = %identity, exit = ?exit, "Worker process stopped");

    stats.report(exit)
}

/// Decode one worker line and emit it. Returns the failure count once the limit is hit.
fn relay(
    identity: &str,
    line: &str,
    emitter: &dyn Emitter,
    stats: &TaskStats,
    emit_failure_limit: u32,
) -> Option<u32> {
    if line.trim().is_empty() {
        return None;
    }
    stats.record_sample();

    let record = match decode_record(line) {
        Ok(record) => record,
        Err(e) => {
            stats.record_source_error();
            warn!(worker = %identity, error = %e, "Malformed record from worker");
            return None;
        }
    };

    match emitter.emit_record(&record) {
        Ok(()) => {
            stats.record_emitted();
            None
        }
        Err(e) => {
            let consecutive = stats.record_emit_error();
            warn!(worker = %identity, error = %e, consecutive, "Emit failed");
            (emit_failure_limit > 0 && consecutive >= emit_failure_limit).then_some(consecutive)
        }
    }
}

/// Run a task inside a worker process.
///
/// The task stops when `cancel` fires or when stdin reaches end-of-input,
/// which is how the parent group asks a worker to stop.
pub async fn serve_worker(task: SamplingTask, cancel: CancellationToken) -> TaskReport {
    cancel_on_stdin_close(cancel.clone());
    task.run(cancel).await
}

/// Cancel `cancel` once standard input is closed.
///
/// Reads on a plain thread so a pending read never holds up runtime shutdown.
pub fn cancel_on_stdin_close(cancel: CancellationToken) {
    let spawned = std::thread::Builder::new()
        .name("stdin-watch".to_string())
        .spawn(move || {
            let mut stdin = io::stdin().lock();
            let _ = io::copy(&mut stdin, &mut io::sink());
            debug!("Standard input closed");
            cancel.cancel();
        });

    if let Err(e) = spawned {
        warn!(error = %e, "Failed to watch standard input; worker stops only on signal");
    }
}
