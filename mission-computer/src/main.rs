//! Mission computer telemetry sampler.
//!
//! Runs the info, load and environment tasks first as threads of one process,
//! then as one worker process per task. Ctrl+C moves on to the next stage.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use clap::{Args, Parser, Subcommand};
use mission_common::{Category, Format, init_tracing};
use mission_scheduler::{
    CancellationToken, IsolatedWorkerGroup, MissionRunner, RunnerArgs, RunnerConfig,
    SamplingTask, SharedWorkerGroup, StageOutcome, StreamEmitter, TaskSpec, WorkerCommand,
    serve_worker,
};

use mission_computer::config::{DEFAULT_CONFIG_PATH, MissionComputerConfig, MissionConfig};
use mission_computer::sources::build_source;

#[derive(Parser, Debug)]
#[command(name = "mission-computer", version, about = "Mission computer telemetry sampler")]
struct Cli {
    #[command(flatten)]
    runner: RunnerArgs,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Run the threaded computer, then one process per task (default).
    Run,
    /// Run every task as a thread of this process.
    Shared,
    /// Run every task in its own worker process.
    Isolated,
    /// Worker process entry point.
    #[command(hide = true)]
    Worker(WorkerArgs),
}

#[derive(Args, Debug, Clone)]
struct WorkerArgs {
    #[arg(long)]
    identity: String,

    #[arg(long)]
    category: Category,

    #[arg(long)]
    cadence_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = MissionComputerConfig::load_or_default(
        cli.runner.config.as_deref(),
        DEFAULT_CONFIG_PATH,
    )
    .context("Failed to load configuration")?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Worker(worker) => run_worker(config, &cli.runner, worker).await,
        command => run_stages(config, &cli.runner, command).await,
    }
}

async fn run_stages(
    config: MissionComputerConfig,
    args: &RunnerArgs,
    command: Command,
) -> Result<()> {
    let mission = config.mission.clone();
    let runner = MissionRunner::new_with_args("mission-computer", config, args)
        .context("Failed to start runner")?;

    let mut stages = Vec::new();
    if matches!(command, Command::Run | Command::Shared) {
        stages.push(runner.stage(shared_group(&runner, &mission)));
    }
    if matches!(command, Command::Run | Command::Isolated) {
        stages.push(runner.stage(isolated_group(&runner, &mission, args)?));
    }

    let report = runner.run_sequence(stages).await?;

    for stage in &report.stages {
        match &stage.outcome {
            StageOutcome::Completed { stop, report } => tracing::info!(
                group = %stage.group,
                stop = ?stop,
                emitted = report.total_emitted(),
                "Stage finished"
            ),
            StageOutcome::SpawnFailed { error } => {
                tracing::error!(group = %stage.group, error = %error, "Stage never started")
            }
            StageOutcome::Skipped => tracing::info!(group = %stage.group, "Stage skipped"),
        }
    }

    Ok(())
}

/// All tasks under one identity, as threads of this process.
fn shared_group(
    runner: &MissionRunner<MissionComputerConfig>,
    mission: &MissionConfig,
) -> SharedWorkerGroup {
    let identity = mission.shared_identity();
    let mut group = runner.shared_group("shared");

    for task in &mission.tasks {
        group.add_task(
            identity.clone(),
            task.cadence(),
            build_source(task.category, mission),
        );
    }

    group
}

/// One worker process per task, each re-launching this executable.
fn isolated_group(
    runner: &MissionRunner<MissionComputerConfig>,
    mission: &MissionConfig,
    args: &RunnerArgs,
) -> Result<IsolatedWorkerGroup> {
    let mut command =
        WorkerCommand::current_exe().context("Failed to locate the mission-computer executable")?;
    if let Some(path) = &args.config {
        command = command.arg("--config").arg(path.display().to_string());
    }
    if let Some(level) = &args.log_level {
        command = command.arg("--log-level").arg(level.as_str());
    }
    let command = command.arg("worker");

    let mut group = runner.isolated_group("isolated", command);
    for (i, task) in mission.tasks.iter().enumerate() {
        group.add_task(TaskSpec::new(
            mission.isolated_identity(i + 1),
            task.category,
            task.cadence(),
        ));
    }

    Ok(group)
}

/// Child side of an isolated group: one task, JSON lines on stdout.
async fn run_worker(
    config: MissionComputerConfig,
    args: &RunnerArgs,
    worker: WorkerArgs,
) -> Result<()> {
    ensure!(worker.cadence_ms > 0, "--cadence-ms must be greater than 0");

    let log_config = config.logging().with_level_override(args.log_level.as_deref());
    init_tracing(&log_config).context("Failed to initialize logging")?;

    let emitter = Arc::new(StreamEmitter::stdout(Format::Json));
    let task = SamplingTask::new(
        worker.identity.clone(),
        Duration::from_millis(worker.cadence_ms),
        build_source(worker.category, &config.mission),
        emitter,
    )
    .with_emit_failure_limit(config.scheduler().emit_failure_limit);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    let report = serve_worker(task, cancel).await;
    tracing::debug!(
        worker = %worker.identity,
        emitted = report.counters.emitted,
        exit = ?report.exit,
        "Worker finished"
    );

    Ok(())
}
