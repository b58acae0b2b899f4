//! Mission Scheduler
//!
//! Periodic multi-worker sampling: every task samples its own sensor source at
//! a fixed cadence and emits tagged snapshots to a shared sink until cancelled.
//!
//! # Overview
//!
//! This crate provides:
//! - [`SensorSource`] trait for anything that can produce a [`TelemetrySnapshot`]
//! - [`SamplingTask`] for the cancellable fixed-cadence sample/emit loop
//! - [`SharedWorkerGroup`] and [`IsolatedWorkerGroup`] (one OS process per task),
//!   unified as [`WorkerGroup`]
//! - [`Emitter`] for rendering records to a sink as atomic blocks
//! - [`Orchestrator`] for stage sequencing and the top-level cancellation entry point
//! - [`RunnerConfig`], [`RunnerArgs`] and [`MissionRunner`] for building binaries
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use mission_scheduler::{Format, Orchestrator, SharedWorkerGroup, Stage, StreamEmitter};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let emitter = Arc::new(StreamEmitter::stdout(Format::Text));
//!     let group = SharedWorkerGroup::new("Threaded", emitter)
//!         .with_task("sensor", Duration::from_secs(5), my_source());
//!
//!     let report = Orchestrator::new()
//!         .run_sequence(vec![Stage::new(group).run_for(Duration::from_secs(60))])
//!         .await?;
//!     println!("{} records", report.total_emitted());
//!     Ok(())
//! }
//! ```

mod args;
mod config;
mod emitter;
mod error;
mod group;
mod isolated;
mod orchestrator;
mod runner;
mod shared;
mod source;
mod stats;
mod task;

pub use args::RunnerArgs;
pub use config::{RunnerConfig, SchedulerSettings};
pub use emitter::{Emitter, MemoryEmitter, StreamEmitter};
pub use error::{EmitError, Result, SchedulerError, SourceError, SpawnError};
pub use group::{GroupMode, WorkerGroup};
pub use isolated::{
    DEFAULT_GRACE_PERIOD, IsolatedWorkerGroup, TaskSpec, WorkerCommand, cancel_on_stdin_close,
    serve_worker,
};
pub use orchestrator::{
    InterruptHandle, Orchestrator, SequenceReport, SpawnPolicy, Stage, StageOutcome, StageReport,
    StopReason,
};
pub use runner::MissionRunner;
pub use shared::SharedWorkerGroup;
pub use source::{FnSource, SensorSource, source_fn};
pub use stats::{GroupReport, TaskCounters, TaskExit, TaskReport, TaskState, TaskStats};
pub use task::SamplingTask;

// Re-export commonly used types from mission-common
pub use mission_common::{
    Category, Format, LogFormat, LoggingConfig, TelemetryRecord, TelemetrySnapshot, TelemetryValue,
};

// Re-export the cancellation token type used by every task
pub use tokio_util::sync::CancellationToken;
