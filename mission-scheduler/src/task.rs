//! Fixed-cadence sampling task.

use std::sync::Arc;
use std::time::Duration;

use mission_common::Category;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::emitter::Emitter;
use crate::source::SensorSource;
use crate::stats::{TaskExit, TaskReport, TaskStats};

/// Runs one [`SensorSource`] at a fixed cadence until cancelled.
///
/// The first sample is taken one cadence after the task starts, then every
/// cadence after that. A failed sample is logged and the schedule continues.
/// A failed emission is logged too; once `emit_failure_limit` emissions in a
/// row have failed the task stops itself (a limit of 0 never stops).
pub struct SamplingTask {
    identity: String,
    cadence: Duration,
    source: Box<dyn SensorSource>,
    emitter: Arc<dyn Emitter>,
    emit_failure_limit: u32,
    stats: Arc<TaskStats>,
}

impl SamplingTask {
    /// Create a task. The source is owned by this task alone.
    pub fn new(
        identity: impl Into<String>,
        cadence: Duration,
        source: impl SensorSource,
        emitter: Arc<dyn Emitter>,
    ) -> Self {
        let identity = identity.into();
        let stats = Arc::new(TaskStats::new(identity.clone(), source.category()));
        Self {
            identity,
            cadence,
            source: Box::new(source),
            emitter,
            emit_failure_limit: 0,
            stats,
        }
    }

    /// Stop the task after this many consecutive emit failures (0 = never).
    pub fn with_emit_failure_limit(mut self, limit: u32) -> Self {
        self.emit_failure_limit = limit;
        self
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn cadence(&self) -> Duration {
        self.cadence
    }

    pub fn category(&self) -> Category {
        self.stats.category()
    }

    /// Live counters and state, shared with whoever holds the clone.
    pub fn stats(&self) -> Arc<TaskStats> {
        self.stats.clone()
    }

    /// Run until `cancel` fires or the emit-failure limit is reached.
    ///
    /// Cancellation interrupts the cadence wait; it is never deferred to the
    /// next tick.
    pub async fn run(mut self, cancel: CancellationToken) -> TaskReport {
        if !self.stats.mark_running() {
            // Already cancelled before it ever ran.
            return self.stats.report(TaskExit::Cancelled);
        }

        info!(
            task = %self.identity,
            category = %self.category(),
            cadence_ms = u64::try_from(self.cadence.as_millis()).unwrap_or(u64::MAX),
            "Sampling task started"
        );

        let mut ticker = tokio::time::interval(self.cadence);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        let exit = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break TaskExit::Cancelled,
                _ = ticker.tick() => {
                    if let Some(exit) = self.sample_once() {
                        break exit;
                    }
                }
            }
        };

        self.stats.mark_cancelled();

        let counters = self.stats.counters();
        info!(
            task = %self.identity,
            emitted = counters.emitted,
            source_errors = counters.source_errors,
            emit_errors = counters.emit_errors,
            exit = ?exit,
            "Sampling task stopped"
        );

        self.stats.report(exit)
    }

    /// One iteration: sample, then emit. Returns an exit reason if the task must stop.
    fn sample_once(&mut self) -> Option<TaskExit> {
        self.stats.record_sample();

        let snapshot = match self.source.sample() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.stats.record_source_error();
                warn!(task = %self.identity, error = %e, "Sample failed");
                return None;
            }
        };

        match self.emitter.emit(&self.identity, snapshot) {
            Ok(()) => {
                self.stats.record_emitted();
                debug!(task = %self.identity, "Snapshot emitted");
                None
            }
            Err(e) => {
                let consecutive = self.stats.record_emit_error();
                warn!(
                    task = %self.identity,
                    error = %e,
                    consecutive,
                    "Emit failed"
                );
                if self.emit_failure_limit > 0 && consecutive >= self.emit_failure_limit {
                    warn!(
                        task = %self.identity,
                        limit = self.emit_failure_limit,
                        "Emit failure limit reached, stopping task"
                    );
                    Some(TaskExit::EmitFailures { consecutive })
                } else {
                    None
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitter::MemoryEmitter;
    use crate::error::{EmitError, SourceError};
    use crate::source::source_fn;
    use crate::stats::TaskState;
    use mission_common::{TelemetryRecord, TelemetrySnapshot};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn counting_source() -> impl SensorSource {
        let mut n = 0u64;
        source_fn(Category::Environment, move || {
            n += 1;
            Ok(TelemetrySnapshot::new(Category::Environment).with_metric("n", n))
        })
    }

    /// Fails every emission.
    struct BrokenSink;

    impl Emitter for BrokenSink {
        fn emit_record(&self, _record: &TelemetryRecord) -> Result<(), EmitError> {
            Err(EmitError::Write(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "closed",
            )))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_emits_once_per_cadence() {
        let emitter = Arc::new(MemoryEmitter::new());
        let task = SamplingTask::new(
            "env",
            Duration::from_secs(5),
            counting_source(),
            emitter.clone(),
        );
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(task.run(cancel.clone()));

        tokio::time::sleep(Duration::from_secs(16)).await;
        cancel.cancel();
        let report = handle.await.unwrap();

        // Ticks at 5, 10, 15.
        assert_eq!(report.counters.emitted, 3);
        assert_eq!(report.exit, TaskExit::Cancelled);
        assert_eq!(report.state, TaskState::Cancelled);

        let values: Vec<_> = emitter
            .records()
            .iter()
            .map(|r| r.get("n").cloned())
            .collect();
        assert_eq!(values, vec![Some(1u64.into()), Some(2u64.into()), Some(3u64.into())]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_sleep() {
        let emitter = Arc::new(MemoryEmitter::new());
        let task = SamplingTask::new(
            "slow",
            Duration::from_secs(3600),
            counting_source(),
            emitter.clone(),
        );
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(task.run(cancel.clone()));

        tokio::time::sleep(Duration::from_secs(1)).await;
        let cancelled_at = tokio::time::Instant::now();
        cancel.cancel();
        let report = handle.await.unwrap();

        assert!(cancelled_at.elapsed() < Duration::from_secs(1));
        assert_eq!(report.counters.emitted, 0);
        assert!(emitter.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_source_error_does_not_stop_schedule() {
        let calls = Arc::new(AtomicU32::new(0));
        let seen = calls.clone();
        let source = source_fn(Category::Load, move || {
            let call = seen.fetch_add(1, Ordering::SeqCst) + 1;
            if call == 2 {
                Err(SourceError::unavailable("provider down"))
            } else {
                Ok(TelemetrySnapshot::new(Category::Load).with_metric("call", call as u64))
            }
        });

        let emitter = Arc::new(MemoryEmitter::new());
        let task = SamplingTask::new("load", Duration::from_secs(1), source, emitter.clone());
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(task.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(3500)).await;
        cancel.cancel();
        let report = handle.await.unwrap();

        assert_eq!(report.counters.samples, 3);
        assert_eq!(report.counters.source_errors, 1);
        assert_eq!(report.counters.emitted, 2);
        let calls: Vec<_> = emitter
            .records()
            .iter()
            .map(|r| r.get("call").cloned())
            .collect();
        assert_eq!(calls, vec![Some(1u64.into()), Some(3u64.into())]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_emit_failure_limit_stops_only_this_task() {
        let task = SamplingTask::new(
            "doomed",
            Duration::from_secs(1),
            counting_source(),
            Arc::new(BrokenSink),
        )
        .with_emit_failure_limit(3);
        let stats = task.stats();

        let cancel = CancellationToken::new();
        let report = task.run(cancel.clone()).await;

        assert_eq!(report.exit, TaskExit::EmitFailures { consecutive: 3 });
        assert_eq!(report.counters.emit_errors, 3);
        assert_eq!(stats.state(), TaskState::Cancelled);
        // The shared token is untouched.
        assert!(!cancel.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_limit_never_escalates() {
        let task = SamplingTask::new(
            "stubborn",
            Duration::from_secs(1),
            counting_source(),
            Arc::new(BrokenSink),
        );
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(task.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(10_500)).await;
        cancel.cancel();
        let report = handle.await.unwrap();

        assert_eq!(report.exit, TaskExit::Cancelled);
        assert_eq!(report.counters.emit_errors, 10);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let task = SamplingTask::new(
            "never",
            Duration::from_secs(1),
            counting_source(),
            Arc::new(MemoryEmitter::new()),
        );
        let stats = task.stats();
        stats.mark_cancelled();

        let report = task.run(CancellationToken::new()).await;
        assert_eq!(report.exit, TaskExit::Cancelled);
        assert_eq!(report.counters.samples, 0);
    }
}
