//! Timing and isolation properties of the in-process scheduler.
//!
//! Every test runs on tokio's paused clock, so cadence arithmetic is exact.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use mission_scheduler::{
    Category, EmitError, Emitter, MemoryEmitter, SamplingTask, SensorSource, SharedWorkerGroup,
    SourceError, TaskExit, TaskState, TelemetryRecord, TelemetrySnapshot, TelemetryValue,
    WorkerGroup, source_fn,
};
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;

/// Source with a private counter and a tag naming its owner.
struct TaggedCounter {
    tag: String,
    count: u64,
}

impl TaggedCounter {
    fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            count: 0,
        }
    }
}

impl SensorSource for TaggedCounter {
    fn category(&self) -> Category {
        Category::Environment
    }

    fn sample(&mut self) -> Result<TelemetrySnapshot, SourceError> {
        self.count += 1;
        Ok(TelemetrySnapshot::new(Category::Environment)
            .with_metric("tag", self.tag.as_str())
            .with_metric("count", self.count))
    }
}

/// Memory sink that rejects the Nth write overall.
struct FailNth {
    inner: MemoryEmitter,
    calls: AtomicU64,
    fail_on: u64,
}

impl Emitter for FailNth {
    fn emit_record(&self, record: &TelemetryRecord) -> Result<(), EmitError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.fail_on {
            return Err(EmitError::Write(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "sink closed",
            )));
        }
        self.inner.emit_record(record)
    }
}

fn ticker(category: Category) -> impl SensorSource {
    source_fn(category, move || Ok(TelemetrySnapshot::new(category).with_metric("ok", true)))
}

#[tokio::test(start_paused = true)]
async fn test_three_cadences_cancelled_at_21s() {
    let emitter = Arc::new(MemoryEmitter::new());
    let mut group = SharedWorkerGroup::new("Threaded", emitter.clone())
        .with_task("every-5s", Duration::from_secs(5), ticker(Category::Environment))
        .with_task("every-10s", Duration::from_secs(10), ticker(Category::Load))
        .with_task("every-20s", Duration::from_secs(20), ticker(Category::Info));

    group.start().unwrap();
    sleep(Duration::from_secs(21)).await;
    group.cancel_all();
    let report = group.await_all().await;

    assert_eq!(report.task("every-5s").unwrap().counters.emitted, 4);
    assert_eq!(report.task("every-10s").unwrap().counters.emitted, 2);
    assert_eq!(report.task("every-20s").unwrap().counters.emitted, 1);
    assert_eq!(emitter.len(), 7);
    assert!(report.tasks.iter().all(|t| t.state == TaskState::Cancelled));
}

#[tokio::test(start_paused = true)]
async fn test_emission_count_tracks_duration() {
    for (cadence_ms, run_ms) in [(1000u64, 9_500u64), (250, 2_100), (3000, 2_000), (700, 7_000)] {
        let emitter = Arc::new(MemoryEmitter::new());
        let task = SamplingTask::new(
            "sensor",
            Duration::from_millis(cadence_ms),
            ticker(Category::Load),
            emitter.clone(),
        );
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(task.run(cancel.clone()));

        sleep(Duration::from_millis(run_ms)).await;
        cancel.cancel();
        let emitted = handle.await.unwrap().counters.emitted;

        let floor = run_ms / cadence_ms;
        assert!(
            emitted + 1 >= floor && emitted <= run_ms.div_ceil(cadence_ms) + 1,
            "cadence {cadence_ms}ms over {run_ms}ms emitted {emitted}"
        );
        if run_ms >= cadence_ms {
            assert!(emitted > 0);
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_failed_third_emission_is_followed_by_fourth() {
    let emitter = Arc::new(FailNth {
        inner: MemoryEmitter::new(),
        calls: AtomicU64::new(0),
        fail_on: 3,
    });
    let task = SamplingTask::new(
        "flaky",
        Duration::from_secs(1),
        TaggedCounter::new("flaky"),
        emitter.clone(),
    )
    .with_emit_failure_limit(3);
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(task.run(cancel.clone()));

    sleep(Duration::from_millis(4500)).await;
    cancel.cancel();
    let report = handle.await.unwrap();

    assert_eq!(report.counters.emit_errors, 1);
    assert_eq!(report.counters.emitted, 3);
    assert_eq!(report.exit, TaskExit::Cancelled);

    let counts: Vec<_> = emitter
        .inner
        .records()
        .iter()
        .map(|r| r.get("count").cloned())
        .collect();
    assert_eq!(
        counts,
        vec![
            Some(TelemetryValue::Counter(1)),
            Some(TelemetryValue::Counter(2)),
            Some(TelemetryValue::Counter(4)),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_cancel_returns_within_one_cadence() {
    let emitter = Arc::new(MemoryEmitter::new());
    let mut group = SharedWorkerGroup::new("Threaded", emitter)
        .with_task("fast", Duration::from_secs(5), ticker(Category::Environment))
        .with_task("slow", Duration::from_secs(60), ticker(Category::Load))
        .with_task("glacial", Duration::from_secs(3600), ticker(Category::Info));

    group.start().unwrap();
    sleep(Duration::from_secs(7)).await;

    let cancelled_at = Instant::now();
    group.cancel_all();
    let report = group.await_all().await;

    assert!(cancelled_at.elapsed() < Duration::from_secs(5));
    assert!(report.tasks.iter().all(|t| t.exit == TaskExit::Cancelled));
}

#[tokio::test(start_paused = true)]
async fn test_sources_never_see_each_other() {
    let emitter = Arc::new(MemoryEmitter::new());
    let tags = ["alpha", "bravo", "charlie", "delta"];

    let mut group = SharedWorkerGroup::new("Threaded", emitter.clone());
    for tag in tags {
        group.add_task(tag, Duration::from_millis(1), TaggedCounter::new(tag));
    }

    group.start().unwrap();
    sleep(Duration::from_micros(2_500_500)).await;
    group.cancel_all();
    group.await_all().await;

    let records = emitter.records();
    assert!(records.len() >= 10_000, "only {} samples", records.len());

    let mut last: HashMap<String, u64> = HashMap::new();
    for record in &records {
        assert_eq!(
            record.get("tag"),
            Some(&TelemetryValue::Text(record.source.clone()))
        );
        let Some(TelemetryValue::Counter(count)) = record.get("count") else {
            panic!("missing counter in {record:?}");
        };
        // Each source counts only its own samples, in order.
        let previous = last.insert(record.source.clone(), *count).unwrap_or(0);
        assert_eq!(*count, previous + 1);
    }
    assert_eq!(last.len(), tags.len());
}

#[tokio::test(start_paused = true)]
async fn test_cancelling_one_group_spares_another() {
    let emitter = Arc::new(MemoryEmitter::new());
    let mut first = SharedWorkerGroup::new("first", emitter.clone()).with_task(
        "a",
        Duration::from_secs(1),
        ticker(Category::Load),
    );
    let mut second = SharedWorkerGroup::new("second", emitter.clone()).with_task(
        "b",
        Duration::from_secs(1),
        ticker(Category::Load),
    );

    first.start().unwrap();
    second.start().unwrap();
    sleep(Duration::from_millis(2500)).await;

    first.cancel_all();
    let first_report = first.await_all().await;
    sleep(Duration::from_secs(3)).await;

    second.cancel_all();
    let second_report = second.await_all().await;

    assert_eq!(first_report.total_emitted(), 2);
    assert_eq!(second_report.total_emitted(), 5);
    assert_eq!(emitter.records_from("a").len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_source_error_recovers_next_iteration() {
    let emitter = Arc::new(MemoryEmitter::new());
    let mut calls = 0u64;
    let source = source_fn(Category::Environment, move || {
        calls += 1;
        if calls == 2 {
            return Err(SourceError::unavailable("sensor offline"));
        }
        Ok(TelemetrySnapshot::new(Category::Environment).with_metric("call", calls))
    });

    let mut group = SharedWorkerGroup::new("Threaded", emitter.clone())
        .with_task("env", Duration::from_secs(5), source);
    group.start().unwrap();
    sleep(Duration::from_secs(16)).await;
    group.cancel_all();
    let report = group.await_all().await;

    let task = report.task("env").unwrap();
    assert_eq!(task.counters.samples, 3);
    assert_eq!(task.counters.source_errors, 1);
    assert_eq!(task.counters.emitted, 2);
    assert_eq!(task.exit, TaskExit::Cancelled);
}

#[tokio::test(start_paused = true)]
async fn test_stats_are_observable_while_running() {
    let emitter = Arc::new(MemoryEmitter::new());
    let mut group = WorkerGroup::from(
        SharedWorkerGroup::new("Threaded", emitter.clone())
            .with_task("fast", Duration::from_secs(1), ticker(Category::Load))
            .with_task("slow", Duration::from_secs(4), ticker(Category::Info)),
    );

    let stats = group.task_stats();
    assert!(stats.iter().all(|s| s.state() == TaskState::Created));

    group.start().unwrap();
    sleep(Duration::from_millis(4500)).await;

    let live: HashMap<_, _> = stats
        .iter()
        .map(|s| (s.identity().to_string(), (s.state(), s.counters().emitted)))
        .collect();
    assert_eq!(live["fast"], (TaskState::Running, 4));
    assert_eq!(live["slow"], (TaskState::Running, 1));

    group.cancel_all();
    group.await_all().await;
    assert!(stats.iter().all(|s| s.state() == TaskState::Cancelled));
}
