//! Isolated worker groups backed by real `sh` processes.
#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;

use mission_scheduler::{
    Category, IsolatedWorkerGroup, MemoryEmitter, Orchestrator, Stage, StopReason, TaskExit,
    TaskSpec, WorkerCommand,
};
use tokio::time::{Instant, sleep, timeout};

/// Prints one record every 100ms and ignores stdin.
const STUBBORN: &str = r#"while true; do
  printf '{"timestamp":0,"source":"%s","category":"%s","metrics":{"tick":1}}\n' "$2" "$4"
  sleep 0.1
done"#;

/// Prints one record every 100ms and exits once stdin is closed.
const COOPERATIVE: &str = r#"(while true; do
  printf '{"timestamp":0,"source":"%s","category":"%s","metrics":{"tick":1}}\n' "$2" "$4"
  sleep 0.1
done) &
loop=$!
cat > /dev/null
kill $loop
exit 0"#;

/// `sh -c SCRIPT worker --identity ID --category CAT --cadence-ms MS`
fn shell(script: &str) -> WorkerCommand {
    WorkerCommand::new("sh").arg("-c").arg(script).arg("worker")
}

fn spec(identity: &str, category: Category) -> TaskSpec {
    TaskSpec::new(identity, category, Duration::from_millis(100))
}

#[tokio::test]
async fn test_records_are_relayed_through_parent_emitter() {
    let emitter = Arc::new(MemoryEmitter::new());
    let mut group = IsolatedWorkerGroup::new("Process", shell(COOPERATIVE), emitter.clone())
        .with_task(spec("Process-1", Category::Info))
        .with_task(spec("Process-2", Category::Environment));

    group.start().unwrap();
    assert_eq!(group.pids().len(), 2);
    sleep(Duration::from_millis(600)).await;

    group.cancel_all();
    let report = timeout(Duration::from_secs(5), group.await_all())
        .await
        .unwrap();

    for identity in ["Process-1", "Process-2"] {
        let task = report.task(identity).unwrap();
        assert_eq!(task.exit, TaskExit::Cancelled, "{identity}");
        assert!(task.counters.emitted > 0, "{identity}");
        assert_eq!(task.counters.source_errors, 0);
    }

    let environment = emitter.records_from("Process-2");
    assert!(!environment.is_empty());
    assert!(environment.iter().all(|r| r.category == Category::Environment));
}

#[tokio::test]
async fn test_unresponsive_worker_is_killed_after_grace_period() {
    let emitter = Arc::new(MemoryEmitter::new());
    let mut group = IsolatedWorkerGroup::new("Process", shell(STUBBORN), emitter)
        .with_grace_period(Duration::from_millis(200))
        .with_task(spec("Process-1", Category::Load));

    group.start().unwrap();
    sleep(Duration::from_millis(300)).await;

    let cancelled_at = Instant::now();
    group.cancel_all();
    let report = timeout(Duration::from_secs(5), group.await_all())
        .await
        .unwrap();

    assert_eq!(report.tasks[0].exit, TaskExit::Killed);
    assert!(cancelled_at.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_survivors_keep_emitting_after_one_worker_is_killed() {
    let emitter = Arc::new(MemoryEmitter::new());
    let mut group = IsolatedWorkerGroup::new("Process", shell(STUBBORN), emitter.clone())
        .with_grace_period(Duration::from_millis(200))
        .with_task(spec("Process-1", Category::Info))
        .with_task(spec("Process-2", Category::Load))
        .with_task(spec("Process-3", Category::Environment));

    group.start().unwrap();
    sleep(Duration::from_millis(500)).await;

    assert!(group.terminate("Process-2"));
    assert!(!group.terminate("Process-9"));
    sleep(Duration::from_millis(300)).await;

    let before: Vec<usize> = ["Process-1", "Process-2", "Process-3"]
        .iter()
        .map(|id| emitter.records_from(id).len())
        .collect();
    sleep(Duration::from_millis(600)).await;
    let after: Vec<usize> = ["Process-1", "Process-2", "Process-3"]
        .iter()
        .map(|id| emitter.records_from(id).len())
        .collect();

    assert!(after[0] > before[0]);
    assert_eq!(after[1], before[1]);
    assert!(after[2] > before[2]);

    group.cancel_all();
    let report = timeout(Duration::from_secs(5), group.await_all())
        .await
        .unwrap();
    assert_eq!(report.task("Process-2").unwrap().exit, TaskExit::Killed);
}

#[tokio::test]
async fn test_malformed_lines_are_skipped() {
    let script = r#"echo 'not a record'
printf '{"timestamp":0,"source":"%s","category":"load","metrics":{"cpu":12.5}}\n' "$2"
cat > /dev/null"#;

    let emitter = Arc::new(MemoryEmitter::new());
    let mut group = IsolatedWorkerGroup::new("Process", shell(script), emitter.clone())
        .with_task(spec("Process-1", Category::Load));

    group.start().unwrap();
    sleep(Duration::from_millis(500)).await;
    group.cancel_all();
    let report = timeout(Duration::from_secs(5), group.await_all())
        .await
        .unwrap();

    let task = &report.tasks[0];
    assert_eq!(task.counters.source_errors, 1);
    assert_eq!(task.counters.emitted, 1);
    assert_eq!(task.exit, TaskExit::Cancelled);
    assert_eq!(emitter.records_from("Process-1").len(), 1);
}

#[tokio::test]
async fn test_worker_exiting_on_its_own_is_reported() {
    let script = r#"printf '{"timestamp":0,"source":"%s","category":"info","metrics":{"os":"test"}}\n' "$2"
exit 3"#;

    let emitter = Arc::new(MemoryEmitter::new());
    let mut group = IsolatedWorkerGroup::new("Process", shell(script), emitter.clone())
        .with_task(spec("Process-1", Category::Info));

    group.start().unwrap();
    timeout(Duration::from_secs(5), group.finished())
        .await
        .unwrap();
    let report = group.await_all().await;

    let task = &report.tasks[0];
    assert_eq!(task.exit, TaskExit::ProcessExited { code: Some(3) });
    assert_eq!(task.counters.emitted, 1);
}

#[tokio::test]
async fn test_kill_all_skips_the_grace_period() {
    let emitter = Arc::new(MemoryEmitter::new());
    let mut group = IsolatedWorkerGroup::new("Process", shell(STUBBORN), emitter)
        .with_grace_period(Duration::from_secs(30))
        .with_task(spec("Process-1", Category::Info))
        .with_task(spec("Process-2", Category::Load));

    group.start().unwrap();
    sleep(Duration::from_millis(300)).await;

    let stopped_at = Instant::now();
    group.cancel_all();
    group.kill_all();
    let report = timeout(Duration::from_secs(5), group.await_all())
        .await
        .unwrap();

    assert!(report.tasks.iter().all(|t| t.exit == TaskExit::Killed));
    assert!(stopped_at.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_second_interrupt_kills_a_stopping_stage() {
    let emitter = Arc::new(MemoryEmitter::new());
    let group = IsolatedWorkerGroup::new("Process", shell(STUBBORN), emitter)
        .with_grace_period(Duration::from_secs(30))
        .with_task(spec("Process-1", Category::Environment));

    let orchestrator = Orchestrator::new();
    let interrupt = orchestrator.interrupt_handle();
    tokio::spawn(async move {
        sleep(Duration::from_millis(300)).await;
        interrupt.interrupt();
        sleep(Duration::from_millis(300)).await;
        interrupt.interrupt();
    });

    let started = Instant::now();
    let report = timeout(
        Duration::from_secs(10),
        orchestrator.run_sequence(vec![Stage::new(group)]),
    )
    .await
    .unwrap()
    .unwrap();

    let stage = report.stage("Process").unwrap();
    assert_eq!(stage.stop(), Some(StopReason::Interrupted));
    assert_eq!(stage.report().unwrap().tasks[0].exit, TaskExit::Killed);
    assert!(started.elapsed() < Duration::from_secs(10));
}
