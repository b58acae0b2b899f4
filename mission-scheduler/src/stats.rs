//! Task lifecycle and counters.

use std::sync::atomic::{AtomicU8, AtomicU32, AtomicU64, Ordering};

use mission_common::Category;
use serde::{Deserialize, Serialize};

use crate::group::GroupMode;

/// Lifecycle state of a sampling task.
///
/// `Created -> Running -> Cancelled`; `Cancelled` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Created,
    Running,
    Cancelled,
}

impl TaskState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => TaskState::Created,
            1 => TaskState::Running,
            _ => TaskState::Cancelled,
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskState::Created => write!(f, "created"),
            TaskState::Running => write!(f, "running"),
            TaskState::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Live counters for one task, shared between the task and its group.
#[derive(Debug)]
pub struct TaskStats {
    identity: String,
    category: Category,
    state: AtomicU8,
    samples: AtomicU64,
    emitted: AtomicU64,
    source_errors: AtomicU64,
    emit_errors: AtomicU64,
    consecutive_emit_failures: AtomicU32,
}

impl TaskStats {
    pub fn new(identity: impl Into<String>, category: Category) -> Self {
        Self {
            identity: identity.into(),
            category,
            state: AtomicU8::new(TaskState::Created as u8),
            samples: AtomicU64::new(0),
            emitted: AtomicU64::new(0),
            source_errors: AtomicU64::new(0),
            emit_errors: AtomicU64::new(0),
            consecutive_emit_failures: AtomicU32::new(0),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move `Created -> Running`. Returns false if the task already left `Created`.
    pub fn mark_running(&self) -> bool {
        self.state
            .compare_exchange(
                TaskState::Created as u8,
                TaskState::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Move to the terminal `Cancelled` state.
    pub fn mark_cancelled(&self) {
        self.state
            .store(TaskState::Cancelled as u8, Ordering::Release);
    }

    pub fn record_sample(&self) {
        self.samples.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_source_error(&self) {
        self.source_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_emitted(&self) {
        self.emitted.fetch_add(1, Ordering::Relaxed);
        self.consecutive_emit_failures.store(0, Ordering::Relaxed);
    }

    /// Count a failed emission and return the current run of consecutive failures.
    pub fn record_emit_error(&self) -> u32 {
        self.emit_errors.fetch_add(1, Ordering::Relaxed);
        self.consecutive_emit_failures
            .fetch_add(1, Ordering::Relaxed)
            .saturating_add(1)
    }

    /// Point-in-time copy of the counters.
    pub fn counters(&self) -> TaskCounters {
        TaskCounters {
            samples: self.samples.load(Ordering::Relaxed),
            emitted: self.emitted.load(Ordering::Relaxed),
            source_errors: self.source_errors.load(Ordering::Relaxed),
            emit_errors: self.emit_errors.load(Ordering::Relaxed),
        }
    }

    /// Build the final report for this task.
    pub fn report(&self, exit: TaskExit) -> TaskReport {
        TaskReport {
            identity: self.identity.clone(),
            category: self.category,
            state: self.state(),
            counters: self.counters(),
            exit,
        }
    }
}

/// Counter values for one task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCounters {
    /// Sampling attempts (successful or not).
    pub samples: u64,
    /// Records written to the sink.
    pub emitted: u64,
    /// Failed sampling attempts (or malformed records from a worker process).
    pub source_errors: u64,
    /// Failed sink writes.
    pub emit_errors: u64,
}

/// Why a task stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum TaskExit {
    /// Cancelled through its token.
    Cancelled,
    /// Stopped itself after too many consecutive sink failures.
    EmitFailures { consecutive: u32 },
    /// The task panicked; siblings were unaffected.
    Panicked { message: String },
    /// The worker process exited without being asked to.
    ProcessExited { code: Option<i32> },
    /// The worker process was forcibly terminated.
    Killed,
}

/// Final report for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskReport {
    pub identity: String,
    pub category: Category,
    pub state: TaskState,
    pub counters: TaskCounters,
    pub exit: TaskExit,
}

/// Reports for every task of a group, in task order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupReport {
    pub group: String,
    pub mode: GroupMode,
    pub tasks: Vec<TaskReport>,
}

impl GroupReport {
    /// Find a task report by identity.
    pub fn task(&self, identity: &str) -> Option<&TaskReport> {
        self.tasks.iter().find(|t| t.identity == identity)
    }

    /// Find the first task report for a category.
    pub fn task_for(&self, category: Category) -> Option<&TaskReport> {
        self.tasks.iter().find(|t| t.category == category)
    }

    /// Records emitted by all tasks.
    pub fn total_emitted(&self) -> u64 {
        self.tasks.iter().map(|t| t.counters.emitted).sum()
    }
}
