//! Worker groups: a set of sampling tasks under one isolation model.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::SpawnError;
use crate::isolated::IsolatedWorkerGroup;
use crate::shared::SharedWorkerGroup;
use crate::stats::{GroupReport, TaskStats};

/// Isolation model of a worker group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupMode {
    /// Tasks share one address space; each still owns its own source.
    Shared,
    /// One OS process per task; nothing is shared.
    Isolated,
}

impl GroupMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupMode::Shared => "shared",
            GroupMode::Isolated => "isolated",
        }
    }
}

impl std::fmt::Display for GroupMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Either kind of worker group, behind one lifecycle:
/// `start` spawns, `cancel_all` stops, `await_all` joins.
pub enum WorkerGroup {
    Shared(SharedWorkerGroup),
    Isolated(IsolatedWorkerGroup),
}

impl WorkerGroup {
    pub fn name(&self) -> &str {
        match self {
            WorkerGroup::Shared(g) => g.name(),
            WorkerGroup::Isolated(g) => g.name(),
        }
    }

    pub fn mode(&self) -> GroupMode {
        match self {
            WorkerGroup::Shared(_) => GroupMode::Shared,
            WorkerGroup::Isolated(_) => GroupMode::Isolated,
        }
    }

    pub fn task_count(&self) -> usize {
        match self {
            WorkerGroup::Shared(g) => g.task_count(),
            WorkerGroup::Isolated(g) => g.task_count(),
        }
    }

    pub fn task_stats(&self) -> Vec<Arc<TaskStats>> {
        match self {
            WorkerGroup::Shared(g) => g.task_stats(),
            WorkerGroup::Isolated(g) => g.task_stats(),
        }
    }

    /// Spawn every task (idempotent).
    pub fn start(&mut self) -> Result<(), SpawnError> {
        match self {
            WorkerGroup::Shared(g) => g.start(),
            WorkerGroup::Isolated(g) => g.start(),
        }
    }

    /// Cancel every task of this group and no other.
    pub fn cancel_all(&self) {
        match self {
            WorkerGroup::Shared(g) => g.cancel_all(),
            WorkerGroup::Isolated(g) => g.cancel_all(),
        }
    }

    /// Stop every task without waiting for a cooperative exit.
    ///
    /// In-process tasks already stop at once on cancel; worker processes are killed.
    pub fn kill_all(&self) {
        match self {
            WorkerGroup::Shared(g) => g.cancel_all(),
            WorkerGroup::Isolated(g) => g.kill_all(),
        }
    }

    /// Resolves when every started task has ended on its own or been cancelled.
    pub async fn finished(&self) {
        match self {
            WorkerGroup::Shared(g) => g.finished().await,
            WorkerGroup::Isolated(g) => g.finished().await,
        }
    }

    /// Join every task and collect the reports.
    pub async fn await_all(&mut self) -> GroupReport {
        match self {
            WorkerGroup::Shared(g) => g.await_all().await,
            WorkerGroup::Isolated(g) => g.await_all().await,
        }
    }
}

impl From<SharedWorkerGroup> for WorkerGroup {
    fn from(group: SharedWorkerGroup) -> Self {
        WorkerGroup::Shared(group)
    }
}

impl From<IsolatedWorkerGroup> for WorkerGroup {
    fn from(group: IsolatedWorkerGroup) -> Self {
        WorkerGroup::Isolated(group)
    }
}
