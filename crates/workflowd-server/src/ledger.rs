// ABOUTME: Per-connection task ledger correlating status updates to issued commands.
// ABOUTME: Enforces PENDING -> RUNNING* -> terminal and flags everything else as a violation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use workflowd_proto::task_status::State;

/// Where one task is in its lifecycle, as seen by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskProgress {
    /// Command written to the stream, no status yet.
    Issued,
    Pending,
    Running,
    Finished(State),
}

impl TaskProgress {
    fn rank(self) -> u8 {
        match self {
            TaskProgress::Issued => 0,
            TaskProgress::Pending => 1,
            TaskProgress::Running => 2,
            TaskProgress::Finished(_) => 3,
        }
    }

    fn from_state(state: State) -> Self {
        match state {
            State::Pending => TaskProgress::Pending,
            State::Running => TaskProgress::Running,
            State::Completed | State::Failed => TaskProgress::Finished(state),
        }
    }
}

/// Result of checking one status against the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// Valid transition. `terminal` is set when the task just finished.
    Accepted { terminal: bool },
    /// Status for a task this connection never issued.
    UnknownTask,
    /// Status for a task that already reached COMPLETED or FAILED.
    AfterTerminal,
    /// Status that moves a task backwards (e.g. PENDING after RUNNING).
    OutOfOrder { current: TaskProgress },
}

impl Observation {
    pub fn is_violation(&self) -> bool {
        !matches!(self, Observation::Accepted { .. })
    }
}

/// Lifecycle state of every task issued on one connection.
///
/// Finished tasks stay in the map so late statuses for them are still caught
/// as `AfterTerminal`. The ledger is dropped with its connection.
#[derive(Debug, Default)]
pub struct TaskLedger {
    tasks: HashMap<String, TaskProgress>,
}

/// The ledger is shared by the sender loop (issue) and the receiver loop (observe).
pub type SharedLedger = Arc<Mutex<TaskLedger>>;

pub fn shared_ledger() -> SharedLedger {
    Arc::new(Mutex::new(TaskLedger::default()))
}

pub fn lock(ledger: &SharedLedger) -> MutexGuard<'_, TaskLedger> {
    ledger.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl TaskLedger {
    /// Record a task id as issued. Re-issuing a known id keeps its progress.
    pub fn issue(&mut self, task_id: impl Into<String>) {
        self.tasks.entry(task_id.into()).or_insert(TaskProgress::Issued);
    }

    /// Apply a status to the ledger. Violations leave the ledger unchanged.
    pub fn observe(&mut self, task_id: &str, state: State) -> Observation {
        let Some(current) = self.tasks.get_mut(task_id) else {
            return Observation::UnknownTask;
        };
        if matches!(current, TaskProgress::Finished(_)) {
            return Observation::AfterTerminal;
        }

        let next = TaskProgress::from_state(state);
        let repeat_running = *current == TaskProgress::Running && next == TaskProgress::Running;
        if next.rank() <= current.rank() && !repeat_running {
            return Observation::OutOfOrder { current: *current };
        }

        *current = next;
        Observation::Accepted {
            terminal: state.is_terminal(),
        }
    }

    pub fn progress(&self, task_id: &str) -> Option<TaskProgress> {
        self.tasks.get(task_id).copied()
    }

    pub fn is_finished(&self, task_id: &str) -> bool {
        matches!(self.progress(task_id), Some(TaskProgress::Finished(_)))
    }

    /// Issued tasks that have not reached a terminal state.
    pub fn outstanding(&self) -> usize {
        self.tasks
            .values()
            .filter(|p| !matches!(p, TaskProgress::Finished(_)))
            .count()
    }
}
