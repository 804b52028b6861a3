//! Task states and their classification.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The closed set of states a task moves through.
///
/// QUEUED and TERMINATING are Hermit-local; the rest mirror what the
/// cluster master reports in status updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Queued,
    Staging,
    Starting,
    Running,
    Finished,
    Failed,
    Killed,
    Lost,
    Error,
    Terminating,
}

impl TaskState {
    /// Whether this state is terminal. A task whose current state is
    /// terminal never transitions again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Finished | TaskState::Failed | TaskState::Killed | TaskState::Lost
        )
    }

    /// Whether a task in this state is waiting in the queue.
    pub fn is_waiting(self) -> bool {
        self == TaskState::Queued
    }

    /// The wire name of the state, as it appears in store documents and
    /// callback bodies.
    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Queued => "QUEUED",
            TaskState::Staging => "STAGING",
            TaskState::Starting => "STARTING",
            TaskState::Running => "RUNNING",
            TaskState::Finished => "FINISHED",
            TaskState::Failed => "FAILED",
            TaskState::Killed => "KILLED",
            TaskState::Lost => "LOST",
            TaskState::Error => "ERROR",
            TaskState::Terminating => "TERMINATING",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
