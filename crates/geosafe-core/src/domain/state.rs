//! Task state of an analysis as reported by the broker, and the
//! reconciliation rule against the persisted (cached) value.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Broker-level state of an analysis job.
///
/// State transitions:
/// - Unsubmitted -> Pending -> Running -> Success
/// - Unsubmitted -> Pending -> Running -> Failure
/// - any -> Unsubmitted (explicit rerun only)
///
/// Serialized as SCREAMING_SNAKE_CASE to match the broker vocabulary
/// (PENDING / RUNNING / SUCCESS / FAILURE).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    /// Record exists, nothing handed to the broker yet.
    #[default]
    Unsubmitted,

    /// Queued in the broker, or the broker no longer remembers the job.
    Pending,

    Running,

    Success,

    Failure,
}

impl TaskState {
    /// Is this a terminal state (no further transitions without rerun)?
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Success | TaskState::Failure)
    }

    /// Fold a broker observation into the last durable value.
    ///
    /// The broker drops job metadata after its retention window and then
    /// reports `Pending` for everything, so `Pending` never overrides the
    /// cache (neither does `Unsubmitted`, which no broker reports). A terminal
    /// cached value is final until a rerun resets it.
    pub fn reconcile(observed: TaskState, cached: TaskState) -> TaskState {
        let uninformative = matches!(observed, TaskState::Pending | TaskState::Unsubmitted);
        if uninformative || cached.is_terminal() {
            cached
        } else {
            observed
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Unsubmitted => "UNSUBMITTED",
            TaskState::Pending => "PENDING",
            TaskState::Running => "RUNNING",
            TaskState::Success => "SUCCESS",
            TaskState::Failure => "FAILURE",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
