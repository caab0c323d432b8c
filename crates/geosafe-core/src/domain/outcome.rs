//! Outcome model: the payload a finished broker job carries.
//!
//! This module does not assume any particular broker. It only defines the
//! "shape" of results that the lifecycle records and explains later.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::ids::LayerId;
use super::state::TaskState;

/// What a successful impact computation produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOutput {
    pub impact_layer_id: LayerId,

    /// Freshly generated report files, not yet owned by the artifact store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_map: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_table: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl JobOutput {
    pub fn new(impact_layer_id: LayerId) -> Self {
        Self {
            impact_layer_id,
            report_map: None,
            report_table: None,
            summary: None,
        }
    }

    pub fn with_reports(mut self, map: impl Into<PathBuf>, table: impl Into<PathBuf>) -> Self {
        self.report_map = Some(map.into());
        self.report_table = Some(table.into());
        self
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }
}

/// Error payload of a failed computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureInfo {
    pub message: String,

    /// Class of the remote exception (`WorkerLostError`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception_class: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
}

impl FailureInfo {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            exception_class: None,
            traceback: None,
        }
    }

    pub fn with_exception_class(mut self, class: impl Into<String>) -> Self {
        self.exception_class = Some(class.into());
        self
    }

    pub fn with_traceback(mut self, traceback: impl Into<String>) -> Self {
        self.traceback = Some(traceback.into());
        self
    }

    /// Text stored as the audit failure trace.
    pub fn trace(&self) -> String {
        match (&self.exception_class, &self.traceback) {
            (Some(class), Some(tb)) => format!("{class}: {}\n{tb}", self.message),
            (Some(class), None) => format!("{class}: {}", self.message),
            (None, Some(tb)) => format!("{}\n{tb}", self.message),
            (None, None) => self.message.clone(),
        }
    }
}

/// Terminal result of one broker job.
///
/// Serialized with an explicit `status` tag: SUCCESS / FAILURE.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobOutcome {
    Success(JobOutput),
    Failure(FailureInfo),
}

impl JobOutcome {
    pub fn state(&self) -> TaskState {
        match self {
            JobOutcome::Success(_) => TaskState::Success,
            JobOutcome::Failure(_) => TaskState::Failure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_is_tagged_by_status() {
        let o = JobOutcome::Failure(FailureInfo::new("worker died").with_exception_class("WorkerLostError"));
        let v = serde_json::to_value(&o).unwrap();
        assert_eq!(v["status"], "FAILURE");
        assert_eq!(v["exception_class"], "WorkerLostError");
    }

    #[test]
    fn trace_includes_class_and_traceback() {
        let f = FailureInfo::new("boom")
            .with_exception_class("ValueError")
            .with_traceback("line 1");
        assert_eq!(f.trace(), "ValueError: boom\nline 1");
        assert_eq!(FailureInfo::new("plain").trace(), "plain");
    }

    #[test]
    fn success_output_state() {
        let out = JobOutput::new(LayerId::random()).with_reports("/tmp/m.pdf", "/tmp/t.pdf");
        assert_eq!(JobOutcome::Success(out).state(), TaskState::Success);
    }
}
