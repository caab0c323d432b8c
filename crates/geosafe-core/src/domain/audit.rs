//! Audit trail: one record per submission attempt of an analysis.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{AnalysisId, AttemptId};

/// A single submission attempt.
///
/// Created open (`finished = false`) at submission, closed exactly once when
/// that attempt completes. A later attempt never touches an earlier record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub attempt_id: AttemptId,
    pub analysis_id: AnalysisId,

    /// Generation of the analysis this attempt belongs to.
    pub generation: u32,

    pub finished: bool,
    pub start_time: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_summary: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_trace: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception_class: Option<String>,
}

impl AuditRecord {
    pub fn open(
        attempt_id: AttemptId,
        analysis_id: AnalysisId,
        generation: u32,
        start_time: DateTime<Utc>,
    ) -> Self {
        Self {
            attempt_id,
            analysis_id,
            generation,
            finished: false,
            start_time,
            end_time: None,
            result_summary: None,
            failure_trace: None,
            exception_class: None,
        }
    }

    pub fn close_success(&mut self, summary: Option<String>, now: DateTime<Utc>) {
        self.finished = true;
        self.end_time = Some(now);
        self.result_summary = summary;
    }

    pub fn close_failure(&mut self, trace: String, exception_class: Option<String>, now: DateTime<Utc>) {
        self.finished = true;
        self.end_time = Some(now);
        self.failure_trace = Some(trace);
        self.exception_class = exception_class;
    }

    pub fn is_open(&self) -> bool {
        !self.finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_then_close_failure() {
        let now = Utc::now();
        let mut a = AuditRecord::open(AttemptId::random(), AnalysisId::random(), 0, now);
        assert!(a.is_open());
        assert!(a.end_time.is_none());

        a.close_failure("boom".into(), Some("WorkerLostError".into()), now);
        assert!(a.finished);
        assert_eq!(a.end_time, Some(now));
        assert_eq!(a.failure_trace.as_deref(), Some("boom"));
        assert!(a.result_summary.is_none());
    }
}
