use serde::{Deserialize, Serialize};

use crate::domain::analysis::AnalysisRecord;
use crate::domain::state::TaskState;

/// Number of analyses per cached state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisCounts {
    pub unsubmitted: usize,
    pub pending: usize,
    pub running: usize,
    pub success: usize,
    pub failure: usize,
    pub kept: usize,
}

impl AnalysisCounts {
    pub fn tally<'a>(records: impl IntoIterator<Item = &'a AnalysisRecord>) -> Self {
        let mut counts = Self::default();
        for record in records {
            match record.cached_state {
                TaskState::Unsubmitted => counts.unsubmitted += 1,
                TaskState::Pending => counts.pending += 1,
                TaskState::Running => counts.running += 1,
                TaskState::Success => counts.success += 1,
                TaskState::Failure => counts.failure += 1,
            }
            if record.keep {
                counts.kept += 1;
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.unsubmitted + self.pending + self.running + self.success + self.failure
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::analysis::{AnalysisRequest, Owner};
    use crate::domain::ids::{AnalysisId, LayerId};
    use chrono::Utc;

    fn record(state: TaskState, keep: bool) -> AnalysisRecord {
        let request = AnalysisRequest::new(LayerId::random(), LayerId::random(), "f").keep(keep);
        let mut record = AnalysisRecord::new(
            AnalysisId::random(),
            request,
            "t".into(),
            Owner::resolve(None, "AnonymousUser"),
            "en".into(),
            Utc::now(),
        );
        record.cached_state = state;
        record
    }

    #[test]
    fn counts_by_cached_state() {
        let records = vec![
            record(TaskState::Success, true),
            record(TaskState::Success, false),
            record(TaskState::Failure, false),
            record(TaskState::Running, false),
        ];
        let counts = AnalysisCounts::tally(&records);

        assert_eq!(counts.success, 2);
        assert_eq!(counts.failure, 1);
        assert_eq!(counts.running, 1);
        assert_eq!(counts.kept, 1);
        assert_eq!(counts.total(), 4);
    }
}
