//! What is handed to the broker, and what the broker reports back.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::analysis::{AnalysisRecord, ExtentOption};
use super::ids::{AnalysisId, LayerId};
use super::layer::BBox;
use super::outcome::JobOutcome;
use super::state::TaskState;

/// Opaque broker reference to a submitted job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskHandle(String);

impl TaskHandle {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Job description sent to the broker on every submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub analysis_id: AnalysisId,
    pub generation: u32,

    pub hazard_layer_id: LayerId,
    pub exposure_layer_id: LayerId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregation_layer_id: Option<LayerId>,

    pub impact_function_id: String,
    pub extent_option: ExtentOption,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_extent: Option<BBox>,

    pub language_code: String,
}

impl JobSpec {
    pub fn for_analysis(analysis: &AnalysisRecord) -> Self {
        Self {
            analysis_id: analysis.id,
            generation: analysis.generation,
            hazard_layer_id: analysis.hazard_layer_id,
            exposure_layer_id: analysis.exposure_layer_id,
            aggregation_layer_id: analysis.aggregation_layer_id,
            impact_function_id: analysis.impact_function_id.clone(),
            extent_option: analysis.extent_option,
            user_extent: analysis.user_extent,
            language_code: analysis.language_code.clone(),
        }
    }
}

/// One poll result. `outcome` is only present for terminal states whose
/// payload the broker still retains.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerStatus {
    pub state: TaskState,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<JobOutcome>,
}

impl BrokerStatus {
    pub fn pending() -> Self {
        Self {
            state: TaskState::Pending,
            outcome: None,
        }
    }

    pub fn running() -> Self {
        Self {
            state: TaskState::Running,
            outcome: None,
        }
    }

    pub fn finished(outcome: JobOutcome) -> Self {
        Self {
            state: outcome.state(),
            outcome: Some(outcome),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::outcome::FailureInfo;

    #[test]
    fn handle_serializes_as_plain_string() {
        let h = TaskHandle::new("c0ffee");
        assert_eq!(serde_json::to_string(&h).unwrap(), "\"c0ffee\"");
        assert_eq!(h.to_string(), "c0ffee");
    }

    #[test]
    fn finished_status_takes_state_from_outcome() {
        let status = BrokerStatus::finished(JobOutcome::Failure(FailureInfo::new("boom")));
        assert_eq!(status.state, TaskState::Failure);
        assert!(status.outcome.is_some());
        assert_eq!(BrokerStatus::pending().state, TaskState::Pending);
    }
}
