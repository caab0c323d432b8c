//! Status - analysis の状態表示
//!
//! 画面向けのラベル（success / danger / info）を状態から決める。

use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::app::lifecycle::JobLifecycleManager;
use crate::domain::analysis::AnalysisRecord;
use crate::domain::errors::GeosafeError;
use crate::domain::ids::{AnalysisId, LayerId};
use crate::domain::state::TaskState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusLabel {
    Success,
    Danger,
    Info,
}

impl StatusLabel {
    pub fn for_state(state: TaskState) -> Self {
        match state {
            TaskState::Success => StatusLabel::Success,
            TaskState::Failure => StatusLabel::Danger,
            _ => StatusLabel::Info,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StatusLabel::Success => "success",
            StatusLabel::Danger => "danger",
            StatusLabel::Info => "info",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisStatus {
    pub analysis_id: AnalysisId,
    pub impact_layer_id: Option<LayerId>,
    pub state: TaskState,
    pub label: StatusLabel,
}

impl From<&AnalysisRecord> for AnalysisStatus {
    fn from(record: &AnalysisRecord) -> Self {
        Self {
            analysis_id: record.id,
            impact_layer_id: record.impact_layer_id,
            state: record.cached_state,
            label: StatusLabel::for_state(record.cached_state),
        }
    }
}

impl JobLifecycleManager {
    /// Observe the analysis and report its status view.
    #[instrument(skip(self))]
    pub async fn status(&self, id: AnalysisId) -> Result<AnalysisStatus, GeosafeError> {
        self.observe_state(id).await?;
        let record = self.get(id).await?;
        Ok(AnalysisStatus::from(&record))
    }
}
