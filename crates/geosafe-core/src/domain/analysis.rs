//! Analysis record and submission request.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::artifact::{ArtifactRef, ReportKind};
use super::ids::{AnalysisId, LayerId};
use super::job::TaskHandle;
use super::layer::{BBox, LayerRecord};
use super::state::TaskState;

/// Which geographic intersection defines the computed extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExtentOption {
    CurrentViewIntersection,
    #[default]
    HazardExposureIntersection,
    BboxIntersection,
}

impl ExtentOption {
    /// Numeric code understood by the impact computation service.
    pub fn code(self) -> u8 {
        match self {
            ExtentOption::CurrentViewIntersection => 1,
            ExtentOption::HazardExposureIntersection => 2,
            ExtentOption::BboxIntersection => 3,
        }
    }

    /// Whether the option needs a caller-supplied extent.
    pub fn requires_user_extent(self) -> bool {
        matches!(
            self,
            ExtentOption::CurrentViewIntersection | ExtentOption::BboxIntersection
        )
    }
}

/// Identity that submitted an analysis.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Owner(String);

impl Owner {
    /// Blank or absent users map to the well-known anonymous identity.
    pub fn resolve(user: Option<&str>, anonymous: &str) -> Self {
        match user.map(str::trim) {
            Some(name) if !name.is_empty() => Owner(name.to_string()),
            _ => Owner(anonymous.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// What a caller asks for when submitting an analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRequest {
    #[serde(default)]
    pub title: Option<String>,

    pub hazard_layer_id: LayerId,
    pub exposure_layer_id: LayerId,

    #[serde(default)]
    pub aggregation_layer_id: Option<LayerId>,

    pub impact_function_id: String,

    #[serde(default)]
    pub extent_option: ExtentOption,

    /// Required by `BboxIntersection` and `CurrentViewIntersection`.
    #[serde(default)]
    pub user_extent: Option<BBox>,

    #[serde(default)]
    pub keep: bool,

    #[serde(default)]
    pub owner: Option<String>,

    #[serde(default)]
    pub language_code: Option<String>,
}

impl AnalysisRequest {
    pub fn new(
        hazard_layer_id: LayerId,
        exposure_layer_id: LayerId,
        impact_function_id: impl Into<String>,
    ) -> Self {
        Self {
            title: None,
            hazard_layer_id,
            exposure_layer_id,
            aggregation_layer_id: None,
            impact_function_id: impact_function_id.into(),
            extent_option: ExtentOption::default(),
            user_extent: None,
            keep: false,
            owner: None,
            language_code: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_aggregation(mut self, layer_id: LayerId) -> Self {
        self.aggregation_layer_id = Some(layer_id);
        self
    }

    pub fn with_extent(mut self, option: ExtentOption, user_extent: Option<BBox>) -> Self {
        self.extent_option = option;
        self.user_extent = user_extent;
        self
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn keep(mut self, keep: bool) -> Self {
        self.keep = keep;
        self
    }
}

/// Title used when the caller did not name the analysis.
pub fn default_title(
    hazard: &LayerRecord,
    exposure: &LayerRecord,
    aggregation: Option<&LayerRecord>,
) -> String {
    match aggregation {
        Some(agg) => format!("{} on {} around {}", hazard.title, exposure.title, agg.title),
        None => format!("{} on {}", hazard.title, exposure.title),
    }
}

/// The persisted analysis job record.
///
/// Design: state transitions via methods; `cached_state` is the durable
/// copy of the broker state (the broker forgets finished jobs).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub id: AnalysisId,
    pub title: String,

    pub hazard_layer_id: LayerId,
    pub exposure_layer_id: LayerId,
    pub aggregation_layer_id: Option<LayerId>,
    pub impact_function_id: String,
    pub extent_option: ExtentOption,
    pub user_extent: Option<BBox>,
    pub language_code: String,

    /// Populated on success.
    pub impact_layer_id: Option<LayerId>,

    /// Set exactly when the analysis has been handed to the broker.
    pub task_handle: Option<TaskHandle>,

    /// Incremented on every submission; completions for older generations are stale.
    pub generation: u32,

    pub cached_state: TaskState,

    /// If false the analysis and its artifacts are eligible for purge.
    pub keep: bool,

    pub owner: Owner,

    pub report_map: Option<ArtifactRef>,
    pub report_table: Option<ArtifactRef>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AnalysisRecord {
    pub fn new(
        id: AnalysisId,
        request: AnalysisRequest,
        title: String,
        owner: Owner,
        language_code: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            title,
            hazard_layer_id: request.hazard_layer_id,
            exposure_layer_id: request.exposure_layer_id,
            aggregation_layer_id: request.aggregation_layer_id,
            impact_function_id: request.impact_function_id,
            extent_option: request.extent_option,
            user_extent: request.user_extent,
            language_code,
            impact_layer_id: None,
            task_handle: None,
            generation: 0,
            cached_state: TaskState::Unsubmitted,
            keep: request.keep,
            owner,
            report_map: None,
            report_table: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_submitted(&self) -> bool {
        self.task_handle.is_some()
    }

    /// Record a broker submission and move to `Pending`.
    pub fn mark_submitted(&mut self, handle: TaskHandle, now: DateTime<Utc>) {
        self.task_handle = Some(handle);
        self.cached_state = TaskState::Pending;
        self.updated_at = now;
    }

    /// Start a new generation: forget the broker job, reset to `Unsubmitted`.
    /// Returns the superseded handle. Artifacts are left untouched.
    pub fn reset_for_rerun(&mut self, now: DateTime<Utc>) -> Option<TaskHandle> {
        self.generation += 1;
        self.cached_state = TaskState::Unsubmitted;
        self.updated_at = now;
        self.task_handle.take()
    }

    /// Apply a broker observation; returns true when the cached state changed.
    pub fn observe(&mut self, observed: TaskState, now: DateTime<Utc>) -> bool {
        let next = TaskState::reconcile(observed, self.cached_state);
        if next == self.cached_state {
            return false;
        }
        self.cached_state = next;
        self.updated_at = now;
        true
    }

    /// Force a terminal state (completion handling).
    pub fn finish(&mut self, state: TaskState, now: DateTime<Utc>) {
        debug_assert!(state.is_terminal());
        self.cached_state = state;
        self.updated_at = now;
    }

    pub fn report(&self, kind: ReportKind) -> Option<&ArtifactRef> {
        match kind {
            ReportKind::Map => self.report_map.as_ref(),
            ReportKind::Table => self.report_table.as_ref(),
        }
    }

    /// Replace a report slot, returning whatever it held before.
    pub fn replace_report(&mut self, kind: ReportKind, artifact: Option<ArtifactRef>) -> Option<ArtifactRef> {
        let slot = match kind {
            ReportKind::Map => &mut self.report_map,
            ReportKind::Table => &mut self.report_table,
        };
        std::mem::replace(slot, artifact)
    }

    pub fn handle_matches(&self, handle: &TaskHandle) -> bool {
        self.task_handle.as_ref() == Some(handle)
    }
}
