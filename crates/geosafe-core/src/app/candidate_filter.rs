//! SpatialCandidateFilter - 入力候補レイヤーの絞り込み
//!
//! `(purpose, category)` で候補を選び、任意の bbox と交差するものだけを残す。
//! 保存済みレイヤーの bbox は y 軸が反転していることがあるため、交差判定は
//! [`BBox::intersects_query`] の二分岐で行う。

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::domain::errors::GeosafeError;
use crate::domain::layer::{BBox, LayerPurpose, LayerRecord};
use crate::ports::LayerStore;

/// Categories offered per purpose in the options panel.
const HAZARD_CATEGORIES: &[&str] = &["flood", "tsunami", "earthquake", "volcano", "volcanic-ash"];
const EXPOSURE_CATEGORIES: &[&str] = &["population", "road", "structure"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub layers: Vec<LayerRecord>,

    /// True iff the bbox excluded at least one candidate.
    pub was_filtered: bool,
}

/// One category row of the options panel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryOption {
    pub category: Option<String>,
    pub layers: Vec<LayerRecord>,
    pub count: usize,
    pub filtered: bool,
}

/// All categories of one purpose.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanelSection {
    pub purpose: LayerPurpose,
    pub categories: Vec<CategoryOption>,

    /// True if any category of the section was filtered.
    pub filtered: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionsPanel {
    pub sections: Vec<PanelSection>,
}

impl OptionsPanel {
    pub fn section(&self, purpose: LayerPurpose) -> Option<&PanelSection> {
        self.sections.iter().find(|s| s.purpose == purpose)
    }
}

pub struct SpatialCandidateFilter {
    layers: Arc<dyn LayerStore>,
}

impl SpatialCandidateFilter {
    pub fn new(layers: Arc<dyn LayerStore>) -> Self {
        Self { layers }
    }

    /// Layers of `(purpose, category)`, optionally restricted to those whose
    /// stored bbox overlaps `bbox`. The query corners may come in any order.
    /// A blank category means uncategorized.
    #[instrument(skip(self))]
    pub async fn select(
        &self,
        purpose: LayerPurpose,
        category: Option<&str>,
        bbox: Option<BBox>,
    ) -> Result<Selection, GeosafeError> {
        let category = category.map(str::trim).filter(|c| !c.is_empty());
        let candidates = self.layers.layers_matching(purpose, category).await?;
        Ok(filter_layers(candidates, bbox))
    }

    /// Per-purpose, per-category candidate lists for the submission form.
    #[instrument(skip(self))]
    pub async fn options_panel(&self, bbox: Option<BBox>) -> Result<OptionsPanel, GeosafeError> {
        let all = self.layers.list_layers().await?;

        let groups: [(LayerPurpose, Vec<Option<&str>>); 3] = [
            (
                LayerPurpose::Hazard,
                HAZARD_CATEGORIES.iter().copied().map(Some).collect(),
            ),
            (
                LayerPurpose::Exposure,
                EXPOSURE_CATEGORIES.iter().copied().map(Some).collect(),
            ),
            (LayerPurpose::Impact, vec![None]),
        ];

        let sections = groups
            .into_iter()
            .map(|(purpose, categories)| {
                let categories: Vec<CategoryOption> = categories
                    .into_iter()
                    .map(|category| {
                        let candidates = all
                            .iter()
                            .filter(|l| l.metadata.matches(purpose, category))
                            .cloned()
                            .collect();
                        let selection = filter_layers(candidates, bbox);
                        CategoryOption {
                            category: category.map(str::to_string),
                            count: selection.layers.len(),
                            layers: selection.layers,
                            filtered: selection.was_filtered,
                        }
                    })
                    .collect();
                PanelSection {
                    purpose,
                    filtered: categories.iter().any(|c| c.filtered),
                    categories,
                }
            })
            .collect();

        Ok(OptionsPanel { sections })
    }
}

/// Pure part of [`SpatialCandidateFilter::select`].
pub fn filter_layers(candidates: Vec<LayerRecord>, bbox: Option<BBox>) -> Selection {
    let Some(bbox) = bbox else {
        return Selection {
            layers: candidates,
            was_filtered: false,
        };
    };

    let query = bbox.normalized();
    let total = candidates.len();
    let layers: Vec<LayerRecord> = candidates
        .into_iter()
        .filter(|layer| layer.bbox.intersects_query(&query))
        .collect();

    debug!(total, kept = layers.len(), "bbox filter applied");
    Selection {
        was_filtered: layers.len() < total,
        layers,
    }
}
