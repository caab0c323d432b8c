//! Layer model: stored datasets, their purpose metadata, and bounding boxes.
//!
//! Layers are owned by the external layer store; this core only reads them
//! (plus retitling/removing impact layers that an analysis produced).

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::ids::LayerId;

/// Semantic role of a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerPurpose {
    Hazard,
    Exposure,
    Aggregation,
    Impact,
    #[default]
    Unset,
}

impl LayerPurpose {
    /// Map an ingestion keyword (`layer_purpose` in layer keywords) to a purpose.
    ///
    /// Summary layers produced by an analysis are impact layers as far as
    /// selection is concerned.
    pub fn from_keyword(keyword: &str) -> Self {
        match keyword.trim() {
            "hazard" => LayerPurpose::Hazard,
            "exposure" => LayerPurpose::Exposure,
            "aggregation" => LayerPurpose::Aggregation,
            "impact" | "impact_analysis" | "hazard_aggregation_summary" => LayerPurpose::Impact,
            _ => LayerPurpose::Unset,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LayerPurpose::Hazard => "hazard",
            LayerPurpose::Exposure => "exposure",
            LayerPurpose::Aggregation => "aggregation",
            LayerPurpose::Impact => "impact",
            LayerPurpose::Unset => "unset",
        }
    }
}

impl fmt::Display for LayerPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Purpose/category classification of a layer (one-to-one with the layer).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LayerMetadata {
    pub purpose: LayerPurpose,

    /// Free-form subtype scoped to the purpose ("flood", "population", ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl LayerMetadata {
    pub fn new(purpose: LayerPurpose, category: Option<&str>) -> Self {
        Self {
            purpose,
            category: category.map(str::to_string),
        }
    }

    /// Exact `(purpose, category)` match; a missing category only matches a missing category.
    pub fn matches(&self, purpose: LayerPurpose, category: Option<&str>) -> bool {
        self.purpose == purpose && self.category.as_deref() == category
    }
}

/// Axis-aligned bounding box `(x0, y0, x1, y1)`.
///
/// Stored layer boxes are not guaranteed to be ordered: some ingested layers
/// carry `y0 > y1`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl BBox {
    pub fn new(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self { x0, y0, x1, y1 }
    }

    /// Swap each axis pair independently so that `x0 <= x1` and `y0 <= y1`.
    ///
    /// Values never move across axes: a caller that swapped the corners of
    /// one axis keeps the other axis untouched.
    pub fn normalized(self) -> Self {
        let (x0, x1) = if self.x1 < self.x0 {
            (self.x1, self.x0)
        } else {
            (self.x0, self.x1)
        };
        let (y0, y1) = if self.y1 < self.y0 {
            (self.y1, self.y0)
        } else {
            (self.y0, self.y1)
        };
        Self { x0, y0, x1, y1 }
    }

    pub fn is_y_inverted(&self) -> bool {
        self.y0 > self.y1
    }

    /// Overlap test of this (stored, possibly y-inverted) box against a
    /// normalized query box.
    ///
    /// Two branches: one for boxes whose y axis increases (`y0 <= y1`), one
    /// for boxes stored with an inverted y axis (`y1 <= y0`). The x axis must
    /// be ordered in both.
    pub fn intersects_query(&self, query: &BBox) -> bool {
        let x_overlaps = self.x0 <= self.x1 && self.x0 <= query.x1 && self.x1 >= query.x0;
        if !x_overlaps {
            return false;
        }

        let upright = self.y0 <= self.y1 && self.y0 <= query.y1 && self.y1 >= query.y0;
        let inverted = self.y1 <= self.y0 && self.y1 <= query.y1 && self.y0 >= query.y0;
        upright || inverted
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid bbox '{input}': {reason}")]
pub struct BBoxParseError {
    pub input: String,
    pub reason: String,
}

impl FromStr for BBox {
    type Err = BBoxParseError;

    /// Accepts `"[x0, y0, x1, y1]"` (JSON) or `"x0,y0,x1,y1"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fail = |reason: String| BBoxParseError {
            input: s.to_string(),
            reason,
        };

        let trimmed = s.trim();
        let values: Vec<f64> = if trimmed.starts_with('[') {
            serde_json::from_str(trimmed).map_err(|e| fail(e.to_string()))?
        } else {
            trimmed
                .split(',')
                .map(|part| part.trim().parse::<f64>())
                .collect::<Result<_, _>>()
                .map_err(|e| fail(e.to_string()))?
        };

        match values.as_slice() {
            [x0, y0, x1, y1] if values.iter().all(|v| v.is_finite()) => {
                Ok(BBox::new(*x0, *y0, *x1, *y1))
            }
            [_, _, _, _] => Err(fail("coordinates must be finite".to_string())),
            other => Err(fail(format!("expected 4 coordinates, got {}", other.len()))),
        }
    }
}

/// A stored layer as seen through the layer store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerRecord {
    pub id: LayerId,

    /// Internal (storage) name; raw file names are derived from it.
    pub name: String,

    /// Human display title.
    pub title: String,

    pub bbox: BBox,

    #[serde(default)]
    pub metadata: LayerMetadata,

    /// Raw files making up the layer (shapefile parts, rasters, summaries).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<PathBuf>,
}

impl LayerRecord {
    pub fn new(
        id: LayerId,
        name: impl Into<String>,
        title: impl Into<String>,
        bbox: BBox,
        metadata: LayerMetadata,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            title: title.into(),
            bbox,
            metadata,
            files: Vec::new(),
        }
    }

    pub fn with_files(mut self, files: Vec<PathBuf>) -> Self {
        self.files = files;
        self
    }
}
