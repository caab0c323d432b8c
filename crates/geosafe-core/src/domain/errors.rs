//! Errors - エラー型と分類
//!
//! Every failure that crosses the core boundary is a [`GeosafeError`]; callers
//! that need a wire shape use [`GeosafeError::report`].

use serde::{Deserialize, Serialize};

use super::ids::{AnalysisId, LayerId};
use super::layer::LayerPurpose;

/// ErrorKind は実行エラーの運用分類
///
/// - Transient: 一時的なエラー（caller 側でリトライ推奨）
/// - Permanent: 恒久的なエラー（リトライ無意味）
/// - Infrastructure: インフラエラー（storage の障害）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transient,
    Permanent,
    Infrastructure,
}

#[derive(Debug, thiserror::Error)]
pub enum GeosafeError {
    #[error("layer {layer} has purpose '{actual}', expected '{expected}'")]
    InvalidLayerRole {
        layer: LayerId,
        expected: LayerPurpose,
        actual: LayerPurpose,
    },

    #[error("layer not found: {0}")]
    LayerNotFound(LayerId),

    #[error("analysis not found: {0}")]
    AnalysisNotFound(AnalysisId),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("task broker unavailable: {0}")]
    BrokerUnavailable(String),

    #[error("missing artifact: {0}")]
    MissingArtifact(String),

    #[error("artifact delete failed: {0}")]
    ArtifactDeleteFailed(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl GeosafeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GeosafeError::BrokerUnavailable(_) => ErrorKind::Transient,
            GeosafeError::Storage(_) | GeosafeError::ArtifactDeleteFailed(_) => {
                ErrorKind::Infrastructure
            }
            GeosafeError::InvalidLayerRole { .. }
            | GeosafeError::LayerNotFound(_)
            | GeosafeError::AnalysisNotFound(_)
            | GeosafeError::InvalidRequest(_)
            | GeosafeError::MissingArtifact(_) => ErrorKind::Permanent,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            GeosafeError::InvalidLayerRole { .. } => "invalid_layer_role",
            GeosafeError::LayerNotFound(_) => "layer_not_found",
            GeosafeError::AnalysisNotFound(_) => "analysis_not_found",
            GeosafeError::InvalidRequest(_) => "invalid_request",
            GeosafeError::BrokerUnavailable(_) => "broker_unavailable",
            GeosafeError::MissingArtifact(_) => "missing_artifact",
            GeosafeError::ArtifactDeleteFailed(_) => "artifact_delete_failed",
            GeosafeError::Storage(_) => "storage",
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            kind: self.kind(),
            code: self.code().to_string(),
            message: self.to_string(),
        }
    }
}

/// Structured, serializable failure for callers outside the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub code: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broker_errors_are_transient() {
        let err = GeosafeError::BrokerUnavailable("timed out after 30s".into());
        assert!(err.is_retryable());
        assert_eq!(err.kind(), ErrorKind::Transient);
    }

    #[test]
    fn role_mismatch_is_permanent_and_reported() {
        let err = GeosafeError::InvalidLayerRole {
            layer: LayerId::random(),
            expected: LayerPurpose::Exposure,
            actual: LayerPurpose::Hazard,
        };
        let report = err.report();
        assert_eq!(report.kind, ErrorKind::Permanent);
        assert_eq!(report.code, "invalid_layer_role");
        assert!(report.message.contains("expected 'exposure'"));

        let v = serde_json::to_value(&report).unwrap();
        assert_eq!(v["kind"], "permanent");
    }
}
