//! ArtifactStore port - レポートファイルの保存先（Local / Blob）
//!
//! ArtifactStore は analysis が所有する PDF レポートを保存します。

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::domain::artifact::{ArtifactRef, ReportKind};
use crate::domain::errors::GeosafeError;
use crate::domain::ids::AnalysisId;

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("artifact not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("artifact i/o failed at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ArtifactError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            ArtifactError::NotFound(path)
        } else {
            ArtifactError::Io { path, source }
        }
    }
}

impl From<ArtifactError> for GeosafeError {
    fn from(err: ArtifactError) -> Self {
        match err {
            ArtifactError::NotFound(_) => GeosafeError::MissingArtifact(err.to_string()),
            ArtifactError::Io { .. } => GeosafeError::Storage(err.to_string()),
        }
    }
}

/// ArtifactStore はレポートを保存
///
/// # 設計原則
/// - `store` は常に新しい場所に書く（既存の artifact を上書きしない）
/// - 古い artifact の削除は呼び出し側が参照を差し替えた後に行う
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Copy `source` into the store as a report of `analysis`.
    async fn store(
        &self,
        analysis: &AnalysisId,
        kind: ReportKind,
        source: &Path,
    ) -> Result<ArtifactRef, ArtifactError>;

    async fn read(&self, artifact: &ArtifactRef) -> Result<Vec<u8>, ArtifactError>;

    async fn delete(&self, artifact: &ArtifactRef) -> Result<(), ArtifactError>;
}
