//! FsArtifactStore - ローカルファイルシステムのレポート保管
//!
//! レイアウト: `{root}/{analysis_id}/{kind}_{ulid}.{ext}`
//! 毎回新しいファイル名で書くので、差し替え中も古いレポートは残る。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use ulid::Ulid;

use crate::domain::artifact::{ArtifactRef, ReportKind};
use crate::domain::ids::AnalysisId;
use crate::ports::{ArtifactError, ArtifactStore};

#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn target_path(&self, analysis: &AnalysisId, kind: ReportKind, source: &Path) -> PathBuf {
        let ext = source
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("pdf");
        self.root
            .join(analysis.to_string())
            .join(format!("{}_{}.{ext}", kind.as_str(), Ulid::new()))
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn store(
        &self,
        analysis: &AnalysisId,
        kind: ReportKind,
        source: &Path,
    ) -> Result<ArtifactRef, ArtifactError> {
        let target = self.target_path(analysis, kind, source);
        if let Some(dir) = target.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| ArtifactError::io(dir, e))?;
        }

        // copy, not rename: the source may live on another filesystem
        tokio::fs::copy(source, &target)
            .await
            .map_err(|e| ArtifactError::io(source, e))?;

        tracing::debug!(analysis_id = %analysis, kind = %kind, path = %target.display(), "stored report");
        Ok(ArtifactRef::new(kind, target))
    }

    async fn read(&self, artifact: &ArtifactRef) -> Result<Vec<u8>, ArtifactError> {
        tokio::fs::read(artifact.path())
            .await
            .map_err(|e| ArtifactError::io(artifact.path(), e))
    }

    async fn delete(&self, artifact: &ArtifactRef) -> Result<(), ArtifactError> {
        tokio::fs::remove_file(artifact.path())
            .await
            .map_err(|e| ArtifactError::io(artifact.path(), e))?;

        // 最後のレポートを消したら analysis ディレクトリも片付ける（空でなければ失敗するだけ）
        if let Some(dir) = artifact.path().parent()
            && dir != self.root.as_path()
            && dir.starts_with(&self.root)
            && tokio::fs::remove_dir(dir).await.is_ok()
        {
            tracing::debug!(path = %dir.display(), "removed empty analysis directory");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_copies_into_analysis_dir_with_fresh_names() {
        let scratch = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let source = scratch.path().join("report.pdf");
        std::fs::write(&source, b"%PDF-1.4").unwrap();

        let store = FsArtifactStore::new(root.path());
        let id = AnalysisId::random();
        let a = store.store(&id, ReportKind::Map, &source).await.unwrap();
        let b = store.store(&id, ReportKind::Map, &source).await.unwrap();

        assert_ne!(a.path, b.path);
        assert!(a.path.starts_with(root.path().join(id.to_string())));
        assert_eq!(a.path.extension().and_then(|e| e.to_str()), Some("pdf"));
        assert_eq!(store.read(&a).await.unwrap(), b"%PDF-1.4");
        assert!(source.exists());
    }

    #[tokio::test]
    async fn deleting_the_last_report_removes_the_analysis_dir() {
        let scratch = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let source = scratch.path().join("report.pdf");
        std::fs::write(&source, b"%PDF-1.4").unwrap();

        let store = FsArtifactStore::new(root.path());
        let id = AnalysisId::random();
        let dir = root.path().join(id.to_string());
        let map = store.store(&id, ReportKind::Map, &source).await.unwrap();
        let table = store.store(&id, ReportKind::Table, &source).await.unwrap();

        store.delete(&map).await.unwrap();
        assert!(dir.exists());

        store.delete(&table).await.unwrap();
        assert!(!dir.exists());
        assert!(root.path().exists());
    }

    #[tokio::test]
    async fn missing_files_map_to_not_found() {
        let root = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(root.path());
        let gone = ArtifactRef::new(ReportKind::Table, root.path().join("nope.pdf"));

        assert!(matches!(store.read(&gone).await, Err(ArtifactError::NotFound(_))));
        assert!(matches!(store.delete(&gone).await, Err(ArtifactError::NotFound(_))));

        let missing_source = root.path().join("never-written.pdf");
        let err = store
            .store(&AnalysisId::random(), ReportKind::Map, &missing_source)
            .await
            .unwrap_err();
        assert!(matches!(err, ArtifactError::NotFound(_)));
    }
}
