//! AnalysisStore port - analysis と audit の正本（source of truth）
//!
//! AnalysisStore は以下を管理します：
//! - analysis レコード（cached_state, artifacts, keep, ...）
//! - 試行ごとの audit レコード（追記のみ）

use async_trait::async_trait;

use crate::domain::analysis::AnalysisRecord;
use crate::domain::audit::AuditRecord;
use crate::domain::errors::GeosafeError;
use crate::domain::ids::{AnalysisId, AttemptId};

/// Persistence failure shared by the record stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("record already exists: {0}")]
    Conflict(String),

    #[error("storage backend failed: {0}")]
    Backend(String),
}

impl From<StoreError> for GeosafeError {
    fn from(err: StoreError) -> Self {
        GeosafeError::Storage(err.to_string())
    }
}

/// AnalysisStore は analysis と audit を保存
///
/// # 設計原則
/// - 状態遷移の直列化は呼び出し側（analysis 単位のロック）で行う
/// - audit は analysis と同じ寿命（analysis 削除時に一緒に消す）
#[async_trait]
pub trait AnalysisStore: Send + Sync {
    async fn insert(&self, record: &AnalysisRecord) -> Result<(), StoreError>;

    async fn get(&self, id: &AnalysisId) -> Result<Option<AnalysisRecord>, StoreError>;

    async fn update(&self, record: &AnalysisRecord) -> Result<(), StoreError>;

    /// Returns false when nothing was stored under `id`.
    async fn delete(&self, id: &AnalysisId) -> Result<bool, StoreError>;

    /// All analyses, oldest first.
    async fn list(&self) -> Result<Vec<AnalysisRecord>, StoreError>;

    async fn append_audit(&self, audit: &AuditRecord) -> Result<(), StoreError>;

    /// Replace the audit with the same `attempt_id`.
    async fn update_audit(&self, audit: &AuditRecord) -> Result<(), StoreError>;

    /// Audits of one analysis in submission order.
    async fn audits_for(&self, analysis_id: &AnalysisId) -> Result<Vec<AuditRecord>, StoreError>;

    async fn delete_audits(&self, analysis_id: &AnalysisId) -> Result<(), StoreError>;

    async fn audit(
        &self,
        analysis_id: &AnalysisId,
        attempt_id: &AttemptId,
    ) -> Result<Option<AuditRecord>, StoreError> {
        let audits = self.audits_for(analysis_id).await?;
        Ok(audits.into_iter().find(|a| &a.attempt_id == attempt_id))
    }
}
