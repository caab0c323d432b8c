//! InMemoryAnalysisStore - テスト・開発用の正本

use async_trait::async_trait;
use dashmap::DashMap;

use crate::domain::analysis::AnalysisRecord;
use crate::domain::audit::AuditRecord;
use crate::domain::ids::AnalysisId;
use crate::ports::{AnalysisStore, StoreError};

#[derive(Debug, Default)]
pub struct InMemoryAnalysisStore {
    analyses: DashMap<AnalysisId, AnalysisRecord>,
    audits: DashMap<AnalysisId, Vec<AuditRecord>>,
}

impl InMemoryAnalysisStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AnalysisStore for InMemoryAnalysisStore {
    async fn insert(&self, record: &AnalysisRecord) -> Result<(), StoreError> {
        use dashmap::mapref::entry::Entry;

        match self.analyses.entry(record.id) {
            Entry::Occupied(_) => Err(StoreError::Conflict(record.id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(())
            }
        }
    }

    async fn get(&self, id: &AnalysisId) -> Result<Option<AnalysisRecord>, StoreError> {
        Ok(self.analyses.get(id).map(|entry| entry.value().clone()))
    }

    async fn update(&self, record: &AnalysisRecord) -> Result<(), StoreError> {
        let mut entry = self
            .analyses
            .get_mut(&record.id)
            .ok_or_else(|| StoreError::NotFound(record.id.to_string()))?;
        *entry = record.clone();
        Ok(())
    }

    async fn delete(&self, id: &AnalysisId) -> Result<bool, StoreError> {
        Ok(self.analyses.remove(id).is_some())
    }

    async fn list(&self) -> Result<Vec<AnalysisRecord>, StoreError> {
        let mut records: Vec<AnalysisRecord> =
            self.analyses.iter().map(|entry| entry.value().clone()).collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(records)
    }

    async fn append_audit(&self, audit: &AuditRecord) -> Result<(), StoreError> {
        self.audits
            .entry(audit.analysis_id)
            .or_default()
            .push(audit.clone());
        Ok(())
    }

    async fn update_audit(&self, audit: &AuditRecord) -> Result<(), StoreError> {
        let mut audits = self
            .audits
            .get_mut(&audit.analysis_id)
            .ok_or_else(|| StoreError::NotFound(audit.attempt_id.to_string()))?;
        let slot = audits
            .iter_mut()
            .find(|a| a.attempt_id == audit.attempt_id)
            .ok_or_else(|| StoreError::NotFound(audit.attempt_id.to_string()))?;
        *slot = audit.clone();
        Ok(())
    }

    async fn audits_for(&self, analysis_id: &AnalysisId) -> Result<Vec<AuditRecord>, StoreError> {
        Ok(self
            .audits
            .get(analysis_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default())
    }

    async fn delete_audits(&self, analysis_id: &AnalysisId) -> Result<(), StoreError> {
        self.audits.remove(analysis_id);
        Ok(())
    }
}
