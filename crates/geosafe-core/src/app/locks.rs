//! AnalysisLocks - analysis 単位の排他制御
//!
//! 同じ analysis への状態・artifact 書き込みを直列化する。
//! 異なる analysis 同士は競合しない（グローバルロックは使わない）。

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::domain::ids::AnalysisId;

#[derive(Debug, Default)]
pub struct AnalysisLocks {
    inner: DashMap<AnalysisId, Arc<Mutex<()>>>,
}

impl AnalysisLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to one analysis. The guard may be held
    /// across broker round-trips.
    pub async fn acquire(&self, id: AnalysisId) -> OwnedMutexGuard<()> {
        // DashMap の参照は await 前に手放す
        let mutex = self.inner.entry(id).or_default().value().clone();
        mutex.lock_owned().await
    }

    /// Drop the entry of a deleted analysis unless someone still waits on it.
    pub fn forget(&self, id: &AnalysisId) {
        self.inner
            .remove_if(id, |_, mutex| Arc::strong_count(mutex) == 1);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
