//! Cleanup - best-effort な資源解放と keep されていない analysis の削除
//!
//! 解放の失敗（ファイルが既に無い等）はログに残して握りつぶす。
//! 解放を引き起こした操作（削除・差し替え）は失敗させない。

use std::collections::HashSet;
use std::fmt::Display;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::app::lifecycle::JobLifecycleManager;
use crate::domain::artifact::ArtifactRef;
use crate::domain::errors::GeosafeError;
use crate::domain::ids::{AnalysisId, LayerId};
use crate::domain::layer::LayerPurpose;
use crate::ports::{ArtifactStore, LayerStore};

/// Run one release and log-and-continue on failure. Returns whether it succeeded.
pub(crate) async fn release<E: Display>(
    resource: impl Display,
    call: impl Future<Output = Result<(), E>>,
) -> bool {
    match call.await {
        Ok(()) => {
            debug!(%resource, "released");
            true
        }
        Err(e) => {
            let err = GeosafeError::ArtifactDeleteFailed(format!("{resource}: {e}"));
            warn!(error = %err, code = err.code(), "ignoring failed release");
            false
        }
    }
}

pub(crate) async fn release_artifact(store: &dyn ArtifactStore, artifact: &ArtifactRef) -> bool {
    release(artifact, store.delete(artifact)).await
}

pub(crate) async fn release_layer(layers: &dyn LayerStore, id: &LayerId) -> bool {
    release(format!("impact layer {id}"), layers.delete_layer(id)).await
}

/// What `purge_unkept` removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeReport {
    pub deleted_analyses: Vec<AnalysisId>,
    pub deleted_layers: Vec<LayerId>,
    pub failures: usize,
}

impl JobLifecycleManager {
    /// Delete every analysis not marked `keep`, then every impact layer no
    /// remaining analysis refers to.
    #[instrument(skip(self))]
    pub async fn purge_unkept(&self) -> Result<PurgeReport, GeosafeError> {
        let mut report = PurgeReport::default();

        for record in self.analyses.list().await? {
            if record.keep {
                continue;
            }
            match self.delete(record.id).await {
                Ok(()) => report.deleted_analyses.push(record.id),
                // 並行して削除された
                Err(GeosafeError::AnalysisNotFound(_)) => {}
                Err(e) => {
                    warn!(analysis_id = %record.id, error = %e, "purge could not delete analysis");
                    report.failures += 1;
                }
            }
        }

        let referenced: HashSet<LayerId> = self
            .analyses
            .list()
            .await?
            .into_iter()
            .filter_map(|r| r.impact_layer_id)
            .collect();

        for layer in self.layers.list_layers().await? {
            if layer.metadata.purpose != LayerPurpose::Impact || referenced.contains(&layer.id) {
                continue;
            }
            if release_layer(self.layers.as_ref(), &layer.id).await {
                report.deleted_layers.push(layer.id);
            } else {
                report.failures += 1;
            }
        }

        info!(
            analyses = report.deleted_analyses.len(),
            layers = report.deleted_layers.len(),
            failures = report.failures,
            "purge finished"
        );
        Ok(report)
    }
}
