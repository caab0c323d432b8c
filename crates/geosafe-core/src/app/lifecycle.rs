//! JobLifecycleManager - analysis の投入・状態追跡・完了処理・再実行・削除
//!
//! # 状態遷移
//! - submit: UNSUBMITTED → PENDING（broker に投入、audit を開く）
//! - observe_state: broker の状態を `TaskState::reconcile` でキャッシュに畳み込む
//! - 初めて終端状態を観測したら完了処理（レポート添付・audit を閉じる）
//! - rerun: 世代を進めて UNSUBMITTED に戻し、再投入
//!
//! 同じ analysis への書き込みは `AnalysisLocks` で直列化する。
//! broker 呼び出しはすべて timeout 付きで、超過は `BrokerUnavailable`。

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};

use crate::app::cleanup::{release, release_artifact, release_layer};
use crate::app::locks::AnalysisLocks;
use crate::config::Settings;
use crate::domain::analysis::{AnalysisRecord, AnalysisRequest, ExtentOption, Owner, default_title};
use crate::domain::artifact::{ArtifactRef, ReportKind};
use crate::domain::audit::AuditRecord;
use crate::domain::errors::GeosafeError;
use crate::domain::ids::{AnalysisId, LayerId};
use crate::domain::job::{JobSpec, TaskHandle};
use crate::domain::layer::{BBox, LayerPurpose, LayerRecord};
use crate::domain::outcome::{JobOutcome, JobOutput};
use crate::domain::state::TaskState;
use crate::domain::troubleshoot::Troubleshoot;
use crate::ports::{
    AnalysisStore, ArtifactStore, BrokerError, Clock, IdGenerator, LayerStore, TaskBroker,
};

/// Knobs of the lifecycle taken from [`Settings`].
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    pub broker_timeout: Duration,
    pub anonymous_owner: String,
    pub default_language: String,
}

impl From<&Settings> for LifecycleOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            broker_timeout: settings.broker_timeout(),
            anonymous_owner: settings.anonymous_owner.clone(),
            default_language: settings.default_language.clone(),
        }
    }
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

/// Result of delivering a completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// The analysis reached this terminal state.
    Applied(TaskState),

    /// The completion belongs to a superseded submission and was dropped.
    Stale,

    /// The analysis had already finished this generation.
    Duplicate,
}

/// What `sweep` did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub checked: usize,
    pub finished: usize,
    pub failed: usize,
}

/// Inputs that must be valid before anything reaches the broker.
struct AnalysisInputs<'a> {
    hazard: LayerId,
    exposure: LayerId,
    aggregation: Option<LayerId>,
    impact_function_id: &'a str,
    extent_option: ExtentOption,
    user_extent: Option<BBox>,
}

impl<'a> From<&'a AnalysisRequest> for AnalysisInputs<'a> {
    fn from(r: &'a AnalysisRequest) -> Self {
        Self {
            hazard: r.hazard_layer_id,
            exposure: r.exposure_layer_id,
            aggregation: r.aggregation_layer_id,
            impact_function_id: &r.impact_function_id,
            extent_option: r.extent_option,
            user_extent: r.user_extent,
        }
    }
}

impl<'a> From<&'a AnalysisRecord> for AnalysisInputs<'a> {
    fn from(r: &'a AnalysisRecord) -> Self {
        Self {
            hazard: r.hazard_layer_id,
            exposure: r.exposure_layer_id,
            aggregation: r.aggregation_layer_id,
            impact_function_id: &r.impact_function_id,
            extent_option: r.extent_option,
            user_extent: r.user_extent,
        }
    }
}

struct InputLayers {
    hazard: LayerRecord,
    exposure: LayerRecord,
    aggregation: Option<LayerRecord>,
}

/// Resources replaced by a successful run, released once the record is saved.
#[derive(Default)]
struct Superseded {
    reports: Vec<ArtifactRef>,
    layer: Option<LayerId>,
}

pub struct JobLifecycleManager {
    pub(super) layers: Arc<dyn LayerStore>,
    pub(super) analyses: Arc<dyn AnalysisStore>,
    pub(super) artifacts: Arc<dyn ArtifactStore>,
    broker: Arc<dyn TaskBroker>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    locks: AnalysisLocks,
    options: LifecycleOptions,
}

impl JobLifecycleManager {
    pub fn new(
        layers: Arc<dyn LayerStore>,
        analyses: Arc<dyn AnalysisStore>,
        artifacts: Arc<dyn ArtifactStore>,
        broker: Arc<dyn TaskBroker>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        options: LifecycleOptions,
    ) -> Self {
        Self {
            layers,
            analyses,
            artifacts,
            broker,
            clock,
            ids,
            locks: AnalysisLocks::new(),
            options,
        }
    }

    /// Create an analysis and hand it to the broker.
    ///
    /// The record is persisted before the broker call, so a broker failure
    /// leaves it `UNSUBMITTED` (recoverable through `rerun`).
    #[instrument(
        skip(self, request),
        fields(hazard = %request.hazard_layer_id, exposure = %request.exposure_layer_id)
    )]
    pub async fn submit(&self, request: AnalysisRequest) -> Result<AnalysisRecord, GeosafeError> {
        let layers = self.validate(AnalysisInputs::from(&request)).await?;

        let title = request
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| {
                default_title(&layers.hazard, &layers.exposure, layers.aggregation.as_ref())
            });
        let owner = Owner::resolve(request.owner.as_deref(), &self.options.anonymous_owner);
        let language = request
            .language_code
            .clone()
            .unwrap_or_else(|| self.options.default_language.clone());

        let id = self.ids.generate_analysis_id();
        // 挿入から投入までを一つのロックで囲み、並行する delete を後ろに並ばせる
        let _guard = self.locks.acquire(id).await;
        let mut record = AnalysisRecord::new(id, request, title, owner, language, self.clock.now());
        self.analyses.insert(&record).await?;
        info!(analysis_id = %id, title = %record.title, "analysis created");

        self.submit_locked(&mut record).await?;
        Ok(record)
    }

    /// Current state, folding in whatever the broker reports.
    ///
    /// A broker `PENDING` never overrides the cached value, and a terminal
    /// cached value is returned without asking the broker at all.
    #[instrument(skip(self), fields(analysis_id = %id))]
    pub async fn observe_state(&self, id: AnalysisId) -> Result<TaskState, GeosafeError> {
        let _guard = self.locks.acquire(id).await;
        let mut record = self.load(&id).await?;

        let Some(handle) = record.task_handle.clone() else {
            return Ok(record.cached_state);
        };
        if record.cached_state.is_terminal() {
            return Ok(record.cached_state);
        }

        let status = self.bounded("poll", self.broker.poll(&handle)).await?;
        if !record.observe(status.state, self.clock.now()) {
            return Ok(record.cached_state);
        }
        debug!(state = %record.cached_state, "broker state changed");

        if !record.cached_state.is_terminal() {
            self.analyses.update(&record).await?;
            return Ok(record.cached_state);
        }

        // 初めての終端状態: 結果を取り出して完了処理
        let outcome = match status.outcome {
            Some(outcome) => outcome,
            None => {
                self.bounded("await_result", self.broker.await_result(&handle))
                    .await?
            }
        };
        self.apply_completion(&mut record, outcome).await
    }

    /// Deliver a broker completion for `handle`.
    ///
    /// Completions of superseded submissions are discarded.
    #[instrument(skip(self, outcome), fields(analysis_id = %id, handle = %handle))]
    pub async fn on_completion(
        &self,
        id: AnalysisId,
        handle: &TaskHandle,
        outcome: JobOutcome,
    ) -> Result<CompletionOutcome, GeosafeError> {
        let _guard = self.locks.acquire(id).await;
        let mut record = self.load(&id).await?;

        if !record.handle_matches(handle) {
            info!(current = ?record.task_handle, "discarding stale completion");
            return Ok(CompletionOutcome::Stale);
        }
        if record.cached_state.is_terminal() {
            debug!(state = %record.cached_state, "completion already applied");
            return Ok(CompletionOutcome::Duplicate);
        }

        let state = self.apply_completion(&mut record, outcome).await?;
        Ok(CompletionOutcome::Applied(state))
    }

    /// Store `new_file` as the `kind` report of an analysis and release the
    /// report it replaces.
    ///
    /// The old reference is swapped only after the new file is stored; a
    /// failure to release the old file is logged and ignored.
    #[instrument(skip(self, new_file), fields(analysis_id = %id, kind = %kind))]
    pub async fn assign_report_artifact(
        &self,
        id: AnalysisId,
        kind: ReportKind,
        new_file: &Path,
    ) -> Result<ArtifactRef, GeosafeError> {
        let _guard = self.locks.acquire(id).await;
        let mut record = self.load(&id).await?;

        let stored = self.artifacts.store(&id, kind, new_file).await?;
        let previous = record.replace_report(kind, Some(stored.clone()));
        record.updated_at = self.clock.now();

        if let Err(e) = self.analyses.update(&record).await {
            release_artifact(self.artifacts.as_ref(), &stored).await;
            return Err(e.into());
        }
        if let Some(old) = previous {
            release_artifact(self.artifacts.as_ref(), &old).await;
        }
        Ok(stored)
    }

    /// Submit an existing analysis again as a new generation.
    ///
    /// Prior reports and impact layer stay in place until the new run
    /// succeeds. An in-flight superseded job is revoked (best effort).
    #[instrument(skip(self), fields(analysis_id = %id))]
    pub async fn rerun(&self, id: AnalysisId) -> Result<AnalysisRecord, GeosafeError> {
        let _guard = self.locks.acquire(id).await;
        let mut record = self.load(&id).await?;

        self.validate(AnalysisInputs::from(&record)).await?;

        let in_flight = record.is_submitted() && !record.cached_state.is_terminal();
        let superseded = record.reset_for_rerun(self.clock.now());
        self.analyses.update(&record).await?;

        if in_flight && let Some(old) = superseded {
            let revoked = self.bounded("revoke", self.broker.revoke(&old));
            release(format!("broker job {old}"), revoked).await;
        }

        self.submit_locked(&mut record).await?;
        Ok(record)
    }

    /// Remove an analysis with its reports, impact layer and audit trail.
    ///
    /// Every release is independent and best-effort; only a failure to
    /// remove the record itself is returned.
    #[instrument(skip(self), fields(analysis_id = %id))]
    pub async fn delete(&self, id: AnalysisId) -> Result<(), GeosafeError> {
        let guard = self.locks.acquire(id).await;
        let record = self.load(&id).await?;

        if let Some(handle) = &record.task_handle
            && !record.cached_state.is_terminal()
        {
            let revoked = self.bounded("revoke", self.broker.revoke(handle));
            release(format!("broker job {handle}"), revoked).await;
        }

        for kind in ReportKind::ALL {
            if let Some(artifact) = record.report(kind) {
                release_artifact(self.artifacts.as_ref(), artifact).await;
            }
        }
        if let Some(layer_id) = &record.impact_layer_id {
            release_layer(self.layers.as_ref(), layer_id).await;
        }
        release(
            format!("audit trail of {id}"),
            self.analyses.delete_audits(&id),
        )
        .await;

        self.analyses.delete(&id).await?;
        drop(guard);
        self.locks.forget(&id);

        info!("analysis deleted");
        Ok(())
    }

    /// Flip `keep`; returns the new value.
    #[instrument(skip(self), fields(analysis_id = %id))]
    pub async fn toggle_keep(&self, id: AnalysisId) -> Result<bool, GeosafeError> {
        let _guard = self.locks.acquire(id).await;
        let mut record = self.load(&id).await?;
        record.keep = !record.keep;
        record.updated_at = self.clock.now();
        self.analyses.update(&record).await?;
        Ok(record.keep)
    }

    /// Observe every submitted analysis that has not succeeded yet.
    ///
    /// Per-analysis failures are logged and counted; they never abort the sweep.
    #[instrument(skip(self))]
    pub async fn sweep(&self) -> Result<SweepReport, GeosafeError> {
        let mut report = SweepReport::default();

        for record in self.analyses.list().await? {
            if !record.is_submitted() || record.cached_state == TaskState::Success {
                continue;
            }
            report.checked += 1;
            match self.observe_state(record.id).await {
                Ok(state) if state.is_terminal() => report.finished += 1,
                Ok(_) => {}
                Err(e) => {
                    warn!(analysis_id = %record.id, error = %e, "sweep could not refresh analysis");
                    report.failed += 1;
                }
            }
        }

        debug!(?report, "sweep finished");
        Ok(report)
    }

    pub async fn get(&self, id: AnalysisId) -> Result<AnalysisRecord, GeosafeError> {
        self.load(&id).await
    }

    pub async fn list(&self) -> Result<Vec<AnalysisRecord>, GeosafeError> {
        Ok(self.analyses.list().await?)
    }

    pub async fn audits(&self, id: AnalysisId) -> Result<Vec<AuditRecord>, GeosafeError> {
        Ok(self.analyses.audits_for(&id).await?)
    }

    /// Hint for the latest failed attempt, if it is a recognised failure.
    pub async fn troubleshoot(&self, id: AnalysisId) -> Result<Option<Troubleshoot>, GeosafeError> {
        let audits = self.analyses.audits_for(&id).await?;
        Ok(audits.last().and_then(Troubleshoot::for_audit))
    }

    async fn load(&self, id: &AnalysisId) -> Result<AnalysisRecord, GeosafeError> {
        self.analyses
            .get(id)
            .await?
            .ok_or(GeosafeError::AnalysisNotFound(*id))
    }

    async fn load_layer(
        &self,
        id: LayerId,
        expected: LayerPurpose,
    ) -> Result<LayerRecord, GeosafeError> {
        let layer = self
            .layers
            .get_layer(&id)
            .await?
            .ok_or(GeosafeError::LayerNotFound(id))?;
        if layer.metadata.purpose != expected {
            return Err(GeosafeError::InvalidLayerRole {
                layer: id,
                expected,
                actual: layer.metadata.purpose,
            });
        }
        Ok(layer)
    }

    async fn validate(&self, inputs: AnalysisInputs<'_>) -> Result<InputLayers, GeosafeError> {
        if inputs.impact_function_id.trim().is_empty() {
            return Err(GeosafeError::InvalidRequest(
                "impact function id is required".to_string(),
            ));
        }
        if inputs.extent_option.requires_user_extent() && inputs.user_extent.is_none() {
            return Err(GeosafeError::InvalidRequest(format!(
                "extent option {:?} requires a user extent",
                inputs.extent_option
            )));
        }

        let hazard = self.load_layer(inputs.hazard, LayerPurpose::Hazard).await?;
        let exposure = self.load_layer(inputs.exposure, LayerPurpose::Exposure).await?;
        let aggregation = match inputs.aggregation {
            Some(id) => Some(self.load_layer(id, LayerPurpose::Aggregation).await?),
            None => None,
        };

        Ok(InputLayers {
            hazard,
            exposure,
            aggregation,
        })
    }

    /// Caller holds the analysis lock.
    async fn submit_locked(&self, record: &mut AnalysisRecord) -> Result<(), GeosafeError> {
        let spec = JobSpec::for_analysis(record);
        let handle = self.bounded("submit", self.broker.submit(&spec)).await?;

        let now = self.clock.now();
        record.mark_submitted(handle.clone(), now);
        self.analyses.update(record).await?;

        let audit = AuditRecord::open(
            self.ids.generate_attempt_id(),
            record.id,
            record.generation,
            now,
        );
        self.analyses.append_audit(&audit).await?;

        info!(
            analysis_id = %record.id,
            handle = %handle,
            generation = record.generation,
            "analysis submitted"
        );
        Ok(())
    }

    /// Caller holds the analysis lock and has checked that this generation
    /// has not finished yet.
    async fn apply_completion(
        &self,
        record: &mut AnalysisRecord,
        outcome: JobOutcome,
    ) -> Result<TaskState, GeosafeError> {
        match outcome {
            JobOutcome::Failure(info) => {
                let now = self.clock.now();
                record.finish(TaskState::Failure, now);
                self.analyses.update(record).await?;
                self.close_audit(record, |audit| {
                    audit.close_failure(info.trace(), info.exception_class.clone(), now)
                })
                .await?;
                warn!(analysis_id = %record.id, error = %info.message, "analysis failed");
                Ok(TaskState::Failure)
            }
            JobOutcome::Success(output) => match self.attach_output(record, &output).await {
                Ok(superseded) => {
                    let now = self.clock.now();
                    record.finish(TaskState::Success, now);
                    self.analyses.update(record).await?;
                    self.close_audit(record, |audit| {
                        audit.close_success(output.summary.clone(), now)
                    })
                    .await?;

                    for artifact in &superseded.reports {
                        release_artifact(self.artifacts.as_ref(), artifact).await;
                    }
                    if let Some(layer_id) = &superseded.layer {
                        release_layer(self.layers.as_ref(), layer_id).await;
                    }

                    info!(analysis_id = %record.id, impact_layer = %output.impact_layer_id, "analysis succeeded");
                    Ok(TaskState::Success)
                }
                Err(err) => {
                    let now = self.clock.now();
                    record.finish(TaskState::Failure, now);
                    self.analyses.update(record).await?;
                    let trace = err.to_string();
                    self.close_audit(record, |audit| {
                        audit.close_failure(trace, Some(err.code().to_string()), now)
                    })
                    .await?;
                    error!(analysis_id = %record.id, error = %err, "successful run is unusable");
                    Err(err)
                }
            },
        }
    }

    /// Store both reports and point the record at the new outputs.
    ///
    /// Nothing on the record changes unless both reports were stored.
    async fn attach_output(
        &self,
        record: &mut AnalysisRecord,
        output: &JobOutput,
    ) -> Result<Superseded, GeosafeError> {
        let missing = |kind: ReportKind| {
            GeosafeError::MissingArtifact(format!(
                "analysis {} finished without a {kind} report",
                record.id
            ))
        };
        let map_file = output.report_map.as_deref().ok_or_else(|| missing(ReportKind::Map))?;
        let table_file = output
            .report_table
            .as_deref()
            .ok_or_else(|| missing(ReportKind::Table))?;

        let map = self.artifacts.store(&record.id, ReportKind::Map, map_file).await?;
        let table = match self.artifacts.store(&record.id, ReportKind::Table, table_file).await {
            Ok(table) => table,
            Err(e) => {
                release_artifact(self.artifacts.as_ref(), &map).await;
                return Err(e.into());
            }
        };

        let mut superseded = Superseded::default();
        superseded
            .reports
            .extend(record.replace_report(ReportKind::Map, Some(map)));
        superseded
            .reports
            .extend(record.replace_report(ReportKind::Table, Some(table)));

        let previous_layer = record.impact_layer_id.replace(output.impact_layer_id);
        superseded.layer = previous_layer.filter(|old| *old != output.impact_layer_id);

        let retitle = self
            .layers
            .retitle_layer(&output.impact_layer_id, &record.title)
            .await;
        if let Err(e) = retitle {
            warn!(layer_id = %output.impact_layer_id, error = %e, "could not retitle impact layer");
        }

        Ok(superseded)
    }

    /// Close the open audit of the record's current generation.
    async fn close_audit(
        &self,
        record: &AnalysisRecord,
        close: impl FnOnce(&mut AuditRecord),
    ) -> Result<(), GeosafeError> {
        let audits = self.analyses.audits_for(&record.id).await?;
        let open = audits
            .into_iter()
            .rev()
            .find(|a| a.generation == record.generation && a.is_open());

        match open {
            Some(mut audit) => {
                close(&mut audit);
                self.analyses.update_audit(&audit).await?;
            }
            None => {
                debug!(analysis_id = %record.id, generation = record.generation, "no open audit to close")
            }
        }
        Ok(())
    }

    async fn bounded<T>(
        &self,
        op: &'static str,
        call: impl Future<Output = Result<T, BrokerError>>,
    ) -> Result<T, GeosafeError> {
        let limit = self.options.broker_timeout;
        match tokio::time::timeout(limit, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                warn!(op, error = %e, "broker call failed");
                Err(e.into())
            }
            Err(_) => {
                warn!(op, timeout_ms = limit.as_millis() as u64, "broker call timed out");
                Err(GeosafeError::BrokerUnavailable(format!(
                    "{op} timed out after {}ms",
                    limit.as_millis()
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::layer::LayerMetadata;
    use crate::domain::outcome::FailureInfo;
    use crate::impls::{FsArtifactStore, InMemoryAnalysisStore, InMemoryLayerStore, ScriptedBroker};
    use crate::ports::{StoreError, SystemClock, UlidGenerator};
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;

    /// Analysis store that lingers after each insert and can refuse updates.
    struct FlakyStore {
        inner: Arc<InMemoryAnalysisStore>,
        insert_delay: Duration,
        refuse_updates: AtomicBool,
    }

    #[async_trait]
    impl AnalysisStore for FlakyStore {
        async fn insert(&self, record: &AnalysisRecord) -> Result<(), StoreError> {
            self.inner.insert(record).await?;
            tokio::time::sleep(self.insert_delay).await;
            Ok(())
        }

        async fn get(&self, id: &AnalysisId) -> Result<Option<AnalysisRecord>, StoreError> {
            self.inner.get(id).await
        }

        async fn update(&self, record: &AnalysisRecord) -> Result<(), StoreError> {
            if self.refuse_updates.load(Ordering::SeqCst) {
                return Err(StoreError::Backend("update refused".to_string()));
            }
            self.inner.update(record).await
        }

        async fn delete(&self, id: &AnalysisId) -> Result<bool, StoreError> {
            self.inner.delete(id).await
        }

        async fn list(&self) -> Result<Vec<AnalysisRecord>, StoreError> {
            self.inner.list().await
        }

        async fn append_audit(&self, audit: &AuditRecord) -> Result<(), StoreError> {
            self.inner.append_audit(audit).await
        }

        async fn update_audit(&self, audit: &AuditRecord) -> Result<(), StoreError> {
            self.inner.update_audit(audit).await
        }

        async fn audits_for(&self, analysis_id: &AnalysisId) -> Result<Vec<AuditRecord>, StoreError> {
            self.inner.audits_for(analysis_id).await
        }

        async fn delete_audits(&self, analysis_id: &AnalysisId) -> Result<(), StoreError> {
            self.inner.delete_audits(analysis_id).await
        }
    }

    struct Harness {
        manager: Arc<JobLifecycleManager>,
        layers: Arc<InMemoryLayerStore>,
        analyses: Arc<InMemoryAnalysisStore>,
        broker: Arc<ScriptedBroker>,
        hazard: LayerId,
        exposure: LayerId,
        aggregation: LayerId,
        scratch: TempDir,
        artifact_root: TempDir,
    }

    fn layer(title: &str, purpose: LayerPurpose) -> LayerRecord {
        LayerRecord::new(
            LayerId::random(),
            title.to_lowercase().replace(' ', "_"),
            title,
            BBox::new(106.0, -6.5, 107.0, -6.0),
            LayerMetadata::new(purpose, None),
        )
    }

    impl Harness {
        fn new() -> Self {
            Self::with_timeout(Duration::from_secs(5))
        }

        fn with_timeout(broker_timeout: Duration) -> Self {
            Self::with_store(broker_timeout, |inner| inner as Arc<dyn AnalysisStore>)
        }

        fn flaky(insert_delay: Duration) -> (Self, Arc<FlakyStore>) {
            let mut flaky = None;
            let h = Self::with_store(Duration::from_secs(5), |inner| {
                let store = Arc::new(FlakyStore {
                    inner,
                    insert_delay,
                    refuse_updates: AtomicBool::new(false),
                });
                flaky = Some(store.clone());
                store as Arc<dyn AnalysisStore>
            });
            (h, flaky.unwrap())
        }

        fn with_store(
            broker_timeout: Duration,
            wrap: impl FnOnce(Arc<InMemoryAnalysisStore>) -> Arc<dyn AnalysisStore>,
        ) -> Self {
            let layers = Arc::new(InMemoryLayerStore::new());
            let hazard = layer("Jakarta Flood", LayerPurpose::Hazard);
            let exposure = layer("Buildings", LayerPurpose::Exposure);
            let aggregation = layer("Districts", LayerPurpose::Aggregation);
            let (hazard_id, exposure_id, aggregation_id) = (hazard.id, exposure.id, aggregation.id);
            layers.insert(hazard);
            layers.insert(exposure);
            layers.insert(aggregation);

            let analyses = Arc::new(InMemoryAnalysisStore::new());
            let broker = Arc::new(ScriptedBroker::new());
            let artifact_root = tempfile::tempdir().unwrap();
            let options = LifecycleOptions {
                broker_timeout,
                ..LifecycleOptions::default()
            };

            let manager = JobLifecycleManager::new(
                layers.clone(),
                wrap(analyses.clone()),
                Arc::new(FsArtifactStore::new(artifact_root.path())),
                broker.clone(),
                Arc::new(SystemClock),
                Arc::new(UlidGenerator::new(SystemClock)),
                options,
            );

            Self {
                manager: Arc::new(manager),
                layers,
                analyses,
                broker,
                hazard: hazard_id,
                exposure: exposure_id,
                aggregation: aggregation_id,
                scratch: tempfile::tempdir().unwrap(),
                artifact_root,
            }
        }

        /// Every report file currently held by the artifact store.
        fn stored_files(&self) -> Vec<PathBuf> {
            let mut files = Vec::new();
            for dir in std::fs::read_dir(self.artifact_root.path()).unwrap() {
                for file in std::fs::read_dir(dir.unwrap().path()).unwrap() {
                    files.push(file.unwrap().path());
                }
            }
            files.sort();
            files
        }

        fn request(&self) -> AnalysisRequest {
            AnalysisRequest::new(self.hazard, self.exposure, "FloodRasterBuildingFunction")
        }

        /// Fresh report files as a worker would leave them.
        fn worker_reports(&self, tag: &str) -> (PathBuf, PathBuf) {
            let map = self.scratch.path().join(format!("{tag}_map.pdf"));
            let table = self.scratch.path().join(format!("{tag}_table.pdf"));
            std::fs::write(&map, format!("map {tag}")).unwrap();
            std::fs::write(&table, format!("table {tag}")).unwrap();
            (map, table)
        }

        /// Impact layer registered by a worker.
        fn worker_layer(&self, tag: &str) -> LayerId {
            let file = self.scratch.path().join(format!("{tag}.shp"));
            std::fs::write(&file, b"shp").unwrap();
            let l = layer(tag, LayerPurpose::Impact).with_files(vec![file]);
            let id = l.id;
            self.layers.insert(l);
            id
        }

        fn success(&self, tag: &str) -> JobOutcome {
            let (map, table) = self.worker_reports(tag);
            JobOutcome::Success(
                JobOutput::new(self.worker_layer(tag))
                    .with_reports(map, table)
                    .with_summary(format!("summary {tag}")),
            )
        }

        async fn run_to_success(&self) -> AnalysisRecord {
            let record = self.manager.submit(self.request()).await.unwrap();
            let handle = record.task_handle.clone().unwrap();
            self.broker.complete(&handle, self.success("first"));
            assert_eq!(
                self.manager.observe_state(record.id).await.unwrap(),
                TaskState::Success
            );
            self.manager.get(record.id).await.unwrap()
        }
    }

    fn read(artifact: Option<&ArtifactRef>) -> String {
        std::fs::read_to_string(artifact.unwrap().path()).unwrap()
    }

    #[tokio::test]
    async fn submit_persists_pending_record_with_open_audit() {
        let h = Harness::new();
        let record = h
            .manager
            .submit(h.request().with_aggregation(h.aggregation))
            .await
            .unwrap();

        assert_eq!(record.cached_state, TaskState::Pending);
        assert_eq!(record.title, "Jakarta Flood on Buildings around Districts");
        assert_eq!(record.owner.as_str(), "AnonymousUser");
        assert_eq!(record.language_code, "en");
        assert!(record.task_handle.is_some());

        let stored = h.analyses.get(&record.id).await.unwrap().unwrap();
        assert_eq!(stored.task_handle, record.task_handle);

        let audits = h.manager.audits(record.id).await.unwrap();
        assert_eq!(audits.len(), 1);
        assert!(audits[0].is_open());

        let submissions = h.broker.submissions();
        assert_eq!(submissions.len(), 1);
        assert_eq!(submissions[0].1.analysis_id, record.id);
    }

    #[tokio::test]
    async fn swapped_layer_roles_are_rejected_before_submission() {
        let h = Harness::new();
        let request = AnalysisRequest::new(h.exposure, h.hazard, "FloodRasterBuildingFunction");

        let err = h.manager.submit(request).await.unwrap_err();

        assert!(matches!(
            err,
            GeosafeError::InvalidLayerRole { expected: LayerPurpose::Hazard, actual: LayerPurpose::Exposure, .. }
        ));
        assert!(!err.is_retryable());
        assert!(h.broker.submissions().is_empty());
        assert!(h.manager.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn bbox_extent_without_user_extent_is_invalid() {
        let h = Harness::new();
        let request = h.request().with_extent(ExtentOption::BboxIntersection, None);
        assert!(matches!(
            h.manager.submit(request).await,
            Err(GeosafeError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn unknown_layer_is_reported() {
        let h = Harness::new();
        let request = AnalysisRequest::new(LayerId::random(), h.exposure, "f");
        assert!(matches!(
            h.manager.submit(request).await,
            Err(GeosafeError::LayerNotFound(_))
        ));
    }

    #[tokio::test]
    async fn broker_outage_leaves_record_unsubmitted() {
        let h = Harness::new();
        h.broker.set_unavailable(true);

        let err = h.manager.submit(h.request()).await.unwrap_err();
        assert!(matches!(err, GeosafeError::BrokerUnavailable(_)));
        assert!(err.is_retryable());

        let records = h.manager.list().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].cached_state, TaskState::Unsubmitted);
        assert!(records[0].task_handle.is_none());

        // recoverable once the broker is back
        h.broker.set_unavailable(false);
        let rerun = h.manager.rerun(records[0].id).await.unwrap();
        assert_eq!(rerun.cached_state, TaskState::Pending);
    }

    #[tokio::test]
    async fn stalled_broker_times_out_as_unavailable() {
        let h = Harness::with_timeout(Duration::from_millis(50));
        let record = h.manager.submit(h.request()).await.unwrap();

        h.broker.set_stalled(true);
        let err = h.manager.observe_state(record.id).await.unwrap_err();

        assert!(matches!(err, GeosafeError::BrokerUnavailable(msg) if msg.contains("timed out")));
    }

    #[tokio::test]
    async fn running_is_cached_and_pending_does_not_mask_it_away() {
        let h = Harness::new();
        let record = h.manager.submit(h.request()).await.unwrap();
        let handle = record.task_handle.clone().unwrap();

        h.broker.start(&handle);
        assert_eq!(h.manager.observe_state(record.id).await.unwrap(), TaskState::Running);

        h.broker.expire(&handle);
        assert_eq!(h.manager.observe_state(record.id).await.unwrap(), TaskState::Running);
    }

    #[tokio::test]
    async fn success_survives_broker_forgetting_the_job() {
        let h = Harness::new();
        let record = h.run_to_success().await;
        let handle = record.task_handle.clone().unwrap();

        h.broker.expire(&handle);
        assert_eq!(h.broker.state_of(&handle), TaskState::Pending);

        for _ in 0..3 {
            assert_eq!(h.manager.observe_state(record.id).await.unwrap(), TaskState::Success);
        }
        let stored = h.manager.get(record.id).await.unwrap();
        assert_eq!(stored.cached_state, TaskState::Success);
        assert!(stored.impact_layer_id.is_some());
        assert_eq!(read(stored.report(ReportKind::Map)), "map first");

        let audits = h.manager.audits(record.id).await.unwrap();
        assert!(audits[0].finished);
        assert!(audits[0].end_time.is_some());
        assert_eq!(audits[0].result_summary.as_deref(), Some("summary first"));

        // impact layer carries the analysis title
        let impact = h.layers.get_layer(&stored.impact_layer_id.unwrap()).await.unwrap().unwrap();
        assert_eq!(impact.title, stored.title);
    }

    #[tokio::test]
    async fn failure_closes_audit_with_trace_and_suggests_fix() {
        let h = Harness::new();
        let record = h.manager.submit(h.request()).await.unwrap();
        let handle = record.task_handle.clone().unwrap();
        h.broker.complete(
            &handle,
            JobOutcome::Failure(
                FailureInfo::new("Worker exited prematurely: signal 9 (SIGKILL)")
                    .with_exception_class("WorkerLostError"),
            ),
        );

        assert_eq!(h.manager.observe_state(record.id).await.unwrap(), TaskState::Failure);

        let audits = h.manager.audits(record.id).await.unwrap();
        assert!(audits[0].finished);
        assert!(audits[0].failure_trace.as_deref().unwrap().contains("SIGKILL"));
        assert!(h.manager.troubleshoot(record.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn success_without_reports_is_a_missing_artifact_failure() {
        let h = Harness::new();
        let record = h.manager.submit(h.request()).await.unwrap();
        let handle = record.task_handle.clone().unwrap();
        let (map, _) = h.worker_reports("half");
        let mut output = JobOutput::new(h.worker_layer("half"));
        output.report_map = Some(map);
        h.broker.complete(&handle, JobOutcome::Success(output));

        let err = h.manager.observe_state(record.id).await.unwrap_err();
        assert!(matches!(err, GeosafeError::MissingArtifact(_)));

        let stored = h.manager.get(record.id).await.unwrap();
        assert_eq!(stored.cached_state, TaskState::Failure);
        assert!(stored.report_map.is_none());

        let audits = h.manager.audits(record.id).await.unwrap();
        assert!(audits[0].finished);
        assert_eq!(audits[0].exception_class.as_deref(), Some("missing_artifact"));
        assert!(audits[0].failure_trace.as_deref().unwrap().contains("table"));
    }

    #[tokio::test]
    async fn report_file_vanishing_before_storage_is_missing_artifact() {
        let h = Harness::new();
        let record = h.manager.submit(h.request()).await.unwrap();
        let handle = record.task_handle.clone().unwrap();
        let outcome = h.success("vanish");
        if let JobOutcome::Success(output) = &outcome {
            std::fs::remove_file(output.report_table.as_ref().unwrap()).unwrap();
        }

        let delivered = h.manager.on_completion(record.id, &handle, outcome).await;
        assert!(matches!(delivered, Err(GeosafeError::MissingArtifact(_))));
        assert_eq!(
            h.manager.get(record.id).await.unwrap().cached_state,
            TaskState::Failure
        );
        // the map copy stored before the table failed is released again
        assert!(h.stored_files().is_empty());
    }

    #[tokio::test]
    async fn failed_rerun_keeps_previous_reports() {
        let h = Harness::new();
        let first = h.run_to_success().await;
        let old_map = first.report_map.clone().unwrap();

        let rerun = h.manager.rerun(first.id).await.unwrap();
        assert_eq!(rerun.generation, 1);
        assert_eq!(rerun.cached_state, TaskState::Pending);
        assert_ne!(rerun.task_handle, first.task_handle);
        assert_eq!(rerun.report_map.as_ref(), Some(&old_map));

        let handle = rerun.task_handle.clone().unwrap();
        h.broker.complete(&handle, JobOutcome::Failure(FailureInfo::new("boom")));
        assert_eq!(h.manager.observe_state(first.id).await.unwrap(), TaskState::Failure);

        let after = h.manager.get(first.id).await.unwrap();
        assert_eq!(after.report_map.as_ref(), Some(&old_map));
        assert_eq!(after.impact_layer_id, first.impact_layer_id);
        assert_eq!(read(after.report(ReportKind::Map)), "map first");

        let audits = h.manager.audits(first.id).await.unwrap();
        assert_eq!(audits.len(), 2);
        assert_eq!(audits[0].result_summary.as_deref(), Some("summary first"));
        assert_eq!(audits[1].failure_trace.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn successful_rerun_replaces_reports_and_releases_old_ones() {
        let h = Harness::new();
        let first = h.run_to_success().await;
        let old_map = first.report_map.clone().unwrap();
        let old_layer = first.impact_layer_id.unwrap();

        let rerun = h.manager.rerun(first.id).await.unwrap();
        let handle = rerun.task_handle.clone().unwrap();
        h.broker.complete(&handle, h.success("second"));
        assert_eq!(h.manager.observe_state(first.id).await.unwrap(), TaskState::Success);

        let after = h.manager.get(first.id).await.unwrap();
        assert_eq!(read(after.report(ReportKind::Map)), "map second");
        assert_eq!(read(after.report(ReportKind::Table)), "table second");
        assert!(!old_map.path().exists());
        assert_ne!(after.impact_layer_id, Some(old_layer));
        assert!(h.layers.get_layer(&old_layer).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn completion_of_superseded_submission_is_discarded() {
        let h = Harness::new();
        let record = h.manager.submit(h.request()).await.unwrap();
        let old_handle = record.task_handle.clone().unwrap();

        let rerun = h.manager.rerun(record.id).await.unwrap();
        assert_eq!(h.broker.revoked(), vec![old_handle.clone()]);

        let late = h.success("late");
        let delivered = h.manager.on_completion(record.id, &old_handle, late).await.unwrap();
        assert_eq!(delivered, CompletionOutcome::Stale);

        let stored = h.manager.get(record.id).await.unwrap();
        assert_eq!(stored.cached_state, TaskState::Pending);
        assert!(stored.report_map.is_none());

        let current = rerun.task_handle.unwrap();
        let fresh = h.success("fresh");
        assert_eq!(
            h.manager.on_completion(record.id, &current, fresh.clone()).await.unwrap(),
            CompletionOutcome::Applied(TaskState::Success)
        );
        assert_eq!(
            h.manager.on_completion(record.id, &current, fresh).await.unwrap(),
            CompletionOutcome::Duplicate
        );
    }

    #[tokio::test]
    async fn assign_report_swaps_and_tolerates_missing_old_file() {
        let h = Harness::new();
        let record = h.run_to_success().await;
        let old_table = record.report_table.clone().unwrap();
        std::fs::remove_file(old_table.path()).unwrap();

        let (_, table) = h.worker_reports("manual");
        let stored = h
            .manager
            .assign_report_artifact(record.id, ReportKind::Table, &table)
            .await
            .unwrap();

        let after = h.manager.get(record.id).await.unwrap();
        assert_eq!(after.report_table.as_ref(), Some(&stored));
        assert_eq!(read(after.report(ReportKind::Table)), "table manual");
    }

    #[tokio::test]
    async fn assign_report_releases_new_file_when_record_cannot_be_saved() {
        let (h, store) = Harness::flaky(Duration::ZERO);
        let record = h.run_to_success().await;
        let before = h.stored_files();
        assert_eq!(before.len(), 2);

        store.refuse_updates.store(true, Ordering::SeqCst);
        let (map, _) = h.worker_reports("refused");
        let err = h
            .manager
            .assign_report_artifact(record.id, ReportKind::Map, &map)
            .await
            .unwrap_err();

        assert!(matches!(err, GeosafeError::Storage(msg) if msg.contains("update refused")));
        assert_eq!(h.stored_files(), before);
        let after = h.manager.get(record.id).await.unwrap();
        assert_eq!(read(after.report(ReportKind::Map)), "map first");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn purge_racing_a_submission_revokes_its_job() {
        let (h, _store) = Harness::flaky(Duration::from_millis(50));
        let manager = h.manager.clone();
        let request = h.request();
        let submit = tokio::spawn(async move { manager.submit(request).await });
        tokio::time::sleep(Duration::from_millis(10)).await;

        let report = h.manager.purge_unkept().await.unwrap();
        let record = submit.await.unwrap().unwrap();

        assert_eq!(report.deleted_analyses, vec![record.id]);
        let submissions = h.broker.submissions();
        assert_eq!(submissions.len(), 1);
        assert_eq!(h.broker.revoked(), vec![submissions[0].0.clone()]);
        assert!(h.manager.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn explicit_title_and_owner_are_kept_and_blank_ones_fall_back() {
        let h = Harness::new();
        let named = h
            .manager
            .submit(h.request().with_title("  Flood impact  ").with_owner("alice"))
            .await
            .unwrap();
        assert_eq!(named.title, "Flood impact");
        assert_eq!(named.owner.as_str(), "alice");

        let blank = h
            .manager
            .submit(h.request().with_title("   ").with_owner(" "))
            .await
            .unwrap();
        assert_eq!(blank.title, "Jakarta Flood on Buildings");
        assert_eq!(blank.owner.as_str(), "AnonymousUser");
    }

    #[tokio::test]
    async fn delete_with_missing_reports_still_removes_record() {
        let h = Harness::new();
        let record = h.run_to_success().await;
        for kind in ReportKind::ALL {
            std::fs::remove_file(record.report(kind).unwrap().path()).unwrap();
        }

        h.manager.delete(record.id).await.unwrap();

        assert!(matches!(
            h.manager.get(record.id).await,
            Err(GeosafeError::AnalysisNotFound(_))
        ));
        assert!(h.manager.audits(record.id).await.unwrap().is_empty());
        let layer = h.layers.get_layer(&record.impact_layer_id.unwrap()).await.unwrap();
        assert!(layer.is_none());
    }

    #[tokio::test]
    async fn delete_of_unknown_analysis_is_not_found() {
        let h = Harness::new();
        assert!(matches!(
            h.manager.delete(AnalysisId::random()).await,
            Err(GeosafeError::AnalysisNotFound(_))
        ));
    }

    #[tokio::test]
    async fn purge_removes_unkept_analyses_and_orphan_impact_layers() {
        let h = Harness::new();
        let kept = h.run_to_success().await;
        assert!(h.manager.toggle_keep(kept.id).await.unwrap());
        let dropped = h.run_to_success().await;
        let orphan = h.worker_layer("orphan");

        let report = h.manager.purge_unkept().await.unwrap();

        assert_eq!(report.deleted_analyses, vec![dropped.id]);
        assert_eq!(report.deleted_layers, vec![orphan]);
        assert_eq!(report.failures, 0);
        assert!(h.manager.get(kept.id).await.is_ok());
        assert!(h.layers.get_layer(&kept.impact_layer_id.unwrap()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn sweep_refreshes_unfinished_and_counts_failures() {
        let h = Harness::new();
        let done = h.manager.submit(h.request()).await.unwrap();
        let running = h.manager.submit(h.request()).await.unwrap();
        h.broker.complete(
            done.task_handle.as_ref().unwrap(),
            JobOutcome::Failure(FailureInfo::new("x")),
        );
        h.broker.start(running.task_handle.as_ref().unwrap());

        let report = h.manager.sweep().await.unwrap();
        assert_eq!(report, SweepReport { checked: 2, finished: 1, failed: 0 });
        assert_eq!(h.manager.get(running.id).await.unwrap().cached_state, TaskState::Running);

        h.broker.set_unavailable(true);
        let report = h.manager.sweep().await.unwrap();
        assert_eq!(report.failed, 1);
    }

    #[tokio::test]
    async fn concurrent_observers_agree_on_terminal_state() {
        let h = Harness::new();
        let record = h.manager.submit(h.request()).await.unwrap();
        h.broker.complete(record.task_handle.as_ref().unwrap(), h.success("race"));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let manager = h.manager.clone();
            tasks.push(tokio::spawn(async move { manager.observe_state(record.id).await }));
        }
        for t in tasks {
            assert_eq!(t.await.unwrap().unwrap(), TaskState::Success);
        }

        let audits = h.manager.audits(record.id).await.unwrap();
        assert_eq!(audits.len(), 1);
        assert!(audits[0].finished);
    }
}
