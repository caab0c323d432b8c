//! AppBuilder - アプリケーションの構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）
//! - 開発体験の改善（明確なエラーメッセージ）

use std::sync::Arc;

use tracing::info;

use crate::app::bundle::ReportBundler;
use crate::app::candidate_filter::SpatialCandidateFilter;
use crate::app::catalog::ImpactFunctionCatalog;
use crate::app::lifecycle::{JobLifecycleManager, LifecycleOptions};
use crate::config::{ConfigError, Settings};
use crate::domain::errors::GeosafeError;
use crate::impls::FsArtifactStore;
use crate::ports::{
    AnalysisStore, ArtifactStore, Clock, IdGenerator, ImpactFunctionService, LayerStore,
    SystemClock, TaskBroker, UlidGenerator,
};

/// AppBuilder は ports と設定から [`App`] を組み立てる
///
/// # 使用例
/// ```ignore
/// let app = AppBuilder::new(settings)
///     .layers(layer_store)
///     .analyses(analysis_store)
///     .broker(broker)
///     .functions(function_service)
///     .build()?;
/// ```
///
/// # Fail-fast 設計
/// - 必須 port（layers, analyses, broker, functions）が無ければ build() が失敗する
/// - 設定値の検証も build() 時に行う
/// - artifacts / clock / ids は省略時に既定実装を使う
pub struct AppBuilder {
    settings: Settings,
    layers: Option<Arc<dyn LayerStore>>,
    analyses: Option<Arc<dyn AnalysisStore>>,
    artifacts: Option<Arc<dyn ArtifactStore>>,
    broker: Option<Arc<dyn TaskBroker>>,
    functions: Option<Arc<dyn ImpactFunctionService>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
}

/// BuildError はアプリケーション構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing port: {0}. It must be provided before build()")]
    MissingPort(&'static str),

    #[error(transparent)]
    InvalidSettings(#[from] ConfigError),
}

impl From<BuildError> for GeosafeError {
    fn from(err: BuildError) -> Self {
        GeosafeError::InvalidRequest(err.to_string())
    }
}

impl AppBuilder {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            layers: None,
            analyses: None,
            artifacts: None,
            broker: None,
            functions: None,
            clock: None,
            ids: None,
        }
    }

    pub fn layers(mut self, layers: Arc<dyn LayerStore>) -> Self {
        self.layers = Some(layers);
        self
    }

    pub fn analyses(mut self, analyses: Arc<dyn AnalysisStore>) -> Self {
        self.analyses = Some(analyses);
        self
    }

    /// 省略時は `settings.artifact_root` 配下の [`FsArtifactStore`]
    pub fn artifacts(mut self, artifacts: Arc<dyn ArtifactStore>) -> Self {
        self.artifacts = Some(artifacts);
        self
    }

    pub fn broker(mut self, broker: Arc<dyn TaskBroker>) -> Self {
        self.broker = Some(broker);
        self
    }

    pub fn functions(mut self, functions: Arc<dyn ImpactFunctionService>) -> Self {
        self.functions = Some(functions);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn ids(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// AppBuilder を構築して App を生成
    ///
    /// # 検証
    /// - 設定値が不正なら BuildError::InvalidSettings
    /// - 必須 port が欠けていれば BuildError::MissingPort
    pub fn build(self) -> Result<App, BuildError> {
        self.settings.validate()?;

        let layers = self.layers.ok_or(BuildError::MissingPort("layers"))?;
        let analyses = self.analyses.ok_or(BuildError::MissingPort("analyses"))?;
        let broker = self.broker.ok_or(BuildError::MissingPort("broker"))?;
        let functions = self.functions.ok_or(BuildError::MissingPort("functions"))?;

        let artifacts: Arc<dyn ArtifactStore> = match self.artifacts {
            Some(artifacts) => artifacts,
            None => Arc::new(FsArtifactStore::new(self.settings.artifact_root.clone())),
        };
        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock),
        };
        let ids: Arc<dyn IdGenerator> = match self.ids {
            Some(ids) => ids,
            None => Arc::new(UlidGenerator::new(SystemClock)),
        };

        let lifecycle = JobLifecycleManager::new(
            layers.clone(),
            analyses.clone(),
            artifacts.clone(),
            broker,
            clock,
            ids,
            LifecycleOptions::from(&self.settings),
        );
        let filter = SpatialCandidateFilter::new(layers.clone());
        let catalog = ImpactFunctionCatalog::new(functions, self.settings.catalog_timeout());
        let bundler = ReportBundler::new(
            analyses,
            layers,
            artifacts,
            self.settings.scratch_dir.clone(),
        );

        info!(
            artifact_root = %self.settings.artifact_root.display(),
            broker_timeout_ms = self.settings.broker_timeout_ms,
            "geosafe core ready"
        );
        Ok(App {
            lifecycle: Arc::new(lifecycle),
            filter: Arc::new(filter),
            catalog: Arc::new(catalog),
            bundler: Arc::new(bundler),
        })
    }
}

/// App は組み立て済みの 4 コンポーネント
///
/// 各コンポーネントは `Arc` で共有でき、並行に呼び出してよい。
#[derive(Clone)]
pub struct App {
    pub lifecycle: Arc<JobLifecycleManager>,
    pub filter: Arc<SpatialCandidateFilter>,
    pub catalog: Arc<ImpactFunctionCatalog>,
    pub bundler: Arc<ReportBundler>,
}
