//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は外部システム（task broker, layer storage, report storage など）への
//! インターフェースを提供し、実装の詳細を隠蔽します。
//!
//! # 設計原則
//! - AnalysisStore が analysis 状態の正本
//! - Broker の状態は参考値（保持期間を過ぎると PENDING に戻る）
//! - レポートファイルは analysis が排他的に所有する

pub mod analysis_store;
pub mod artifact_store;
pub mod clock;
pub mod function_service;
pub mod id_generator;
pub mod layer_store;
pub mod task_broker;

// 主要な trait を再エクスポート
pub use self::analysis_store::{AnalysisStore, StoreError};
pub use self::artifact_store::{ArtifactError, ArtifactStore};
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::function_service::{ImpactFunction, ImpactFunctionService};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::layer_store::LayerStore;
pub use self::task_broker::{BrokerError, TaskBroker};
