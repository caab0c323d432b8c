//! Impls - 実装（開発用・テスト用）
//!
//! このモジュールには ports の実装を含めます。
//!
//! # 含まれる実装
//! - **InMemoryLayerStore**: 開発用のレイヤー保管
//! - **InMemoryAnalysisStore**: テスト用の正本
//! - **FsArtifactStore**: ローカルディスクのレポート保管
//! - **ScriptedBroker**: 外から進行を操作できる broker
//! - **StaticFunctionService**: 固定の impact function 一覧
//!
//! # 本番用実装
//! 本番用の broker / layer store は別クレートに配置します。

pub mod fs_artifacts;
pub mod inmem_analyses;
pub mod inmem_layers;
pub mod scripted_broker;
pub mod static_functions;

// 主要な型を再エクスポート
pub use self::fs_artifacts::FsArtifactStore;
pub use self::inmem_analyses::InMemoryAnalysisStore;
pub use self::inmem_layers::InMemoryLayerStore;
pub use self::scripted_broker::ScriptedBroker;
pub use self::static_functions::StaticFunctionService;
