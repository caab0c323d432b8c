//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせてアプリケーションロジックを実装します。
//!
//! # 主要コンポーネント
//! - **JobLifecycleManager**: analysis の投入・状態同期・再実行・削除
//! - **SpatialCandidateFilter**: bbox による入力候補レイヤーの絞り込み
//! - **ImpactFunctionCatalog**: impact function 一覧（single-flight キャッシュ）
//! - **ReportBundler**: レポートのダウンロード（PDF / zip）
//! - **AppBuilder**: アプリケーションの構築とワイヤリング

pub mod builder;
pub mod bundle;
pub mod candidate_filter;
pub mod catalog;
pub mod cleanup;
pub mod lifecycle;
pub mod locks;
pub mod status;

// 主要な型を再エクスポート
pub use self::builder::{App, AppBuilder, BuildError};
pub use self::bundle::{Bundle, BundleKind, ReportBundler};
pub use self::candidate_filter::{OptionsPanel, Selection, SpatialCandidateFilter};
pub use self::catalog::ImpactFunctionCatalog;
pub use self::cleanup::PurgeReport;
pub use self::lifecycle::{CompletionOutcome, JobLifecycleManager, LifecycleOptions, SweepReport};
pub use self::status::{AnalysisStatus, StatusLabel};
