//! geosafe-core
//!
//! Core of the GeoSAFE disaster impact analysis service.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, layer, analysis, state, audit, job, outcome, errors）
//! - **ports**: 抽象化レイヤー（TaskBroker, LayerStore, AnalysisStore, ArtifactStore, など）
//! - **app**: アプリケーションロジック（lifecycle, candidate_filter, catalog, bundle, builder）
//! - **impls**: 実装（InMemoryLayerStore, ScriptedBroker など開発用）
//! - **config**: 設定ファイル
//! - **observability**: 状態ごとの件数

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;
