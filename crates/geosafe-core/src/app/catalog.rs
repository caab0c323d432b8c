//! ImpactFunctionCatalog - impact function 一覧
//!
//! 全件一覧は catalog インスタンスごとに一度だけ取得してキャッシュする
//! （無効化しない）。hazard/exposure を指定した問い合わせは毎回サービスに投げる。
//!
//! # 学習ポイント
//! - `tokio::sync::OnceCell::get_or_try_init` による single-flight 初期化
//! - 失敗した取得はセルを空のまま残す（次の呼び出しで再試行）

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::OnceCell;
use tracing::{debug, info, instrument};

use crate::domain::errors::GeosafeError;
use crate::domain::ids::LayerId;
use crate::ports::{ImpactFunction, ImpactFunctionService};

pub struct ImpactFunctionCatalog {
    service: Arc<dyn ImpactFunctionService>,
    timeout: Duration,
    all: OnceCell<Arc<[ImpactFunction]>>,
}

impl ImpactFunctionCatalog {
    pub fn new(service: Arc<dyn ImpactFunctionService>, timeout: Duration) -> Self {
        Self {
            service,
            timeout,
            all: OnceCell::new(),
        }
    }

    /// Full catalog when no layer is given, the functions applicable to the
    /// pair when both are. A single layer yields an empty list.
    #[instrument(skip(self))]
    pub async fn list(
        &self,
        hazard: Option<&LayerId>,
        exposure: Option<&LayerId>,
    ) -> Result<Vec<ImpactFunction>, GeosafeError> {
        match (hazard, exposure) {
            (None, None) => Ok(self.all().await?.to_vec()),
            (Some(hazard), Some(exposure)) => {
                let call = self.service.filter(hazard, exposure);
                self.bounded("filter", call).await
            }
            _ => {
                debug!("only one layer given, nothing to filter");
                Ok(Vec::new())
            }
        }
    }

    /// The memoized full list. Concurrent first callers share one fetch.
    pub async fn all(&self) -> Result<Arc<[ImpactFunction]>, GeosafeError> {
        let functions = self
            .all
            .get_or_try_init(|| async {
                let fetched = self.bounded("fetch_all", self.service.fetch_all()).await?;
                info!(count = fetched.len(), "impact function catalog loaded");
                Ok::<_, GeosafeError>(Arc::from(fetched))
            })
            .await?;
        Ok(functions.clone())
    }

    pub fn is_loaded(&self) -> bool {
        self.all.initialized()
    }

    async fn bounded(
        &self,
        op: &'static str,
        call: impl Future<Output = Result<Vec<ImpactFunction>, crate::ports::BrokerError>>,
    ) -> Result<Vec<ImpactFunction>, GeosafeError> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(GeosafeError::BrokerUnavailable(format!(
                "impact function {op} timed out after {}ms",
                self.timeout.as_millis()
            ))),
        }
    }
}
