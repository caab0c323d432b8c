//! StaticFunctionService - 固定の impact function 一覧を返すサービス
//!
//! 取得回数を数えるので、catalog の single-flight 検証に使える。

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::ids::LayerId;
use crate::ports::{BrokerError, ImpactFunction, ImpactFunctionService};

#[derive(Debug, Default)]
pub struct StaticFunctionService {
    functions: Vec<ImpactFunction>,
    pairs: HashMap<(LayerId, LayerId), Vec<ImpactFunction>>,
    delay: Option<Duration>,
    fetches: AtomicUsize,
    filters: AtomicUsize,
}

impl StaticFunctionService {
    pub fn new(functions: Vec<ImpactFunction>) -> Self {
        Self {
            functions,
            ..Self::default()
        }
    }

    /// Functions returned for one hazard/exposure pair.
    pub fn with_pair(
        mut self,
        hazard: LayerId,
        exposure: LayerId,
        functions: Vec<ImpactFunction>,
    ) -> Self {
        self.pairs.insert((hazard, exposure), functions);
        self
    }

    /// Simulated latency of every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn filter_count(&self) -> usize {
        self.filters.load(Ordering::SeqCst)
    }

    async fn latency(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl ImpactFunctionService for StaticFunctionService {
    async fn fetch_all(&self) -> Result<Vec<ImpactFunction>, BrokerError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.latency().await;
        Ok(self.functions.clone())
    }

    async fn filter(
        &self,
        hazard: &LayerId,
        exposure: &LayerId,
    ) -> Result<Vec<ImpactFunction>, BrokerError> {
        self.filters.fetch_add(1, Ordering::SeqCst);
        self.latency().await;
        Ok(self
            .pairs
            .get(&(*hazard, *exposure))
            .cloned()
            .unwrap_or_default())
    }
}
