//! ImpactFunctionService port - impact function の一覧を返す外部サービス

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::ids::LayerId;
use crate::ports::BrokerError;

/// One selectable impact function.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImpactFunction {
    pub id: String,
    pub name: String,
}

impl ImpactFunction {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// The service runs behind the same broker as the analyses, so its
/// failures are broker failures.
#[async_trait]
pub trait ImpactFunctionService: Send + Sync {
    async fn fetch_all(&self) -> Result<Vec<ImpactFunction>, BrokerError>;

    async fn filter(
        &self,
        hazard: &LayerId,
        exposure: &LayerId,
    ) -> Result<Vec<ImpactFunction>, BrokerError>;
}
