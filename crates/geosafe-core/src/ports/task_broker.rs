//! TaskBroker port - 非同期ジョブ実行サービス
//!
//! Broker はジョブを受け取り、状態と結果を返します。
//! 完了したジョブのメタデータは保持期間を過ぎると消え、以後は `PENDING`
//! を返すことに注意（状態のキャッシュは呼び出し側の責務）。

use async_trait::async_trait;

use crate::domain::errors::GeosafeError;
use crate::domain::job::{BrokerStatus, JobSpec, TaskHandle};
use crate::domain::outcome::JobOutcome;

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("broker connection failed: {0}")]
    Connection(String),
}

impl From<BrokerError> for GeosafeError {
    fn from(err: BrokerError) -> Self {
        GeosafeError::BrokerUnavailable(err.to_string())
    }
}

/// TaskBroker はジョブの投入・状態取得・結果待ちを提供
///
/// # 設計原則
/// - 呼び出し側で timeout を掛ける（port 自体は timeout を持たない）
/// - `revoke` は任意。未対応の broker は既定実装（no-op）のまま
#[async_trait]
pub trait TaskBroker: Send + Sync {
    async fn submit(&self, spec: &JobSpec) -> Result<TaskHandle, BrokerError>;

    async fn poll(&self, handle: &TaskHandle) -> Result<BrokerStatus, BrokerError>;

    /// Block until the job finishes.
    async fn await_result(&self, handle: &TaskHandle) -> Result<JobOutcome, BrokerError>;

    /// Ask the broker to drop a superseded job.
    async fn revoke(&self, _handle: &TaskHandle) -> Result<(), BrokerError> {
        Ok(())
    }
}
