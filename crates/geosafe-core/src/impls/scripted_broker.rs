//! ScriptedBroker - テスト・デモ用の in-memory broker
//!
//! ジョブの進行は外から操作する（`start` / `complete` / `expire`）。
//! 実際の broker と同じく、保持期間切れ（`expire`）のジョブは `PENDING` を返す。
//!
//! # 学習ポイント
//! - Notify による完了待ち（await_result）
//! - 障害注入（unavailable / stalled）で timeout 経路を検証

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Notify;

use crate::domain::job::{BrokerStatus, JobSpec, TaskHandle};
use crate::domain::outcome::JobOutcome;
use crate::domain::state::TaskState;
use crate::ports::{BrokerError, TaskBroker};

#[derive(Debug, Clone)]
enum ScriptedJob {
    Queued,
    Running,
    Finished(JobOutcome),
}

#[derive(Debug, Default)]
pub struct ScriptedBroker {
    jobs: DashMap<TaskHandle, ScriptedJob>,
    submissions: Mutex<Vec<(TaskHandle, JobSpec)>>,
    revoked: Mutex<Vec<TaskHandle>>,
    next: AtomicU64,
    unavailable: AtomicBool,
    stalled: AtomicBool,
    changed: Notify,
}

impl ScriptedBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call fails with a connection error while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Every call hangs forever while set.
    pub fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }

    pub fn start(&self, handle: &TaskHandle) {
        self.jobs.insert(handle.clone(), ScriptedJob::Running);
        self.changed.notify_waiters();
    }

    pub fn complete(&self, handle: &TaskHandle, outcome: JobOutcome) {
        self.jobs.insert(handle.clone(), ScriptedJob::Finished(outcome));
        self.changed.notify_waiters();
    }

    /// Forget a job, as the real broker does after its retention window.
    pub fn expire(&self, handle: &TaskHandle) {
        self.jobs.remove(handle);
    }

    pub fn submissions(&self) -> Vec<(TaskHandle, JobSpec)> {
        lock(&self.submissions).clone()
    }

    pub fn last_handle(&self) -> Option<TaskHandle> {
        lock(&self.submissions).last().map(|(h, _)| h.clone())
    }

    pub fn revoked(&self) -> Vec<TaskHandle> {
        lock(&self.revoked).clone()
    }

    async fn gate(&self) -> Result<(), BrokerError> {
        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BrokerError::Connection("connection refused".to_string()));
        }
        Ok(())
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl TaskBroker for ScriptedBroker {
    async fn submit(&self, spec: &JobSpec) -> Result<TaskHandle, BrokerError> {
        self.gate().await?;
        let n = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        let handle = TaskHandle::new(format!("task-{n}"));
        self.jobs.insert(handle.clone(), ScriptedJob::Queued);
        lock(&self.submissions).push((handle.clone(), spec.clone()));
        Ok(handle)
    }

    async fn poll(&self, handle: &TaskHandle) -> Result<BrokerStatus, BrokerError> {
        self.gate().await?;
        let status = match self.jobs.get(handle).map(|job| job.value().clone()) {
            None | Some(ScriptedJob::Queued) => BrokerStatus::pending(),
            Some(ScriptedJob::Running) => BrokerStatus::running(),
            Some(ScriptedJob::Finished(outcome)) => BrokerStatus::finished(outcome),
        };
        Ok(status)
    }

    async fn await_result(&self, handle: &TaskHandle) -> Result<JobOutcome, BrokerError> {
        loop {
            // notified() は作成時点から notify_waiters を受け取る
            let notified = self.changed.notified();
            self.gate().await?;
            if let Some(ScriptedJob::Finished(outcome)) =
                self.jobs.get(handle).map(|job| job.value().clone())
            {
                return Ok(outcome);
            }
            notified.await;
        }
    }

    async fn revoke(&self, handle: &TaskHandle) -> Result<(), BrokerError> {
        self.gate().await?;
        if let Some(mut job) = self.jobs.get_mut(handle)
            && !matches!(*job, ScriptedJob::Finished(_))
        {
            *job = ScriptedJob::Finished(JobOutcome::Failure(
                crate::domain::outcome::FailureInfo::new("revoked")
                    .with_exception_class("TaskRevokedError"),
            ));
        }
        lock(&self.revoked).push(handle.clone());
        self.changed.notify_waiters();
        Ok(())
    }
}

impl ScriptedBroker {
    /// Current broker-side state, `Pending` for unknown handles.
    pub fn state_of(&self, handle: &TaskHandle) -> TaskState {
        match self.jobs.get(handle).map(|job| job.value().clone()) {
            None | Some(ScriptedJob::Queued) => TaskState::Pending,
            Some(ScriptedJob::Running) => TaskState::Running,
            Some(ScriptedJob::Finished(outcome)) => outcome.state(),
        }
    }
}
