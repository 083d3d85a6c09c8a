//! ジョブ実行コンテキスト
//!
//! キャンセル・タイムアウトの確認と進捗の永続化をまとめる。
//! 照合器にはこれを渡し、バッチ境界で `checkpoint` を呼ばせる。

use super::cancel::{CancelKind, CancellationHandle};
use super::store::{JobStore, MemoryJobStore};
use crate::error::{BoqError, Result};
use crate::retry::RetryPolicy;
use boq_match_common::{Job, JobStatus, JobUpdate};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub struct JobContext {
    job_id: String,
    store: Arc<dyn JobStore>,
    cancel: CancellationHandle,
    started: Instant,
    timeout: Duration,
    /// 最後に書き込んだ内容（全列書き込みの元）
    snapshot: Mutex<Job>,
    retry: RetryPolicy,
}

impl JobContext {
    pub fn new(job: Job, store: Arc<dyn JobStore>, cancel: CancellationHandle, timeout: Duration) -> Self {
        Self {
            job_id: job.id.clone(),
            store,
            cancel,
            started: Instant::now(),
            timeout,
            snapshot: Mutex::new(job),
            retry: RetryPolicy::default(),
        }
    }

    /// ジョブストアを持たない単発実行用
    pub fn detached() -> Self {
        let job = Job::new("detached");
        let store = Arc::new(MemoryJobStore::with_job(job.clone()));
        Self::new(job, store, CancellationHandle::new(), Duration::from_secs(u64::MAX / 4))
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn cancellation(&self) -> &CancellationHandle {
        &self.cancel
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// 要求された中断の種類
    pub fn cancel_kind(&self) -> Option<CancelKind> {
        self.cancel.kind()
    }

    /// バッチ境界での確認
    ///
    /// # Errors
    /// * `Cancelled` - キャンセル・停止が要求された
    /// * `Timeout` - 制限時間を超えた
    pub async fn checkpoint(&self, phase: &str) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(BoqError::Cancelled);
        }

        match self.store.cancel_request(&self.job_id).await {
            Ok(Some(kind)) => {
                debug!(job = %self.job_id, ?kind, "cancel marker observed");
                self.cancel.request(kind);
                return Err(BoqError::Cancelled);
            }
            Ok(None) => {}
            Err(e) => warn!(job = %self.job_id, error = %e, "failed to poll cancel marker"),
        }

        let elapsed = self.elapsed();
        if elapsed > self.timeout {
            return Err(BoqError::Timeout {
                elapsed_secs: elapsed.as_secs(),
                phase: phase.to_string(),
            });
        }
        Ok(())
    }

    /// 進捗を書き込む
    pub async fn report(&self, percent: u8, message: impl Into<String>) {
        let message = message.into();
        self.update(|job| {
            if job.status == JobStatus::Pending {
                job.status = JobStatus::Processing;
            }
            job.progress_percent = percent.min(100);
            job.phase_message = message;
        })
        .await;
    }

    /// 現在の内容に変更を加えて書き込む
    pub async fn update<F>(&self, change: F)
    where
        F: FnOnce(&mut Job),
    {
        let mut snapshot = self.snapshot.lock().await;
        let mut next = snapshot.clone();
        change(&mut next);
        next.elapsed_ms = self.elapsed().as_millis() as u64;

        if !snapshot.status.can_transition_to(next.status) {
            warn!(
                job = %self.job_id,
                from = %snapshot.status,
                to = %next.status,
                "ignoring invalid status transition"
            );
            return;
        }

        self.persist(&next).await;
        *snapshot = next;
    }

    pub async fn snapshot(&self) -> Job {
        self.snapshot.lock().await.clone()
    }

    /// 再試行付きで書き込み、失敗しても処理は続ける
    async fn persist(&self, job: &Job) {
        let update = JobUpdate::from_job(job);
        let result = self
            .retry
            .run("job status write", || self.store.update(&self.job_id, &update))
            .await;
        if let Err(e) = result {
            warn!(job = %self.job_id, error = %e, "giving up on job status write");
        }
    }
}
