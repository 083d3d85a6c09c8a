//! ジョブ状態の定義
//!
//! pending → processing → {completed | failed | cancelled | stopped}
//! 終端状態からの遷移は認めない。

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// ジョブ状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
    Stopped,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled | JobStatus::Stopped
        )
    }

    /// 遷移可否（同一状態への更新は進捗書き込みとして許可）
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        match (self, next) {
            (a, b) if a == b => !a.is_terminal(),
            (JobStatus::Pending, JobStatus::Processing) => true,
            (JobStatus::Pending, JobStatus::Failed | JobStatus::Cancelled) => true,
            (JobStatus::Processing, next) => next.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Stopped => "stopped",
        };
        write!(f, "{}", s)
    }
}

/// ジョブレコード
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    /// [0, 100]
    pub progress_percent: u8,
    pub phase_message: String,
    pub total_items: usize,
    pub matched_items: usize,
    /// Matched 明細の平均信頼度
    #[serde(default)]
    pub confidence_score: f64,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub elapsed_ms: u64,
    #[serde(default)]
    pub updated_at: String,
}

impl Job {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: JobStatus::Pending,
            progress_percent: 0,
            phase_message: "queued".into(),
            total_items: 0,
            matched_items: 0,
            confidence_score: 0.0,
            error_message: None,
            elapsed_ms: 0,
            updated_at: String::new(),
        }
    }

    /// 更新を適用する（全列上書き）
    pub fn apply(&mut self, update: &JobUpdate) -> Result<()> {
        if !self.status.can_transition_to(update.status) {
            return Err(Error::InvalidTransition {
                from: self.status.to_string(),
                to: update.status.to_string(),
            });
        }
        self.status = update.status;
        self.progress_percent = update.progress_percent.min(100);
        self.phase_message = update.phase_message.clone();
        self.total_items = update.total_items;
        self.matched_items = update.matched_items;
        self.confidence_score = update.confidence_score;
        self.error_message = update.error_message.clone();
        self.elapsed_ms = update.elapsed_ms;
        Ok(())
    }
}

/// ジョブ更新内容（冪等な全列書き込み）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobUpdate {
    pub status: JobStatus,
    pub progress_percent: u8,
    pub phase_message: String,
    pub total_items: usize,
    pub matched_items: usize,
    pub confidence_score: f64,
    pub error_message: Option<String>,
    pub elapsed_ms: u64,
}

impl JobUpdate {
    /// 現在のジョブ内容から更新を作る
    pub fn from_job(job: &Job) -> Self {
        Self {
            status: job.status,
            progress_percent: job.progress_percent,
            phase_message: job.phase_message.clone(),
            total_items: job.total_items,
            matched_items: job.matched_items,
            confidence_score: job.confidence_score,
            error_message: job.error_message.clone(),
            elapsed_ms: job.elapsed_ms,
        }
    }
}
