//! ジョブストア
//!
//! 書き込みは全列の上書き（冪等）。読み手は古い進捗を見ることはあっても
//! 途中まで書かれた値を見ることはない。

use super::cancel::CancelKind;
use crate::error::{BoqError, Result};
use async_trait::async_trait;
use boq_match_common::{Job, JobUpdate};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, job: &Job) -> Result<()>;

    /// 更新を適用して更新後のジョブを返す（終端状態からの遷移は拒否）
    async fn update(&self, id: &str, update: &JobUpdate) -> Result<Job>;

    async fn get(&self, id: &str) -> Result<Job>;

    /// 外部からのキャンセル要求
    async fn cancel_request(&self, id: &str) -> Result<Option<CancelKind>>;

    async fn is_cancelled(&self, id: &str) -> Result<bool> {
        Ok(self.cancel_request(id).await?.is_some())
    }

    async fn request_cancel(&self, id: &str, kind: CancelKind) -> Result<()>;
}

fn stamp(job: &mut Job) {
    job.updated_at = chrono::Utc::now().to_rfc3339();
}

/// メモリ上のジョブストア
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<String, (Job, Option<CancelKind>)>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// ジョブを1件登録した状態で生成
    pub fn with_job(job: Job) -> Self {
        let mut jobs = HashMap::new();
        jobs.insert(job.id.clone(), (job, None));
        Self {
            jobs: RwLock::new(jobs),
        }
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, job: &Job) -> Result<()> {
        let mut job = job.clone();
        stamp(&mut job);
        self.jobs.write().await.insert(job.id.clone(), (job, None));
        Ok(())
    }

    async fn update(&self, id: &str, update: &JobUpdate) -> Result<Job> {
        let mut jobs = self.jobs.write().await;
        let (job, _) = jobs
            .get_mut(id)
            .ok_or_else(|| BoqError::JobNotFound(id.to_string()))?;
        job.apply(update)?;
        stamp(job);
        Ok(job.clone())
    }

    async fn get(&self, id: &str) -> Result<Job> {
        self.jobs
            .read()
            .await
            .get(id)
            .map(|(job, _)| job.clone())
            .ok_or_else(|| BoqError::JobNotFound(id.to_string()))
    }

    async fn cancel_request(&self, id: &str) -> Result<Option<CancelKind>> {
        self.jobs
            .read()
            .await
            .get(id)
            .map(|(_, kind)| *kind)
            .ok_or_else(|| BoqError::JobNotFound(id.to_string()))
    }

    async fn request_cancel(&self, id: &str, kind: CancelKind) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        let (_, requested) = jobs
            .get_mut(id)
            .ok_or_else(|| BoqError::JobNotFound(id.to_string()))?;
        requested.get_or_insert(kind);
        Ok(())
    }
}

/// ファイルベースのジョブストア
///
/// `<dir>/<id>.json` にジョブ、`<dir>/<id>.cancel` にキャンセル要求を置く。
/// 要求を別ファイルにしているので状態の書き込みで要求が消えることはない。
#[derive(Debug, Clone)]
pub struct FileJobStore {
    dir: PathBuf,
}

impl FileJobStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn job_path(&self, id: &str) -> Result<PathBuf> {
        validate_job_id(id)?;
        Ok(self.dir.join(format!("{}.json", id)))
    }

    fn cancel_path(&self, id: &str) -> Result<PathBuf> {
        validate_job_id(id)?;
        Ok(self.dir.join(format!("{}.cancel", id)))
    }

    async fn write_job(&self, job: &Job) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.job_path(&job.id)?;
        // 一時ファイル経由で置き換える
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(job)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

/// ファイル名に使えるIDか確認
fn validate_job_id(id: &str) -> Result<()> {
    let valid = !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(BoqError::JobStore(format!("不正なジョブID: {}", id)))
    }
}

#[async_trait]
impl JobStore for FileJobStore {
    async fn create(&self, job: &Job) -> Result<()> {
        let mut job = job.clone();
        stamp(&mut job);
        let cancel = self.cancel_path(&job.id)?;
        if tokio::fs::try_exists(&cancel).await? {
            tokio::fs::remove_file(&cancel).await?;
        }
        self.write_job(&job).await
    }

    async fn update(&self, id: &str, update: &JobUpdate) -> Result<Job> {
        let mut job = self.get(id).await?;
        job.apply(update)?;
        stamp(&mut job);
        self.write_job(&job).await?;
        Ok(job)
    }

    async fn get(&self, id: &str) -> Result<Job> {
        let path = self.job_path(id)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BoqError::JobNotFound(id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn cancel_request(&self, id: &str) -> Result<Option<CancelKind>> {
        let path = self.cancel_path(id)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(match content.trim() {
                "stop" => CancelKind::Stop,
                _ => CancelKind::Cancel,
            })),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn request_cancel(&self, id: &str, kind: CancelKind) -> Result<()> {
        // 存在確認
        self.get(id).await?;
        let path = self.cancel_path(id)?;
        if tokio::fs::try_exists(&path).await? {
            return Ok(());
        }
        let marker = match kind {
            CancelKind::Cancel => "cancel",
            CancelKind::Stop => "stop",
        };
        tokio::fs::write(&path, marker).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boq_match_common::JobStatus;
    use tempfile::tempdir;

    fn processing(job: &Job, progress: u8) -> JobUpdate {
        let mut update = JobUpdate::from_job(job);
        update.status = JobStatus::Processing;
        update.progress_percent = progress;
        update
    }

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryJobStore::new();
        let job = Job::new("job-1");
        store.create(&job).await.unwrap();

        let updated = store.update("job-1", &processing(&job, 40)).await.unwrap();
        assert_eq!(updated.progress_percent, 40);
        assert_eq!(store.get("job-1").await.unwrap().status, JobStatus::Processing);
        assert!(!store.is_cancelled("job-1").await.unwrap());

        store.request_cancel("job-1", CancelKind::Stop).await.unwrap();
        store.request_cancel("job-1", CancelKind::Cancel).await.unwrap();
        assert_eq!(store.cancel_request("job-1").await.unwrap(), Some(CancelKind::Stop));
    }

    #[tokio::test]
    async fn test_memory_store_unknown_job() {
        let store = MemoryJobStore::new();
        let err = store.get("missing").await.unwrap_err();
        assert!(matches!(err, BoqError::JobNotFound(_)));
    }

    #[tokio::test]
    async fn test_file_store_persists_and_keeps_cancel_marker() {
        let dir = tempdir().expect("Failed to create temp dir");
        let store = FileJobStore::new(dir.path());
        let job = Job::new("job-42");
        store.create(&job).await.unwrap();
        store.request_cancel("job-42", CancelKind::Cancel).await.unwrap();

        // 状態の書き込み後も要求は残る
        store.update("job-42", &processing(&job, 10)).await.unwrap();
        assert_eq!(store.cancel_request("job-42").await.unwrap(), Some(CancelKind::Cancel));

        let reopened = FileJobStore::new(dir.path());
        let loaded = reopened.get("job-42").await.unwrap();
        assert_eq!(loaded.progress_percent, 10);
        assert!(!loaded.updated_at.is_empty());
    }

    #[tokio::test]
    async fn test_file_store_rejects_terminal_rewrite() {
        let dir = tempdir().expect("Failed to create temp dir");
        let store = FileJobStore::new(dir.path());
        let job = Job::new("job-7");
        store.create(&job).await.unwrap();

        let mut done = processing(&job, 100);
        store.update("job-7", &done).await.unwrap();
        done.status = JobStatus::Completed;
        store.update("job-7", &done).await.unwrap();

        done.status = JobStatus::Processing;
        assert!(store.update("job-7", &done).await.is_err());
        assert_eq!(store.get("job-7").await.unwrap().status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_file_store_rejects_path_like_ids() {
        let dir = tempdir().expect("Failed to create temp dir");
        let store = FileJobStore::new(dir.path());
        assert!(store.get("../etc/passwd").await.is_err());
    }
}
